//! Dotted hierarchical tag names.
//!
//! `foo.bar.baz` nests under `foo.bar`, which nests under `foo`. Prefix
//! matching is always by whole segment: `foo.bar` does not contain
//! `foo.barn`.

use smallvec::SmallVec;

use crate::{Error, Result};

/// Form name of tag-definition nodes.
pub const TAG_FORM: &str = "syn:tag";

/// Normalize a user supplied tag: strip a leading `#`, trim, lower-case,
/// and reject empty segments.
pub fn norm(text: &str) -> Result<String> {
    let tag = text.trim().trim_start_matches('#').trim().to_lowercase();
    if tag.is_empty() || tag.split('.').any(|seg| seg.trim().is_empty()) {
        return Err(Error::BadTypeValu {
            name: TAG_FORM.into(),
            message: format!("invalid tag: {text:?}"),
        });
    }
    Ok(tag)
}

/// True if `tag` equals `root` or nests under it.
pub fn is_under(tag: &str, root: &str) -> bool {
    tag == root
        || (tag.len() > root.len()
            && tag.starts_with(root)
            && tag.as_bytes()[root.len()] == b'.')
}

/// Substitute the `old` prefix of `tag` with `new`, keeping the suffix.
/// Returns None when `tag` is not under `old`.
pub fn rename(tag: &str, old: &str, new: &str) -> Option<String> {
    if !is_under(tag, old) {
        return None;
    }
    Some(format!("{new}{}", &tag[old.len()..]))
}

/// The strict ancestors of a tag, shallowest first: `a.b.c` → `[a, a.b]`.
pub fn ancestors(tag: &str) -> SmallVec<[&str; 4]> {
    tag.match_indices('.').map(|(i, _)| &tag[..i]).collect()
}

/// Parent tag, if any.
pub fn parent(tag: &str) -> Option<&str> {
    tag.rfind('.').map(|i| &tag[..i])
}

/// Last segment of a tag.
pub fn base(tag: &str) -> &str {
    tag.rsplit('.').next().unwrap_or(tag)
}

/// Number of segments below the root (`foo` is depth 0).
pub fn depth(tag: &str) -> i64 {
    tag.matches('.').count() as i64
}

/// Permission path segments for a tag: `foo.bar` → `[foo, bar]`.
pub fn segments(tag: &str) -> impl Iterator<Item = &str> {
    tag.split('.')
}
