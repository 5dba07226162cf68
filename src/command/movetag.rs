//! `movetag`: rename a whole tag tree.
//!
//! Renaming runs once, on the first pull, before any upstream node is
//! forwarded. Definitions are handled first so every old `syn:tag` points
//! at its replacement through `isnow`; then every node carrying the old
//! tree is re-tagged with each application's original value.

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::debug;

use super::args::{ArgKind, ArgSpec, Arity, CmdDef, ParsedArgs};
use crate::execution::{self, NodeStream};
use crate::model::tag::{self, TAG_FORM};
use crate::model::*;
use crate::runtime::Runtime;
use crate::storage::{Cmpr, Selector, Snap};
use crate::{Error, Result};

pub const DEF: CmdDef = CmdDef {
    name: "movetag",
    brief: "Rename an entire tag tree and preserve time intervals.",
    descr: "Rename an entire tag tree and preserve time intervals.\n\n\
            Example:\n\n    movetag #foo.bar #baz.faz.bar",
    args: &[
        ArgSpec::positional("oldtag", ArgKind::Str, Arity::One, "The tag tree to rename."),
        ArgSpec::positional("newtag", ArgKind::Str, Arity::One, "The new tag tree name."),
    ],
};

/// A tag-tree rename, with both names normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTag {
    pub oldtag: String,
    pub newtag: String,
}

impl MoveTag {
    /// Fails if either tag is malformed, or if `newtag` sits inside the tree
    /// being moved.
    pub fn new(oldtag: &str, newtag: &str) -> Result<Self> {
        let oldtag = tag::norm(oldtag)?;
        let newtag = tag::norm(newtag)?;
        if tag::is_under(&newtag, &oldtag) {
            return Err(Error::BadOperArg {
                arg: "newtag".into(),
                message: format!("{newtag} is inside the tree being moved ({oldtag})"),
            });
        }
        Ok(Self { oldtag, newtag })
    }

    pub(crate) fn from_args(args: &ParsedArgs) -> Result<Self> {
        Self::new(
            args.str("oldtag").unwrap_or_default(),
            args.str("newtag").unwrap_or_default(),
        )
        .map_err(|e| match e {
            Error::BadTypeValu { message, .. } => Error::syntax("movetag", message),
            other => other,
        })
    }

    pub fn run<'q>(&'q self, runt: &'q Runtime<'q>, input: NodeStream<'q>) -> NodeStream<'q> {
        execution::on_first_pull(
            move || {
                let count = retag(runt.snap(), &self.oldtag, &self.newtag)?;
                runt.printf(format!("moved tags on {count} nodes."));
                Ok(())
            },
            input,
        )
    }
}

/// Move every definition and application under `old` to `new`.
///
/// Returns the number of nodes that carried `old`. Running it again is a
/// no-op apart from re-asserting `isnow`.
pub fn retag(snap: &dyn Snap, old: &str, new: &str) -> Result<usize> {
    snap.add_node(TAG_FORM, Value::from(old))?;
    snap.add_node(TAG_FORM, Value::from(new))?;

    // Phase 1: definitions.
    let defs: Vec<Node> = snap
        .nodes_by(&Selector::form(TAG_FORM), Some(&Value::from(old)), Cmpr::Under)
        .collect();

    let mut renamed: HashMap<String, String> = HashMap::with_capacity(defs.len());
    for def in defs {
        let Some(name) = def.value.as_str() else {
            continue;
        };
        let Some(target) = tag::rename(name, old, new) else {
            continue;
        };

        let newdef = snap.add_node(TAG_FORM, Value::from(target.as_str()))?;
        for key in ["doc", "title"] {
            if let Some(text) = def.get(key) {
                snap.set_prop(&newdef.buid, key, text.clone())?;
            }
        }
        snap.set_prop(&def.buid, "isnow", Value::from(target.as_str()))?;

        debug!(from = name, to = %target, "tag definition moved");
        renamed.insert(name.to_string(), target);
    }

    // Phase 2: applications. Deepest tags first, so removing a parent never
    // drops a child that still has to move.
    let tagged: Vec<Node> = snap.nodes_by(&Selector::tag(old), None, Cmpr::Eq).collect();
    for node in &tagged {
        let moving: SmallVec<[(&String, &Value); 8]> = node
            .tags
            .iter()
            .rev()
            .filter(|(name, _)| tag::is_under(name, old))
            .collect();

        for (name, value) in moving {
            let Some(target) = renamed.get(name) else {
                continue;
            };
            snap.del_tag(&node.buid, name)?;
            snap.add_tag(&node.buid, target, value.clone())?;
        }
    }

    Ok(tagged.len())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::schema::ModelDef;
    use crate::storage::MemoryStorage;
    use crate::Command;

    fn storage() -> MemoryStorage {
        MemoryStorage::new(Model::from_def(ModelDef::new().form("test:str", [])).unwrap())
    }

    fn def(db: &MemoryStorage, name: &str) -> Node {
        db.node_by_ndef(&Ndef::new(TAG_FORM, name)).unwrap()
    }

    #[test]
    fn test_new_normalizes_and_rejects_nesting() {
        let mv = MoveTag::new("#Foo.Bar", " zar.qux").unwrap();
        assert_eq!(mv, MoveTag { oldtag: "foo.bar".into(), newtag: "zar.qux".into() });

        assert!(matches!(MoveTag::new("foo", "foo.bar"), Err(Error::BadOperArg { .. })));
        assert!(matches!(MoveTag::new("foo", "foo"), Err(Error::BadOperArg { .. })));
        assert!(MoveTag::new("foo", "foobar").is_ok());
        assert!(MoveTag::new("foo..", "bar").is_err());
    }

    #[test]
    fn test_parse_reports_bad_tag_as_syntax() {
        let argv = |words: &[&str]| -> Vec<String> { words.iter().map(|s| s.to_string()).collect() };
        assert!(matches!(
            Command::parse("movetag", &argv(&["foo..", "bar"])),
            Err(Error::BadSyntax { prog, .. }) if prog == "movetag"
        ));
        assert!(matches!(
            Command::parse("movetag", &argv(&["foo", "foo.bar"])),
            Err(Error::BadOperArg { .. })
        ));
    }

    #[test]
    fn test_retag_moves_values() {
        let db = storage();
        let node = db.add_node("test:str", Value::from("a")).unwrap();
        db.add_tag(&node.buid, "foo.bar", Value::ival(10, 20)).unwrap();
        db.add_tag(&node.buid, "foo.bar.baz", Value::ival(12, 15)).unwrap();
        db.add_tag(&node.buid, "foo.other", Value::Null).unwrap();

        assert_eq!(retag(&db, "foo.bar", "zar.qux").unwrap(), 1);

        let node = db.node_by_buid(&node.buid).unwrap();
        let tags: Vec<(&str, &Value)> = node.tags.iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert_eq!(tags, vec![
            ("foo", &Value::Null),
            ("foo.other", &Value::Null),
            ("zar", &Value::Null),
            ("zar.qux", &Value::ival(10, 20)),
            ("zar.qux.baz", &Value::ival(12, 15)),
        ]);
    }

    #[test]
    fn test_retag_sets_isnow_and_copies_docs() {
        let db = storage();
        let node = db.add_node("test:str", Value::from("a")).unwrap();
        db.add_tag(&node.buid, "foo.bar.baz", Value::Null).unwrap();
        db.set_prop(&def(&db, "foo.bar.baz").buid, "doc", Value::from("baz docs")).unwrap();
        db.set_prop(&def(&db, "foo.bar").buid, "title", Value::from("Bar")).unwrap();

        retag(&db, "foo.bar", "zar.qux").unwrap();

        assert_eq!(def(&db, "foo.bar").get("isnow"), Some(&Value::from("zar.qux")));
        assert_eq!(def(&db, "foo.bar.baz").get("isnow"), Some(&Value::from("zar.qux.baz")));
        assert_eq!(def(&db, "foo").get("isnow"), None);
        assert_eq!(def(&db, "zar.qux.baz").get("doc"), Some(&Value::from("baz docs")));
        assert_eq!(def(&db, "zar.qux").get("title"), Some(&Value::from("Bar")));
        assert_eq!(def(&db, "zar.qux.baz").get("up"), Some(&Value::from("zar.qux")));
    }

    #[test]
    fn test_retag_is_idempotent() {
        let db = storage();
        let node = db.add_node("test:str", Value::from("a")).unwrap();
        db.add_tag(&node.buid, "foo.bar", Value::ival(1, 2)).unwrap();

        assert_eq!(retag(&db, "foo.bar", "zar").unwrap(), 1);
        let once = db.node_by_buid(&node.buid).unwrap();
        assert_eq!(retag(&db, "foo.bar", "zar").unwrap(), 0);
        let twice = db.node_by_buid(&node.buid).unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.tags.get("zar"), Some(&Value::ival(1, 2)));
    }

    #[test]
    fn test_retag_onto_existing_tag_merges_intervals() {
        let db = storage();
        let node = db.add_node("test:str", Value::from("a")).unwrap();
        db.add_tag(&node.buid, "foo", Value::ival(10, 20)).unwrap();
        db.add_tag(&node.buid, "bar", Value::ival(5, 12)).unwrap();

        assert_eq!(retag(&db, "foo", "bar").unwrap(), 1);

        let node = db.node_by_buid(&node.buid).unwrap();
        assert!(!node.has_tag("foo"));
        assert_eq!(node.tags.get("bar"), Some(&Value::ival(5, 20)));
    }

    #[test]
    fn test_segment_boundaries_respected() {
        let db = storage();
        let node = db.add_node("test:str", Value::from("a")).unwrap();
        db.add_tag(&node.buid, "foo.barn", Value::Null).unwrap();
        db.add_tag(&node.buid, "foo.bar", Value::Null).unwrap();

        retag(&db, "foo.bar", "zar").unwrap();

        let node = db.node_by_buid(&node.buid).unwrap();
        assert!(node.has_tag("foo.barn"));
        assert!(node.has_tag("zar"));
        assert!(!node.has_tag("foo.bar"));
        assert_eq!(def(&db, "foo.barn").get("isnow"), None);
    }
}
