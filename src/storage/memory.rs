//! In-memory storage backend.
//!
//! This is the reference implementation of `Snap`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Limitations
//!
//! - **No transactions**: writes are applied immediately and are never
//!   rolled back.
//! - **No property indexes**: property lifts scan the nodes of the owning
//!   form. Form and tag lifts are index-backed.
//! - **Snapshot lifts**: a lift collects matching buids under the read lock
//!   and resolves nodes lazily afterwards. Nodes deleted in between are
//!   skipped; nodes created in between are not seen.
//!
//! Use this backend for:
//! - Testing the runtime, pipeline and commands
//! - Embedding hyperq in applications that don't need persistence

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::model::schema::PropKind;
use crate::model::tag::{self, TAG_FORM};
use crate::model::*;
use crate::{Error, Result};
use super::{Cmpr, NodeIter, Selector, Snap};

// ============================================================================
// MemoryStorage
// ============================================================================

/// In-memory hypergraph storage.
pub struct MemoryStorage {
    model: Model,
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<Buid, Node>>,
    /// form → node buids, in creation order
    form_index: RwLock<HashMap<String, Vec<Buid>>>,
    /// tag → buids of nodes carrying it (explicitly or as an ancestor)
    tag_index: RwLock<HashMap<String, Vec<Buid>>>,
}

impl MemoryStorage {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                form_index: RwLock::new(HashMap::new()),
                tag_index: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.read().len()
    }

    /// Create (or fetch) a node and set the given properties on it.
    pub fn add_node_with(
        &self,
        form: &str,
        value: impl Into<Value>,
        props: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Result<Node> {
        let mut node = self.add_node(form, value.into())?;
        for (name, val) in props {
            node = self.set_prop(&node.buid, name, val)?;
        }
        Ok(node)
    }

    fn buids_of_form(&self, form: &str) -> Vec<Buid> {
        self.inner.form_index.read().get(form).cloned().unwrap_or_default()
    }

    fn buids_of_tag(&self, tag: &str) -> Vec<Buid> {
        self.inner.tag_index.read().get(tag).cloned().unwrap_or_default()
    }

    fn insert_node(&self, node: Node) {
        let buid = node.buid;
        let form = node.form.clone();
        {
            let mut nodes = self.inner.nodes.write();
            if nodes.contains_key(&buid) {
                return;
            }
            nodes.insert(buid, node);
        }
        self.inner.form_index.write().entry(form).or_default().push(buid);
    }

    /// Create the definition node for a tag, and for its ancestors.
    fn ensure_tag_def(&self, name: &str) -> Node {
        let ndef = Ndef::new(TAG_FORM, name);
        if let Some(node) = self.node_by_ndef(&ndef) {
            return node;
        }

        if let Some(up) = tag::parent(name) {
            self.ensure_tag_def(up);
        }

        let mut node = Node::new(TAG_FORM, name)
            .with_prop("depth", tag::depth(name))
            .with_prop("base", tag::base(name));
        if let Some(up) = tag::parent(name) {
            node.props.insert("up".into(), Value::from(up));
        }

        debug!(tag = name, "created tag definition");
        self.insert_node(node.clone());
        node
    }

    fn index_tags(&self, buid: Buid, added: &[String]) {
        if added.is_empty() {
            return;
        }
        let mut idx = self.inner.tag_index.write();
        for name in added {
            let ids = idx.entry(name.clone()).or_default();
            if !ids.contains(&buid) {
                ids.push(buid);
            }
        }
    }

    fn unindex_tags(&self, buid: Buid, removed: &[String]) {
        let mut idx = self.inner.tag_index.write();
        for name in removed {
            if let Some(ids) = idx.get_mut(name) {
                ids.retain(|b| *b != buid);
                if ids.is_empty() {
                    idx.remove(name);
                }
            }
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(Model::new())
    }
}

fn value_matches(have: &Value, want: &Value, cmpr: Cmpr) -> bool {
    match cmpr {
        Cmpr::Eq => have == want,
        Cmpr::Under => match (have.as_str(), want.as_str()) {
            (Some(h), Some(w)) => tag::is_under(h, w),
            _ => false,
        },
    }
}

// ============================================================================
// Snap impl
// ============================================================================

impl Snap for MemoryStorage {
    fn model(&self) -> &Model {
        &self.model
    }

    fn node_by_buid(&self, buid: &Buid) -> Option<Node> {
        self.inner.nodes.read().get(buid).cloned()
    }

    fn nodes_by<'a>(&'a self, sel: &Selector, value: Option<&Value>, cmpr: Cmpr) -> NodeIter<'a> {
        match sel {
            Selector::Form(form) => {
                if let (Some(v), Cmpr::Eq) = (value, cmpr) {
                    let found = self.node_by_ndef(&Ndef::new(form.as_str(), v.clone()));
                    return Box::new(found.into_iter());
                }
                let want = value.cloned();
                Box::new(
                    self.buids_of_form(form)
                        .into_iter()
                        .filter_map(move |b| self.node_by_buid(&b))
                        .filter(move |n| want.as_ref().is_none_or(|w| value_matches(&n.value, w, cmpr))),
                )
            }

            Selector::Prop(full) => {
                let Some(prop) = self.model.prop(full) else {
                    debug!(prop = %full, "lift by unknown property");
                    return Box::new(std::iter::empty());
                };
                let name = prop.name.clone();
                let want = value.cloned();
                Box::new(
                    self.buids_of_form(&prop.form)
                        .into_iter()
                        .filter_map(move |b| self.node_by_buid(&b))
                        .filter(move |n| match (n.get(&name), &want) {
                            (Some(have), Some(w)) => value_matches(have, w, cmpr),
                            (Some(_), None) => true,
                            (None, _) => false,
                        }),
                )
            }

            Selector::Tag(name) => Box::new(
                self.buids_of_tag(name)
                    .into_iter()
                    .filter_map(move |b| self.node_by_buid(&b)),
            ),
        }
    }

    fn add_node(&self, form: &str, value: Value) -> Result<Node> {
        if self.model.form(form).is_none() {
            return Err(Error::NoSuchForm(form.to_string()));
        }

        if form == TAG_FORM {
            let name = value.as_str().ok_or_else(|| Error::BadTypeValu {
                name: TAG_FORM.into(),
                message: format!("expected a string, got {}", value.type_name()),
            })?;
            let name = tag::norm(name)?;
            return Ok(self.ensure_tag_def(&name));
        }

        let node = Node::new(form, value);
        if let Some(existing) = self.node_by_buid(&node.buid) {
            return Ok(existing);
        }
        self.insert_node(node.clone());
        Ok(node)
    }

    fn set_prop(&self, buid: &Buid, name: &str, value: Value) -> Result<Node> {
        let mut nodes = self.inner.nodes.write();
        let node = nodes.get_mut(buid).ok_or_else(|| Error::NotFound(format!("node {buid}")))?;

        let prop = self
            .model
            .form_prop(&node.form, name)
            .ok_or_else(|| Error::NoSuchProp(format!("{}:{name}", node.form)))?;

        if prop.kind == PropKind::Ndef && value.as_ndef().is_none() {
            return Err(Error::BadTypeValu {
                name: prop.full.clone(),
                message: format!("expected an ndef, got {}", value.type_name()),
            });
        }

        node.props.insert(name.to_string(), value);
        Ok(node.clone())
    }

    fn add_tag(&self, buid: &Buid, name: &str, value: Value) -> Result<Node> {
        let name = tag::norm(name)?;
        self.ensure_tag_def(&name);

        let mut added = Vec::new();
        let node = {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(buid).ok_or_else(|| Error::NotFound(format!("node {buid}")))?;

            for anc in tag::ancestors(&name) {
                if !node.tags.contains_key(anc) {
                    node.tags.insert(anc.to_string(), Value::Null);
                    added.push(anc.to_string());
                }
            }

            let merged = match node.tags.get(&name) {
                Some(old) => Value::merged(old, &value),
                None => {
                    added.push(name.clone());
                    value
                }
            };
            node.tags.insert(name, merged);
            node.clone()
        };

        self.index_tags(*buid, &added);
        Ok(node)
    }

    fn del_tag(&self, buid: &Buid, name: &str) -> Result<Node> {
        let name = tag::norm(name)?;

        let (node, removed) = {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(buid).ok_or_else(|| Error::NotFound(format!("node {buid}")))?;
            let removed: Vec<String> = node
                .tags
                .keys()
                .filter(|t| tag::is_under(t, &name))
                .cloned()
                .collect();
            for t in &removed {
                node.tags.remove(t);
            }
            (node.clone(), removed)
        };

        self.unindex_tags(*buid, &removed);
        Ok(node)
    }

    fn delete_node(&self, buid: &Buid, force: bool) -> Result<bool> {
        let Some(node) = self.node_by_buid(buid) else {
            return Ok(false);
        };

        if node.form == TAG_FORM && !force {
            if let Some(name) = node.value.as_str() {
                let count = self.buids_of_tag(name).len();
                if count > 0 {
                    return Err(Error::CantDelNode {
                        ndef: format!("{TAG_FORM}={name}"),
                        message: format!("tag is still applied to {count} nodes"),
                    });
                }
            }
        }

        let removed = self.inner.nodes.write().remove(buid);
        if let Some(ids) = self.inner.form_index.write().get_mut(&node.form) {
            ids.retain(|b| b != buid);
        }
        let tags: Vec<String> = node.tags.keys().cloned().collect();
        self.unindex_tags(*buid, &tags);

        Ok(removed.is_some())
    }
}

// ============================================================================
// Tests
// ============================================================================
