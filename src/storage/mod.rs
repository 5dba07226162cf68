//! # Storage Snapshot Trait
//!
//! `Snap` is the contract between the query engine and any storage engine.
//! A snap is a per-query view of the store: lifts, node creation and the
//! node mutators commands need.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryStorage` | `memory` | In-memory for testing/embedding |

pub mod memory;

use crate::model::*;
use crate::Result;

pub use memory::MemoryStorage;

// ============================================================================
// Lift selectors
// ============================================================================

/// What a lift matches against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Nodes of a form, optionally compared on their primary value.
    Form(String),
    /// Nodes carrying a property, by full `form:name`.
    Prop(String),
    /// Nodes carrying a tag (or anything nested under it).
    Tag(String),
}

impl Selector {
    pub fn form(name: impl Into<String>) -> Self { Selector::Form(name.into()) }
    pub fn prop(full: impl Into<String>) -> Self { Selector::Prop(full.into()) }
    pub fn tag(name: impl Into<String>) -> Self { Selector::Tag(name.into()) }
}

/// Comparator applied to the lifted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cmpr {
    #[default]
    Eq,
    /// String value equals the given dotted path or nests under it.
    Under,
}

/// Lazily evaluated lift results.
pub type NodeIter<'a> = Box<dyn Iterator<Item = Node> + 'a>;

// ============================================================================
// Snap Trait
// ============================================================================

/// The storage contract.
///
/// Lifts never fail: unknown selectors and missing nodes produce nothing.
/// Mutators apply immediately; there is no rollback at this layer.
pub trait Snap: Send + Sync {
    /// The model this store validates against.
    fn model(&self) -> &Model;

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Get a node by buid. Returns None if not found.
    fn node_by_buid(&self, buid: &Buid) -> Option<Node>;

    /// Get a node by its `(form, value)` identity.
    ///
    /// Default: derive the buid and look it up.
    fn node_by_ndef(&self, ndef: &Ndef) -> Option<Node> {
        self.node_by_buid(&ndef.buid())
    }

    /// Lift nodes by selector. A `None` value matches every node the
    /// selector covers.
    fn nodes_by<'a>(&'a self, sel: &Selector, value: Option<&Value>, cmpr: Cmpr) -> NodeIter<'a>;

    // ========================================================================
    // Mutators
    // ========================================================================

    /// Create a node if absent; return the stored node either way.
    fn add_node(&self, form: &str, value: Value) -> Result<Node>;

    /// Set a property on a node (upsert).
    fn set_prop(&self, buid: &Buid, name: &str, value: Value) -> Result<Node>;

    /// Apply a tag (and implicitly its ancestors). Re-applying merges values.
    fn add_tag(&self, buid: &Buid, tag: &str, value: Value) -> Result<Node>;

    /// Remove a tag and every tag nested under it.
    fn del_tag(&self, buid: &Buid, tag: &str) -> Result<Node>;

    /// Delete a node. Returns true if it existed.
    fn delete_node(&self, buid: &Buid, force: bool) -> Result<bool>;
}
