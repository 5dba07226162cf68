//! # hyperq: Hypergraph Query Execution
//!
//! Runs chains of commands over a lazy stream of `(Node, Path)` pairs
//! against a hypergraph store, under a permission-checked runtime.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Snap` is the contract between the engine and storage
//! 2. **Pull, don't push**: every stage is an `Iterator`; nothing runs until
//!    the consumer asks for the next node
//! 3. **One runtime per query**: variables, options, elevation, cancellation
//!    and the permission cache live and die with the query
//! 4. **Commands are data**: a pipeline is a `Vec<Command>` validated before
//!    any node is touched
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hyperq::{Graph, Model, ModelDef, Ndef, QueryOpts, Snap, Value};
//!
//! # fn example() -> hyperq::Result<()> {
//! let model = Model::from_def(
//!     ModelDef::new()
//!         .form("inet:ipv4", [])
//!         .form("inet:dns:a", [("ipv4", "inet:ipv4")]),
//! )?;
//! let graph = Graph::open_memory(model);
//!
//! let ip = graph.storage().add_node("inet:ipv4", Value::from(0x01020304))?;
//! let dns = graph.storage().add_node("inet:dns:a", Value::from("woot.com/1.2.3.4"))?;
//! graph.storage().set_prop(&dns.buid, "ipv4", Value::from(0x01020304))?;
//!
//! let mut opts = QueryOpts::default();
//! opts.ndefs.push(Ndef::new("inet:ipv4", 0x01020304));
//! let result = graph.execute("noderefs --degrees 2 | uniq | limit 10", opts)?;
//!
//! for (node, path) in &result.nodes {
//!     println!("{} {} ({} hops)", node.form, node.value, path.len() - 1);
//! }
//! # let _ = ip;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod auth;
pub mod runtime;
pub mod execution;
pub mod command;

use std::sync::Arc;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    Buid, Ndef, Node, Path, Value, PropertyMap, TagMap,
    Model, ModelDef, FormKind, PropKind,
};

// ============================================================================
// Re-exports: Storage and auth
// ============================================================================

pub use storage::{Snap, Selector, Cmpr, MemoryStorage};
pub use auth::{Principal, PermissionGate, Rule, RuleUser};

// ============================================================================
// Re-exports: Execution
// ============================================================================

pub use runtime::{Runtime, QueryOpts, Message, CancelHandle};
pub use execution::{Pipeline, NodeStream, QueryResult, ExecutionStats};
pub use command::{Command, CmdDef, MoveTag, NodeRefs, COMMANDS};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` wraps a storage snap and runs
/// command pipelines against it.
pub struct Graph<S: Snap> {
    storage: S,
}

impl<S: Snap> Graph<S> {
    /// Create a Graph with the given storage.
    pub fn with_storage(storage: S) -> Self {
        Self { storage }
    }

    /// Run a command chain with no principal (unrestricted).
    pub fn execute(&self, query: &str, opts: QueryOpts) -> Result<QueryResult> {
        // Phase 1: Parse. Bad invocations fail here, before any node is read.
        let pipeline = Pipeline::parse(query)?;

        // Phase 2: Execute
        let runt = Runtime::new(&self.storage, opts);
        runt.collect_query(&pipeline)
    }

    /// Run a command chain as the given principal.
    pub fn execute_as(
        &self,
        query: &str,
        opts: QueryOpts,
        user: Arc<dyn Principal>,
    ) -> Result<QueryResult> {
        let pipeline = Pipeline::parse(query)?;
        let runt = Runtime::new(&self.storage, opts).with_user(user);
        runt.collect_query(&pipeline)
    }

    /// Create a runtime for driving a query step by step.
    pub fn runtime(&self, opts: QueryOpts) -> Runtime<'_> {
        Runtime::new(&self.storage, opts)
    }

    /// Access the underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

/// In-memory graph for testing and embedding.
impl Graph<MemoryStorage> {
    pub fn open_memory(model: Model) -> Self {
        Self::with_storage(MemoryStorage::new(model))
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed invocation or pipeline text. Raised before execution.
    #[error("{prog}: {message}")]
    BadSyntax { prog: String, message: String },

    /// Well-formed but semantically invalid argument.
    #[error("bad argument {arg}: {message}")]
    BadOperArg { arg: String, message: String },

    #[error("user {user} is not allowed: {perm}")]
    AuthDeny { user: String, perm: String },

    #[error("query canceled")]
    Canceled,

    #[error("no such form: {0}")]
    NoSuchForm(String),

    #[error("no such property: {0}")]
    NoSuchProp(String),

    #[error("bad value for {name}: {message}")]
    BadTypeValu { name: String, message: String },

    #[error("cannot delete {ndef}: {message}")]
    CantDelNode { ndef: String, message: String },

    #[error("model error: {0}")]
    ModelError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn syntax(prog: &str, message: impl Into<String>) -> Self {
        Error::BadSyntax { prog: prog.to_string(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
