//! Per-query runtime.
//!
//! A `Runtime` is created at query start and dropped at query end. It holds
//! the query's variables and options, the principal and its permission
//! gate, the elevation and cancellation flags, and the message log.
//!
//! Stages share the runtime by reference while the pipeline is being pulled,
//! so mutable state sits behind `Cell`/`RefCell`. The cancel flag is atomic so
//! another thread can stop a running query through a [`CancelHandle`].

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{PermissionGate, Principal};
use crate::execution::{self, NodeStream, Pipeline, QueryResult, ExecutionStats};
use crate::model::*;
use crate::storage::Snap;
use crate::{Error, Result};

// ============================================================================
// Options
// ============================================================================

/// Query options, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOpts {
    /// Initial query variables.
    #[serde(default)]
    pub vars: PropertyMap,
    /// Input nodes by `(form, value)`.
    #[serde(default)]
    pub ndefs: Vec<Ndef>,
    /// Input nodes by hex buid.
    #[serde(default)]
    pub idens: Vec<String>,
    /// Free-form options for commands.
    #[serde(default)]
    pub extra: PropertyMap,
}

impl QueryOpts {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A message emitted by a command while the query runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Print(String),
    Warn(String),
}

/// Cancels the query it was taken from. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// The state of one running query.
pub struct Runtime<'a> {
    snap: &'a dyn Snap,
    opts: RefCell<QueryOpts>,
    vars: RefCell<PropertyMap>,
    gate: Option<PermissionGate>,
    inputs: RefCell<Vec<Node>>,
    canceled: Arc<AtomicBool>,
    elevated: Cell<bool>,
    messages: RefCell<Vec<Message>>,
}

impl<'a> Runtime<'a> {
    pub fn new(snap: &'a dyn Snap, opts: QueryOpts) -> Self {
        let vars = opts.vars.clone();
        Self {
            snap,
            opts: RefCell::new(opts),
            vars: RefCell::new(vars),
            gate: None,
            inputs: RefCell::new(Vec::new()),
            canceled: Arc::new(AtomicBool::new(false)),
            elevated: Cell::new(false),
            messages: RefCell::new(Vec::new()),
        }
    }

    /// Run the query as `user`. Without a user every check passes.
    pub fn with_user(mut self, user: Arc<dyn Principal>) -> Self {
        self.gate = Some(PermissionGate::new(user));
        self
    }

    pub fn snap(&self) -> &'a dyn Snap {
        self.snap
    }

    pub fn model(&self) -> &'a Model {
        self.snap.model()
    }

    pub fn user(&self) -> Option<&Arc<dyn Principal>> {
        self.gate.as_ref().map(PermissionGate::principal)
    }

    // ========================================================================
    // Options and variables
    // ========================================================================

    pub fn get_opt(&self, name: &str) -> Option<Value> {
        self.opts.borrow().extra.get(name).cloned()
    }

    pub fn set_opt(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.opts.borrow_mut().extra.insert(name.into(), value.into());
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set_var(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.borrow_mut().insert(name.into(), value.into());
    }

    /// Start a path at `node` with a snapshot of the current variables.
    pub fn init_path(&self, node: Node) -> Path {
        Path::new(self.vars.borrow().clone(), node)
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Attach a node as query input.
    pub fn add_input(&self, node: Node) {
        self.inputs.borrow_mut().push(node);
    }

    /// The query's initial stream: attached inputs, then `ndefs`, then
    /// `idens`. Entries that don't resolve are skipped.
    pub fn inputs(&self) -> NodeStream<'_> {
        let explicit = self.inputs.borrow().clone();
        let (ndefs, idens) = {
            let opts = self.opts.borrow();
            (opts.ndefs.clone(), opts.idens.clone())
        };
        let snap = self.snap;

        let by_ndef = ndefs.into_iter().map(move |ndef| snap.node_by_ndef(&ndef));
        let by_iden = idens.into_iter().map(move |iden| {
            let node = Buid::from_hex(&iden).and_then(|buid| snap.node_by_buid(&buid));
            if node.is_none() {
                debug!(iden = %iden, "input iden did not resolve");
            }
            node
        });

        Box::new(
            explicit
                .into_iter()
                .map(Some)
                .chain(by_ndef)
                .chain(by_iden)
                .flatten()
                .map(move |node| {
                    let path = self.init_path(node.clone());
                    Ok((node, path))
                }),
        )
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    pub fn is_elevated(&self) -> bool {
        self.elevated.get()
    }

    /// Check a permission path for the query's principal.
    pub fn allowed(&self, perm: &[&str]) -> Result<()> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        if self.elevated.get() || gate.allowed(perm) {
            return Ok(());
        }
        Err(Error::AuthDeny {
            user: gate.principal().name().to_string(),
            perm: perm.join("."),
        })
    }

    /// Fail unless the principal (if any) is an admin.
    pub fn require_admin(&self, what: &str) -> Result<()> {
        match self.user() {
            Some(user) if !user.is_admin() => Err(Error::AuthDeny {
                user: user.name().to_string(),
                perm: what.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Bypass permission checks for the rest of the query. Admins only.
    pub fn elevate(&self) -> Result<()> {
        self.require_admin("admin")?;
        debug!("runtime elevated");
        self.elevated.set(true);
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.canceled))
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    /// Cooperative cancellation point.
    pub fn tick(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    // ========================================================================
    // Messages
    // ========================================================================

    pub fn printf(&self, mesg: impl Into<String>) {
        let mesg = mesg.into();
        info!("{mesg}");
        self.messages.borrow_mut().push(Message::Print(mesg));
    }

    pub fn warn(&self, mesg: impl Into<String>) {
        let mesg = mesg.into();
        warn!("{mesg}");
        self.messages.borrow_mut().push(Message::Warn(mesg));
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn take_messages(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }

    // ========================================================================
    // Query execution
    // ========================================================================

    /// Lazily run a pipeline. `tick()` is checked for every node pulled.
    pub fn iter_query<'q>(&'q self, pipeline: &'q Pipeline) -> NodeStream<'q> {
        execution::execute(self, pipeline)
    }

    /// Run a pipeline to completion and return the number of nodes yielded.
    pub fn exec_query(&self, pipeline: &Pipeline) -> Result<usize> {
        let mut count = 0;
        for item in self.iter_query(pipeline) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Run a pipeline to completion and collect its output.
    pub fn collect_query(&self, pipeline: &Pipeline) -> Result<QueryResult> {
        let start = Instant::now();
        let mut nodes = Vec::new();
        for item in self.iter_query(pipeline) {
            nodes.push(item?);
        }
        let stats = ExecutionStats {
            nodes_yielded: nodes.len() as u64,
            execution_time_ms: start.elapsed().as_millis() as u64,
        };
        Ok(QueryResult { nodes, messages: self.take_messages(), stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Rule, RuleUser};
    use crate::storage::MemoryStorage;
    use crate::model::schema::ModelDef;

    fn storage() -> MemoryStorage {
        MemoryStorage::new(Model::from_def(ModelDef::new().form("inet:ipv4", [])).unwrap())
    }

    #[test]
    fn test_inputs_order_and_skips() {
        let db = storage();
        let a = db.add_node("inet:ipv4", Value::from(1)).unwrap();
        let b = db.add_node("inet:ipv4", Value::from(2)).unwrap();
        let c = db.add_node("inet:ipv4", Value::from(3)).unwrap();

        let opts = QueryOpts {
            ndefs: vec![Ndef::new("inet:ipv4", 2), Ndef::new("inet:ipv4", 99)],
            idens: vec!["not hex".into(), c.buid.to_hex(), Buid([0; 32]).to_hex()],
            ..Default::default()
        };
        let runt = Runtime::new(&db, opts);
        runt.add_input(a.clone());

        let got: Vec<Buid> = runt.inputs().map(|r| r.unwrap().0.buid).collect();
        assert_eq!(got, vec![a.buid, b.buid, c.buid]);
    }

    #[test]
    fn test_init_path_snapshots_vars() {
        let db = storage();
        let a = db.add_node("inet:ipv4", Value::from(1)).unwrap();
        let runt = Runtime::new(&db, QueryOpts::default());

        runt.set_var("x", 1);
        let path = runt.init_path(a);
        runt.set_var("x", 2);

        assert_eq!(path.get_var("x"), Some(&Value::Int(1)));
        assert_eq!(runt.get_var("x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_opts_set_and_get() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default());
        assert_eq!(runt.get_opt("foo"), None);

        runt.set_opt("foo", "bar");
        assert_eq!(runt.get_opt("foo"), Some(Value::from("bar")));
        runt.set_opt("foo", 10);
        assert_eq!(runt.get_opt("foo"), Some(Value::Int(10)));
        assert_eq!(runt.get_var("foo"), None);
    }

    #[test]
    fn test_opts_extra_from_json() {
        let db = storage();
        let opts = QueryOpts::from_json(r#"{"extra": {"foo": {"type": "Int", "value": 3}}}"#).unwrap();
        let runt = Runtime::new(&db, opts);
        assert_eq!(runt.get_opt("foo"), Some(Value::Int(3)));
        assert_eq!(runt.get_opt("bar"), None);
    }

    #[test]
    fn test_allowed_without_user() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default());
        assert!(runt.allowed(&["node:del", "inet:ipv4"]).is_ok());
        assert!(runt.elevate().is_ok());
    }

    #[test]
    fn test_denial_is_never_cached() {
        let db = storage();
        let user = Arc::new(RuleUser::new("visi"));
        let runt = Runtime::new(&db, QueryOpts::default()).with_user(user.clone());

        assert!(matches!(runt.allowed(&["foo"]), Err(Error::AuthDeny { .. })));
        assert!(matches!(runt.allowed(&["foo"]), Err(Error::AuthDeny { .. })));

        user.add_rule(Rule::allow(["foo"]));
        assert!(runt.allowed(&["foo"]).is_ok());
    }

    #[test]
    fn test_auth_deny_carries_user_and_perm() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default()).with_user(Arc::new(RuleUser::new("visi")));
        match runt.allowed(&["tag:del", "foo", "bar"]) {
            Err(Error::AuthDeny { user, perm }) => {
                assert_eq!(user, "visi");
                assert_eq!(perm, "tag:del.foo.bar");
            }
            other => panic!("expected AuthDeny, got {other:?}"),
        }
    }

    #[test]
    fn test_elevate_requires_admin() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default()).with_user(Arc::new(RuleUser::new("visi")));
        assert!(matches!(runt.elevate(), Err(Error::AuthDeny { .. })));
        assert!(!runt.is_elevated());

        let runt = Runtime::new(&db, QueryOpts::default()).with_user(Arc::new(RuleUser::admin("root")));
        runt.elevate().unwrap();
        assert!(runt.is_elevated());
    }

    #[test]
    fn test_elevation_bypasses_rules() {
        let db = storage();
        let user = Arc::new(RuleUser::admin("root"));
        let runt = Runtime::new(&db, QueryOpts::default()).with_user(user.clone());
        runt.elevate().unwrap();
        user.set_admin(false);
        assert!(runt.allowed(&["anything"]).is_ok());
    }

    #[test]
    fn test_tick_after_cancel() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default());
        assert!(runt.tick().is_ok());

        let handle = runt.cancel_handle();
        std::thread::spawn(move || handle.cancel()).join().unwrap();
        assert!(matches!(runt.tick(), Err(Error::Canceled)));
    }

    #[test]
    fn test_messages() {
        let db = storage();
        let runt = Runtime::new(&db, QueryOpts::default());
        runt.printf("hello");
        runt.warn("careful");
        assert_eq!(
            runt.take_messages(),
            vec![Message::Print("hello".into()), Message::Warn("careful".into())]
        );
        assert!(runt.messages().is_empty());
    }

    #[test]
    fn test_opts_from_json() {
        let opts = QueryOpts::from_json(
            r#"{"ndefs": [{"form": "inet:ipv4", "value": {"type": "Int", "value": 1}}],
                "idens": ["00"]}"#,
        )
        .unwrap();
        assert_eq!(opts.ndefs, vec![Ndef::new("inet:ipv4", 1)]);
        assert_eq!(opts.idens, vec!["00".to_string()]);
        assert!(opts.vars.is_empty());
    }
}
