//! Principals and permission decisions.
//!
//! A permission is an ordered path of segments such as
//! `["tag:del", "foo", "bar"]` or `["node:del", "inet:ipv4"]`.

use std::cell::RefCell;
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Principal
// ============================================================================

/// The identity a query runs as.
pub trait Principal: Send + Sync {
    fn name(&self) -> &str;

    fn is_admin(&self) -> bool;

    /// Evaluate the principal's current rules for a permission path.
    fn allowed(&self, perm: &[&str]) -> bool;
}

/// One allow/deny rule. A rule applies when its path is a prefix of the
/// requested permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub allow: bool,
    pub path: Vec<String>,
}

impl Rule {
    pub fn allow<'s>(path: impl IntoIterator<Item = &'s str>) -> Self {
        Self { allow: true, path: path.into_iter().map(String::from).collect() }
    }

    pub fn deny<'s>(path: impl IntoIterator<Item = &'s str>) -> Self {
        Self { allow: false, path: path.into_iter().map(String::from).collect() }
    }

    fn matches(&self, perm: &[&str]) -> bool {
        self.path.len() <= perm.len() && self.path.iter().zip(perm).all(|(a, b)| a == b)
    }
}

/// A principal with an ordered rule list. The first matching rule decides;
/// no match denies. Admins are allowed everything.
///
/// Rules may change while a query is running.
#[derive(Debug)]
pub struct RuleUser {
    name: String,
    admin: RwLock<bool>,
    rules: RwLock<Vec<Rule>>,
}

impl RuleUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: RwLock::new(false),
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        let user = Self::new(name);
        user.set_admin(true);
        user
    }

    pub fn with_rule(self, rule: Rule) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn set_admin(&self, admin: bool) {
        *self.admin.write() = admin;
    }

    pub fn add_rule(&self, rule: Rule) {
        self.rules.write().push(rule);
    }

    pub fn set_rules(&self, rules: Vec<Rule>) {
        *self.rules.write() = rules;
    }
}

impl Principal for RuleUser {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_admin(&self) -> bool {
        *self.admin.read()
    }

    fn allowed(&self, perm: &[&str]) -> bool {
        if self.is_admin() {
            return true;
        }
        self.rules
            .read()
            .iter()
            .find(|r| r.matches(perm))
            .is_some_and(|r| r.allow)
    }
}

// ============================================================================
// PermissionGate
// ============================================================================

/// Per-query permission evaluator for one principal.
///
/// Successful decisions are memoized for the lifetime of the gate, keyed by
/// the exact ordered path. Denials are re-evaluated every time, so a rule
/// granted mid-query takes effect, while a rule revoked mid-query does not
/// affect a path already allowed.
pub struct PermissionGate {
    principal: Arc<dyn Principal>,
    allowed: RefCell<HashSet<Vec<String>>>,
}

impl PermissionGate {
    pub fn new(principal: Arc<dyn Principal>) -> Self {
        Self { principal, allowed: RefCell::new(HashSet::new()) }
    }

    pub fn principal(&self) -> &Arc<dyn Principal> {
        &self.principal
    }

    pub fn allowed(&self, perm: &[&str]) -> bool {
        let key: Vec<String> = perm.iter().map(|s| s.to_string()).collect();
        if self.allowed.borrow().contains(&key) {
            return true;
        }

        if !self.principal.allowed(perm) {
            debug!(user = self.principal.name(), perm = %key.join("."), "permission denied");
            return false;
        }

        self.allowed.borrow_mut().insert(key);
        true
    }

    /// Number of memoized successes.
    pub fn cached(&self) -> usize {
        self.allowed.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let user = RuleUser::new("visi")
            .with_rule(Rule::deny(["node:del", "inet:ipv4"]))
            .with_rule(Rule::allow(["node:del"]));

        assert!(!user.allowed(&["node:del", "inet:ipv4"]));
        assert!(user.allowed(&["node:del", "inet:fqdn"]));
        assert!(!user.allowed(&["tag:del", "foo"]));
    }

    #[test]
    fn test_admin_allows_everything() {
        let user = RuleUser::admin("root");
        assert!(user.allowed(&["hehe", "haha"]));
    }

    #[test]
    fn test_gate_caches_success_only() {
        let user = Arc::new(RuleUser::new("visi").with_rule(Rule::allow(["foo"])));
        let gate = PermissionGate::new(user.clone());

        assert!(gate.allowed(&["foo", "bar"]));
        assert!(!gate.allowed(&["baz"]));
        assert!(!gate.allowed(&["baz"]));
        assert_eq!(gate.cached(), 1);
    }

    #[test]
    fn test_gate_keeps_success_after_revoke() {
        let user = Arc::new(RuleUser::new("visi").with_rule(Rule::allow(["foo"])));
        let gate = PermissionGate::new(user.clone());

        assert!(gate.allowed(&["foo"]));
        user.set_rules(Vec::new());
        assert!(gate.allowed(&["foo"]));
        assert!(!gate.allowed(&["foo", "bar"]));
    }

    #[test]
    fn test_gate_sees_grant_after_denial() {
        let user = Arc::new(RuleUser::new("visi"));
        let gate = PermissionGate::new(user.clone());

        assert!(!gate.allowed(&["foo"]));
        user.add_rule(Rule::allow(["foo"]));
        assert!(gate.allowed(&["foo"]));
    }

    #[test]
    fn test_key_is_exact_ordered_path() {
        let user = Arc::new(RuleUser::new("visi").with_rule(Rule::allow(["a.b"])));
        let gate = PermissionGate::new(user.clone());

        assert!(gate.allowed(&["a.b"]));
        assert!(!gate.allowed(&["a", "b"]));
    }
}
