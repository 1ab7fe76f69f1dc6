//! Process-wide configuration context with scoped overlays.
//!
//! Modeled the way `op-exec::config` models its typed config structs, but
//! generalized into an explicit overlay stack: the source this was distilled
//! from keeps a thread-local-like global, which does not compose well with
//! an explicit per-worker copy (see `executor.rs`), so here `Env` is an
//! ordinary value that gets cloned for each parallel worker instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{FleetError, FleetResult};

/// A single untyped overlay value. Typed accessors on [`Env`] read and write
/// specific well-known keys through this representation.
#[derive(Clone)]
pub enum Value {
    Str(String),
    Bool(bool),
    UInt(u64),
    List(Vec<String>),
    StrMap(HashMap<String, String>),
    RoleDefs(HashMap<String, RoleValue>),
    None,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bool(b) => write!(f, "Bool({:?})", b),
            Value::UInt(n) => write!(f, "UInt({:?})", n),
            Value::List(l) => write!(f, "List({:?})", l),
            Value::StrMap(m) => write!(f, "StrMap({:?})", m),
            Value::RoleDefs(m) => write!(f, "RoleDefs({:?})", m.keys().collect::<Vec<_>>()),
            Value::None => write!(f, "None"),
        }
    }
}

/// A roledef entry: either a static host list, or a zero-argument callable
/// resolved lazily (spec's "value may be list or zero-arg callable").
#[derive(Clone)]
pub enum RoleValue {
    List(Vec<String>),
    Dynamic(Arc<dyn Fn() -> FleetResult<Vec<String>> + Send + Sync>),
}

impl std::fmt::Debug for RoleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleValue::List(l) => write!(f, "List({:?})", l),
            RoleValue::Dynamic(_) => write!(f, "Dynamic(<fn>)"),
        }
    }
}

impl RoleValue {
    /// Resolve to a concrete host list. A callable that raises is treated as
    /// a `bad_host_string`-class resolution failure (see DESIGN.md).
    pub fn resolve(&self, role_name: &str) -> FleetResult<Vec<String>> {
        match self {
            RoleValue::List(l) => Ok(l.clone()),
            RoleValue::Dynamic(f) => f().map_err(|err| FleetError::BadHostString {
                host_string: role_name.to_string(),
                reason: format!("roledef callable failed: {}", err),
            }),
        }
    }
}

const HIDDEN_GROUPS_KEY: &str = "__hidden_groups";

/// Output groups that `hide()`/`show()` can toggle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OutputGroup {
    Status,
    Running,
    Stdout,
    Stderr,
    Warnings,
    User,
    Debug,
    Aborts,
}

impl OutputGroup {
    pub fn name(self) -> &'static str {
        match self {
            OutputGroup::Status => "status",
            OutputGroup::Running => "running",
            OutputGroup::Stdout => "stdout",
            OutputGroup::Stderr => "stderr",
            OutputGroup::Warnings => "warnings",
            OutputGroup::User => "user",
            OutputGroup::Debug => "debug",
            OutputGroup::Aborts => "aborts",
        }
    }

    pub fn parse(s: &str) -> Option<OutputGroup> {
        Some(match s {
            "status" => OutputGroup::Status,
            "running" => OutputGroup::Running,
            "stdout" => OutputGroup::Stdout,
            "stderr" => OutputGroup::Stderr,
            "warnings" => OutputGroup::Warnings,
            "user" => OutputGroup::User,
            "debug" => OutputGroup::Debug,
            "aborts" => OutputGroup::Aborts,
            _ => return None,
        })
    }
}

/// The configuration context. A stack of overlay frames; reads check
/// child-then-parent, `settings()` pushes a frame and returns a guard that
/// pops it on drop (so it is restored even if the caller's closure panics).
#[derive(Debug, Clone)]
pub struct Env {
    stack: Vec<HashMap<String, Value>>,
}

impl Default for Env {
    fn default() -> Self {
        let mut root = HashMap::new();
        root.insert("user".into(), Value::Str(whoami_default()));
        root.insert("port".into(), Value::UInt(22));
        root.insert("passwords".into(), Value::StrMap(HashMap::new()));
        root.insert("no_agent".into(), Value::Bool(false));
        root.insert("no_keys".into(), Value::Bool(false));
        root.insert("timeout".into(), Value::UInt(0));
        root.insert("command_timeout".into(), Value::UInt(0));
        root.insert("connection_attempts".into(), Value::UInt(1));
        root.insert("keepalive".into(), Value::UInt(0));
        root.insert("parallel".into(), Value::Bool(false));
        root.insert("pool_size".into(), Value::UInt(10));
        root.insert("warn_only".into(), Value::Bool(false));
        root.insert("abort_on_prompts".into(), Value::Bool(false));
        root.insert("use_sudo_password".into(), Value::Bool(true));
        root.insert(
            "sudo_prompt".into(),
            Value::Str("[sudo] password for %(user)s: ".into()),
        );
        root.insert("shell".into(), Value::Str("/bin/sh -c".into()));
        root.insert("shell_env".into(), Value::StrMap(HashMap::new()));
        root.insert("always_use_pty".into(), Value::Bool(true));
        root.insert("combine_stderr".into(), Value::Bool(false));
        root.insert("linewise".into(), Value::Bool(false));
        root.insert("output_prefix".into(), Value::Bool(true));
        root.insert("hosts".into(), Value::List(Vec::new()));
        root.insert("roles".into(), Value::List(Vec::new()));
        root.insert("exclude_hosts".into(), Value::List(Vec::new()));
        root.insert("roledefs".into(), Value::RoleDefs(HashMap::new()));
        root.insert("skip_bad_hosts".into(), Value::Bool(false));
        root.insert("skip_unreachable".into(), Value::Bool(false));
        root.insert("remote_interrupt".into(), Value::Bool(false));
        root.insert(
            HIDDEN_GROUPS_KEY.into(),
            Value::List(Vec::new()),
        );
        Env { stack: vec![root] }
    }
}

fn whoami_default() -> String {
    users::get_current_username()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "root".to_string())
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.stack.iter().rev().find_map(|frame| frame.get(key))
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.stack
            .last_mut()
            .expect("Env always has a root frame")
            .insert(key.to_string(), value);
    }

    /// Enter a scope. The returned guard restores the prior state for every
    /// key touched in this frame when it drops, on any exit path.
    pub fn settings(&mut self) -> ScopeGuard<'_> {
        self.stack.push(HashMap::new());
        ScopeGuard { env: self }
    }

    /// Depth of the overlay stack; used by tests to assert invariant #2.
    pub fn scope_depth(&self) -> usize {
        self.stack.len()
    }

    // --- typed accessors -------------------------------------------------

    pub fn user(&self) -> String {
        self.str_or("user", "root")
    }

    pub fn port(&self) -> u16 {
        match self.get("port") {
            Some(Value::UInt(n)) => *n as u16,
            _ => 22,
        }
    }

    pub fn host_string(&self) -> Option<String> {
        match self.get("host_string") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn set_host_string(&mut self, hs: String) {
        self.set("host_string", Value::Str(hs));
    }

    pub fn password(&self) -> Option<String> {
        match self.get("password") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn passwords(&self) -> HashMap<String, String> {
        match self.get("passwords") {
            Some(Value::StrMap(m)) => m.clone(),
            _ => HashMap::new(),
        }
    }

    pub fn set_password_for(&mut self, host_string: &str, password: String) {
        let mut map = self.passwords();
        map.insert(host_string.to_string(), password);
        self.set("passwords", Value::StrMap(map));
    }

    pub fn key_filename(&self) -> Option<String> {
        match self.get("key_filename") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn no_agent(&self) -> bool {
        self.bool_or("no_agent", false)
    }

    pub fn no_keys(&self) -> bool {
        self.bool_or("no_keys", false)
    }

    pub fn gateway(&self) -> Option<String> {
        match self.get("gateway") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn timeout(&self) -> u64 {
        self.uint_or("timeout", 0)
    }

    pub fn command_timeout(&self) -> u64 {
        self.uint_or("command_timeout", 0)
    }

    pub fn connection_attempts(&self) -> u32 {
        self.uint_or("connection_attempts", 1) as u32
    }

    pub fn keepalive(&self) -> u64 {
        self.uint_or("keepalive", 0)
    }

    pub fn parallel(&self) -> bool {
        self.bool_or("parallel", false)
    }

    pub fn pool_size(&self) -> usize {
        self.uint_or("pool_size", 10) as usize
    }

    pub fn warn_only(&self) -> bool {
        self.bool_or("warn_only", false)
    }

    pub fn abort_on_prompts(&self) -> bool {
        self.bool_or("abort_on_prompts", false)
    }

    pub fn use_sudo_password(&self) -> bool {
        self.bool_or("use_sudo_password", true)
    }

    pub fn sudo_prompt(&self) -> String {
        self.str_or("sudo_prompt", "[sudo] password for %(user)s: ")
    }

    pub fn sudo_user(&self) -> Option<String> {
        match self.get("sudo_user") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn sudo_group(&self) -> Option<String> {
        match self.get("sudo_group") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn shell(&self) -> String {
        self.str_or("shell", "/bin/sh -c")
    }

    pub fn shell_env(&self) -> HashMap<String, String> {
        match self.get("shell_env") {
            Some(Value::StrMap(m)) => m.clone(),
            _ => HashMap::new(),
        }
    }

    pub fn always_use_pty(&self) -> bool {
        self.bool_or("always_use_pty", true)
    }

    pub fn combine_stderr(&self) -> bool {
        self.bool_or("combine_stderr", false)
    }

    pub fn linewise(&self) -> bool {
        self.bool_or("linewise", false)
    }

    pub fn output_prefix(&self) -> bool {
        self.bool_or("output_prefix", true)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.list_or("hosts")
    }

    pub fn roles(&self) -> Vec<String> {
        self.list_or("roles")
    }

    pub fn exclude_hosts(&self) -> Vec<String> {
        self.list_or("exclude_hosts")
    }

    pub fn roledefs(&self) -> HashMap<String, RoleValue> {
        match self.get("roledefs") {
            Some(Value::RoleDefs(m)) => m.clone(),
            _ => HashMap::new(),
        }
    }

    pub fn set_roledef(&mut self, name: &str, value: RoleValue) {
        let mut map = self.roledefs();
        map.insert(name.to_string(), value);
        self.set("roledefs", Value::RoleDefs(map));
    }

    pub fn skip_bad_hosts(&self) -> bool {
        self.bool_or("skip_bad_hosts", false)
    }

    pub fn skip_unreachable(&self) -> bool {
        self.bool_or("skip_unreachable", false)
    }

    pub fn remote_interrupt(&self) -> bool {
        self.bool_or("remote_interrupt", false)
    }

    // --- hide/show ---------------------------------------------------

    pub fn hide(&mut self, groups: &[OutputGroup]) {
        let mut hidden: HashSet<&'static str> = self.hidden_group_names().into_iter().collect();
        for g in groups {
            hidden.insert(g.name());
        }
        self.set(
            HIDDEN_GROUPS_KEY,
            Value::List(hidden.into_iter().map(|s| s.to_string()).collect()),
        );
    }

    pub fn show(&mut self, groups: &[OutputGroup]) {
        let mut hidden: HashSet<&'static str> = self.hidden_group_names().into_iter().collect();
        for g in groups {
            hidden.remove(g.name());
        }
        self.set(
            HIDDEN_GROUPS_KEY,
            Value::List(hidden.into_iter().map(|s| s.to_string()).collect()),
        );
    }

    pub fn is_hidden(&self, group: OutputGroup) -> bool {
        self.hidden_group_names().contains(&group.name())
    }

    fn hidden_group_names(&self) -> Vec<&'static str> {
        match self.get(HIDDEN_GROUPS_KEY) {
            Some(Value::List(l)) => l
                .iter()
                .filter_map(|s| OutputGroup::parse(s))
                .map(|g| g.name())
                .collect(),
            _ => Vec::new(),
        }
    }

    // --- helpers -----------------------------------------------------

    fn str_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::Str(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    fn uint_or(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(Value::UInt(n)) => *n,
            _ => default,
        }
    }

    fn list_or(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::List(l)) => l.clone(),
            _ => Vec::new(),
        }
    }
}

/// RAII scope guard returned by [`Env::settings`]. Dropping it restores the
/// `Env` to its state before the scope was entered, regardless of whether
/// the enclosing block returned normally or unwound.
pub struct ScopeGuard<'a> {
    env: &'a mut Env,
}

impl<'a> std::ops::Deref for ScopeGuard<'a> {
    type Target = Env;
    fn deref(&self) -> &Env {
        self.env
    }
}

impl<'a> std::ops::DerefMut for ScopeGuard<'a> {
    fn deref_mut(&mut self) -> &mut Env {
        self.env
    }
}

impl<'a> Drop for ScopeGuard<'a> {
    fn drop(&mut self) {
        self.env.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_restores_value_on_normal_exit() {
        let mut env = Env::new();
        env.set("shell", Value::Str("/bin/bash -c".into()));
        {
            let mut scope = env.settings();
            scope.set("shell", Value::Str("/bin/zsh -c".into()));
            assert_eq!(scope.shell(), "/bin/zsh -c");
        }
        assert_eq!(env.shell(), "/bin/bash -c");
        assert_eq!(env.scope_depth(), 1);
    }

    #[test]
    fn nested_scopes_compose_and_restore_in_order() {
        let mut env = Env::new();
        env.set("warn_only", Value::Bool(false));
        {
            let mut outer = env.settings();
            outer.set("warn_only", Value::Bool(true));
            {
                let mut inner = outer.settings();
                inner.set("warn_only", Value::Bool(false));
                assert_eq!(inner.warn_only(), false);
            }
            assert_eq!(outer.warn_only(), true);
        }
        assert_eq!(env.warn_only(), false);
    }

    #[test]
    fn scope_restores_on_panic_unwind() {
        let mut env = Env::new();
        env.set("pool_size", Value::UInt(10));
        let depth_before = env.scope_depth();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scope = env.settings();
            scope.set("pool_size", Value::UInt(99));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(env.scope_depth(), depth_before);
        assert_eq!(env.pool_size(), 10);
    }

    #[test]
    fn hide_show_compose_with_scopes() {
        let mut env = Env::new();
        assert!(!env.is_hidden(OutputGroup::Stdout));
        {
            let mut scope = env.settings();
            scope.hide(&[OutputGroup::Stdout]);
            assert!(scope.is_hidden(OutputGroup::Stdout));
        }
        assert!(!env.is_hidden(OutputGroup::Stdout));
    }

    #[test]
    fn roledef_dynamic_error_is_bad_host_string() {
        let bad: RoleValue = RoleValue::Dynamic(Arc::new(|| {
            Err(FleetError::BadHostString {
                host_string: "db".into(),
                reason: "lookup failed".into(),
            })
        }));
        let err = bad.resolve("db").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadHostString);
    }
}
