//! Host-list resolution: roles, excludes, normalization, dedup.

use crate::env::Env;
use crate::error::FleetResult;
use crate::host_string::HostString;

#[derive(Debug, Clone, Default)]
pub struct HostSelector {
    pub hosts: Vec<String>,
    pub roles: Vec<String>,
    pub exclude_hosts: Vec<String>,
}

impl HostSelector {
    pub fn new() -> HostSelector {
        HostSelector::default()
    }

    pub fn hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Merges operation-level selection with module-level `env.hosts`/
    /// `env.roles`/`env.exclude_hosts`: the explicit selector wins when
    /// non-empty, otherwise the `Env` defaults apply.
    fn effective(&self, env: &Env) -> (Vec<String>, Vec<String>, Vec<String>) {
        let hosts = if self.hosts.is_empty() {
            env.hosts()
        } else {
            self.hosts.clone()
        };
        let roles = if self.roles.is_empty() {
            env.roles()
        } else {
            self.roles.clone()
        };
        let mut exclude = env.exclude_hosts();
        exclude.extend(self.exclude_hosts.iter().cloned());
        (hosts, roles, exclude)
    }
}

/// Resolves a [`HostSelector`] into a normalized, deduplicated, order
/// -preserving list of [`HostString`]s. An empty result means "run once
/// with `host_string` unset" — the local-only task case.
pub fn resolve(selector: &HostSelector, env: &mut Env) -> FleetResult<Vec<HostString>> {
    let (explicit_hosts, roles, excludes) = selector.effective(env);

    let mut raw_hosts: Vec<String> = Vec::new();
    raw_hosts.extend(explicit_hosts);

    let roledefs = env.roledefs();
    for role in &roles {
        if let Some(role_value) = roledefs.get(role) {
            raw_hosts.extend(role_value.resolve(role)?);
        }
    }

    raw_hosts.retain(|h| !excludes.contains(h));

    let mut normalized = Vec::with_capacity(raw_hosts.len());
    for raw in raw_hosts {
        normalized.push(HostString::parse(&raw, env)?);
    }

    Ok(dedup_preserve_order(normalized))
}

fn dedup_preserve_order(hosts: Vec<HostString>) -> Vec<HostString> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(hosts.len());
    for h in hosts {
        if seen.insert(h.to_canonical()) {
            out.push(h);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{RoleValue, Value};

    #[test]
    fn dedups_preserving_first_seen_order() {
        let mut env = Env::new();
        let selector = HostSelector::new().hosts(["a", "b", "a", "c"]);
        let resolved = resolve(&selector, &mut env).unwrap();
        let names: Vec<_> = resolved.iter().map(|h| h.host.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn expands_roles_and_applies_excludes() {
        let mut env = Env::new();
        env.set_roledef(
            "web",
            RoleValue::List(vec!["h1".into(), "h2".into()]),
        );
        env.set_roledef("db", RoleValue::List(vec!["h3".into()]));
        let selector = HostSelector::new()
            .roles(["web", "db"])
            .exclude(["h2"]);
        let resolved = resolve(&selector, &mut env).unwrap();
        let names: Vec<_> = resolved.iter().map(|h| h.host.clone()).collect();
        assert_eq!(names, vec!["h1", "h3"]);
    }

    #[test]
    fn empty_selection_resolves_to_empty_list() {
        let mut env = Env::new();
        let selector = HostSelector::new();
        let resolved = resolve(&selector, &mut env).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn module_level_env_hosts_used_when_selector_empty() {
        let mut env = Env::new();
        env.set(
            "hosts",
            Value::List(vec!["h1".into(), "h2".into()]),
        );
        let selector = HostSelector::new();
        let resolved = resolve(&selector, &mut env).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn dynamic_roledef_error_propagates_as_bad_host_string() {
        let mut env = Env::new();
        env.set_roledef(
            "broken",
            RoleValue::Dynamic(std::sync::Arc::new(|| {
                Err(crate::error::FleetError::BadHostString {
                    host_string: "broken".into(),
                    reason: "db down".into(),
                })
            })),
        );
        let selector = HostSelector::new().roles(["broken"]);
        let err = resolve(&selector, &mut env).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadHostString);
    }
}
