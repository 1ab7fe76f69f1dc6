//! On-disk defaults that seed the root [`Env`] scope at startup.
//!
//! Grounded on `op-exec/src/config.rs`'s `#[serde(default)]` + `Default`
//! struct-of-getters pattern (`DaemonConfig`, `ModelConfig`, `LogConfig`) and
//! its `resolve_env_vars`/`parse_path_list` helpers.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::env::{Env, Value};
use crate::error::FleetResult;

lazy_static::lazy_static! {
    static ref ENV_VAR_RE: Regex = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// Expands `$VAR`-style references against the process environment, the
/// same substitution `op-exec::config::resolve_env_vars` performs for path
/// lists in its own config file.
pub fn resolve_env_vars(input: &str) -> Cow<'_, str> {
    ENV_VAR_RE.replace_all(input, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub shell: String,
    pub sudo_prompt: String,
    pub password_prompts: Vec<String>,
    pub ssh_cache_limit: usize,
    pub connection_attempts: u32,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub pool_size: usize,
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            shell: "/bin/sh -c".to_string(),
            sudo_prompt: "[sudo] password for %(user)s: ".to_string(),
            password_prompts: vec![
                r"(?i)password:\s*$".to_string(),
                r"(?i)passphrase for key.*:\s*$".to_string(),
            ],
            ssh_cache_limit: 32,
            connection_attempts: 1,
            connect_timeout_secs: 10,
            keepalive_secs: 0,
            pool_size: 10,
            known_hosts_path: None,
        }
    }
}

impl FleetConfig {
    /// Loads a TOML file, falling back to defaults when `path` is `None` or
    /// absent, mirroring the `op-exec`/`op-cli` config file discovery shape
    /// without the multi-path search chain a CLI shell would layer on top.
    pub fn load(path: Option<&Path>) -> FleetResult<FleetConfig> {
        let path = match path {
            Some(p) => p,
            None => return Ok(FleetConfig::default()),
        };
        if !path.exists() {
            return Ok(FleetConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let expanded = resolve_env_vars(&raw).into_owned();
        let cfg: FleetConfig =
            toml::from_str(&expanded).map_err(|err| crate::error::FleetError::Io(
                std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
            ))?;
        Ok(cfg)
    }

    /// Seeds the defaults this config controls into the root `Env` scope.
    pub fn apply(&self, env: &mut Env) {
        env.set("shell", Value::Str(self.shell.clone()));
        env.set("sudo_prompt", Value::Str(self.sudo_prompt.clone()));
        env.set(
            "connection_attempts",
            Value::UInt(self.connection_attempts as u64),
        );
        env.set("keepalive", Value::UInt(self.keepalive_secs));
        env.set("pool_size", Value::UInt(self.pool_size as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_path_given() {
        let cfg = FleetConfig::load(None).unwrap();
        assert_eq!(cfg.shell, "/bin/sh -c");
        assert_eq!(cfg.pool_size, 10);
    }

    #[test]
    fn expands_env_vars_in_raw_toml() {
        std::env::set_var("FLEET_TEST_SHELL", "/bin/zsh -c");
        let raw = r#"shell = "$FLEET_TEST_SHELL""#;
        let expanded = resolve_env_vars(raw);
        assert_eq!(expanded, r#"shell = "/bin/zsh -c""#);
    }

    #[test]
    fn apply_seeds_env() {
        let cfg = FleetConfig {
            shell: "/bin/bash -c".into(),
            ..FleetConfig::default()
        };
        let mut env = Env::new();
        cfg.apply(&mut env);
        assert_eq!(env.shell(), "/bin/bash -c");
    }
}
