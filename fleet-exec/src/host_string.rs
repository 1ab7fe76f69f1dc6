//! `[user[:password]@]host[:port]` parsing.
//!
//! Grounded on `op-exec/src/exec/command/ssh/dest.rs`'s `SshDest::from_url`,
//! extended with an embedded-password capture and IPv6 bracket support,
//! neither of which its URL-only parser needed.

use lazy_static::lazy_static;
use regex::Regex;

use crate::env::Env;
use crate::error::{FleetError, FleetResult};

lazy_static! {
    static ref HOST_STRING_RE: Regex = Regex::new(
        r#"(?x)
        ^
        (?: (?P<user> [^@:]+ ) (?: : (?P<password> [^@]* ) )? @ )?
        (?P<host> \[ [0-9A-Fa-f:]+ \] | [^:]+ )
        (?: : (?P<port> .* ) )?
        $
        "#
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostString {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl HostString {
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> HostString {
        HostString {
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// Parses `s` against `env`'s defaults for missing user/port. An
    /// embedded `user:password@host` password is stripped and stashed into
    /// `env.passwords[canonical]` before the canonical (password-free) form
    /// is returned.
    pub fn parse(s: &str, env: &mut Env) -> FleetResult<HostString> {
        let caps = HOST_STRING_RE
            .captures(s)
            .ok_or_else(|| FleetError::BadHostString {
                host_string: s.to_string(),
                reason: "does not match [user[:password]@]host[:port]".to_string(),
            })?;

        let host_raw = caps.name("host").unwrap().as_str();
        if host_raw.is_empty() {
            return Err(FleetError::BadHostString {
                host_string: s.to_string(),
                reason: "empty host".to_string(),
            });
        }
        let host = if host_raw.starts_with('[') && host_raw.ends_with(']') {
            host_raw[1..host_raw.len() - 1].to_string()
        } else {
            host_raw.to_string()
        };

        let user = caps
            .name("user")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| env.user());

        let port = match caps.name("port") {
            Some(m) => m.as_str().parse::<u16>().map_err(|_| FleetError::BadHostString {
                host_string: s.to_string(),
                reason: format!("non-numeric port `{}`", m.as_str()),
            })?,
            None => env.port(),
        };

        let hs = HostString::new(user, host, port);

        if let Some(pw) = caps.name("password") {
            env.set_password_for(&hs.to_canonical(), pw.as_str().to_string());
        }

        Ok(hs)
    }

    pub fn to_canonical(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

impl std::fmt::Display for HostString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_form() {
        let mut env = Env::new();
        let hs = HostString::parse("deploy@example.com:2222", &mut env).unwrap();
        assert_eq!(hs, HostString::new("deploy", "example.com", 2222));
    }

    #[test]
    fn defaults_user_and_port_from_env() {
        let mut env = Env::new();
        env.set("user", crate::env::Value::Str("fallback".into()));
        let hs = HostString::parse("example.com", &mut env).unwrap();
        assert_eq!(hs, HostString::new("fallback", "example.com", 22));
    }

    #[test]
    fn strips_embedded_password_into_env() {
        let mut env = Env::new();
        let hs = HostString::parse("bob:secret@example.com", &mut env).unwrap();
        assert_eq!(hs.to_canonical(), "bob@example.com:22");
        assert_eq!(
            env.passwords().get(&hs.to_canonical()).map(String::as_str),
            Some("secret")
        );
    }

    #[test]
    fn parses_ipv6_bracketed_host() {
        let mut env = Env::new();
        let hs = HostString::parse("[::1]:2200", &mut env).unwrap();
        assert_eq!(hs, HostString::new(env.user(), "::1", 2200));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let mut env = Env::new();
        let err = HostString::parse("example.com:abc", &mut env).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadHostString);
    }

    #[test]
    fn rejects_empty_host() {
        let mut env = Env::new();
        let err = HostString::parse("user@:22", &mut env).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadHostString);
    }
}
