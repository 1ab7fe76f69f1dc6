//! Failure-policy resolution: turns a raw [`FleetError`] from one host
//! into a decision about whether the run continues.
//!
//! Grounded on `op-exec/src/core/op/impls/parallel.rs`'s per-branch
//! error collection, generalized from "collect all, fail if any failed"
//! into the richer warn_only/abort_on_prompts/skip_bad_hosts/
//! skip_unreachable matrix.

use crate::env::Env;
use crate::error::{ErrorKind, FleetError};
use crate::multiplex::{self, Stream};

/// What the executor should do after a host produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Record the failure and keep going with the remaining hosts.
    Continue,
    /// Stop the whole task run immediately.
    Abort,
}

/// Applies `env`'s failure-policy keys to `err`, emitting a warning line
/// through the output multiplexer whenever the decision is `Continue`, and
/// returns what the caller (an operation or the executor) should do next.
pub fn resolve(env: &Env, err: &FleetError) -> Disposition {
    let disposition = match err.kind() {
        ErrorKind::BadHostString | ErrorKind::Unreachable | ErrorKind::AuthFailed
        | ErrorKind::BadHostKey
            if env.skip_bad_hosts() || env.skip_unreachable() =>
        {
            Disposition::Continue
        }
        ErrorKind::PromptAborted if env.abort_on_prompts() => Disposition::Abort,
        ErrorKind::UserAbort => Disposition::Abort,
        _ if env.warn_only() => Disposition::Continue,
        _ => Disposition::Abort,
    };

    if disposition == Disposition::Continue {
        let host = err.host().unwrap_or("?");
        multiplex::emit_note(
            env,
            Stream::Warning,
            &format!("[{}] warning: {}", host, err),
        );
    }

    disposition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Value;

    #[test]
    fn warn_only_continues_on_command_failure() {
        let mut env = Env::new();
        env.set("warn_only", Value::Bool(true));
        let err = FleetError::CommandFailed {
            host: "h1".into(),
            command: "false".into(),
            code: 1,
        };
        assert_eq!(resolve(&env, &err), Disposition::Continue);
    }

    #[test]
    fn default_policy_aborts_on_command_failure() {
        let env = Env::new();
        let err = FleetError::CommandFailed {
            host: "h1".into(),
            command: "false".into(),
            code: 1,
        };
        assert_eq!(resolve(&env, &err), Disposition::Abort);
    }

    #[test]
    fn skip_bad_hosts_continues_on_unreachable() {
        let mut env = Env::new();
        env.set("skip_bad_hosts", Value::Bool(true));
        let err = FleetError::Unreachable {
            host: "h1".into(),
            reason: "timed out".into(),
        };
        assert_eq!(resolve(&env, &err), Disposition::Continue);
    }

    #[test]
    fn abort_on_prompts_overrides_warn_only() {
        let mut env = Env::new();
        env.set("warn_only", Value::Bool(true));
        env.set("abort_on_prompts", Value::Bool(true));
        let err = FleetError::PromptAborted {
            host: "h1".into(),
            reason: "password:".into(),
        };
        assert_eq!(resolve(&env, &err), Disposition::Abort);
    }

    #[test]
    fn user_abort_always_aborts() {
        let mut env = Env::new();
        env.set("warn_only", Value::Bool(true));
        assert_eq!(resolve(&env, &FleetError::UserAbort), Disposition::Abort);
    }
}
