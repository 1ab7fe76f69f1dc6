//! Output multiplexing: `[host] stream:` line-prefixed interleaved output,
//! grounded on `op-exec/src/exec/command/ssh/operations.rs`'s
//! `[{}] out:`/`[{}] err:` line formatting, generalized to cover every
//! `OutputGroup` and routed through a single global lock so concurrent
//! worker threads never interleave partial lines.

use std::io::Write as _;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::env::{Env, OutputGroup};

lazy_static! {
    static ref STDOUT_LOCK: Mutex<()> = Mutex::new(());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
    Status,
    Running,
    Warning,
    User,
    Debug,
}

impl Stream {
    fn label(self) -> &'static str {
        match self {
            Stream::Out => "out",
            Stream::Err => "err",
            Stream::Status => "status",
            Stream::Running => "run",
            Stream::Warning => "warn",
            Stream::User => "user",
            Stream::Debug => "debug",
        }
    }

    fn group(self) -> OutputGroup {
        match self {
            Stream::Out => OutputGroup::Stdout,
            Stream::Err => OutputGroup::Stderr,
            Stream::Status => OutputGroup::Status,
            Stream::Running => OutputGroup::Running,
            Stream::Warning => OutputGroup::Warnings,
            Stream::User => OutputGroup::User,
            Stream::Debug => OutputGroup::Debug,
        }
    }
}

/// Emits one already-split line to stdout, honoring `Env`'s hide/show state
/// and `output_prefix` setting. A single process-wide lock serializes every
/// emission so two hosts' lines are never spliced mid-line: a line is
/// always the unit of interleaving.
pub fn emit_line(env: &Env, stream: Stream, host: &str, line: &str) {
    if env.is_hidden(stream.group()) {
        return;
    }
    let _guard = STDOUT_LOCK.lock();
    let mut out = std::io::stdout();
    if env.output_prefix() {
        let _ = writeln!(out, "[{}] {}: {}", host, stream.label(), line);
    } else {
        let _ = writeln!(out, "{}", line);
    }
}

/// Emits a host-less diagnostic (e.g. a warning about a skipped host),
/// still serialized against interleaved command output.
pub fn emit_note(env: &Env, stream: Stream, message: &str) {
    if env.is_hidden(stream.group()) {
        return;
    }
    let _guard = STDOUT_LOCK.lock();
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{}", message);
}

/// Holds the global output lock for the duration of the returned guard.
/// Used around interactive prompts (e.g. a masked password read) so they
/// can't land in the middle of another thread's in-flight output line.
pub fn hold() -> parking_lot::MutexGuard<'static, ()> {
    STDOUT_LOCK.lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    #[test]
    fn hidden_group_suppresses_emission() {
        let mut env = Env::new();
        env.hide(&[OutputGroup::Stdout]);
        assert!(env.is_hidden(Stream::Out.group()));
    }

    #[test]
    fn stream_labels_are_stable() {
        assert_eq!(Stream::Out.label(), "out");
        assert_eq!(Stream::Err.label(), "err");
    }
}
