use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the whole crate, realized as one enum.
///
/// Skips `op-exec`'s `kg_diag` diagnostic stack: `kg_diag` exists to attach
/// source-file spans to a parsed config tree, and this crate has no such
/// tree to point into, so plain `thiserror` variants carry the message
/// instead.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("bad host string `{host_string}`: {reason}")]
    BadHostString { host_string: String, reason: String },

    #[error("host `{host}` unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("authentication failed for `{host}`")]
    AuthFailed { host: String },

    #[error("host key verification failed for `{host}`")]
    BadHostKey { host: String },

    #[error("command `{command}` failed on `{host}` with exit code {code}")]
    CommandFailed {
        host: String,
        command: String,
        code: i32,
    },

    #[error("command timed out after {timeout:?} on `{host}`")]
    CommandTimeout { host: String, timeout: Duration },

    #[error("interactive prompt on `{host}` could not be answered: {reason}")]
    PromptAborted { host: String, reason: String },

    #[error("transfer failed on `{host}`: {reason}")]
    TransferFailed { host: String, reason: String },

    #[error("interrupted by user")]
    UserAbort,

    #[error("host `{host}` skipped: {reason}")]
    SkipHost { host: String, reason: String },

    #[error("worker for `{host}` did not join within the configured timeout")]
    WorkerJoinTimeout { host: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ssh(#[from] ssh2::Error),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    /// Coarse kind tag used by the failure-policy and executor to decide
    /// continue-vs-abort without matching every variant at every call site.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::BadHostString { .. } => ErrorKind::BadHostString,
            FleetError::Unreachable { .. } => ErrorKind::Unreachable,
            FleetError::AuthFailed { .. } => ErrorKind::AuthFailed,
            FleetError::BadHostKey { .. } => ErrorKind::BadHostKey,
            FleetError::CommandFailed { .. } => ErrorKind::CommandFailed,
            FleetError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            FleetError::PromptAborted { .. } => ErrorKind::PromptAborted,
            FleetError::TransferFailed { .. } => ErrorKind::TransferFailed,
            FleetError::UserAbort => ErrorKind::UserAbort,
            FleetError::SkipHost { .. } => ErrorKind::SkipHost,
            FleetError::WorkerJoinTimeout { .. } => ErrorKind::WorkerJoinTimeout,
            FleetError::Io(_) | FleetError::Ssh(_) => ErrorKind::Unreachable,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            FleetError::BadHostString { host_string, .. } => Some(host_string),
            FleetError::Unreachable { host, .. }
            | FleetError::AuthFailed { host }
            | FleetError::BadHostKey { host }
            | FleetError::CommandFailed { host, .. }
            | FleetError::CommandTimeout { host, .. }
            | FleetError::PromptAborted { host, .. }
            | FleetError::TransferFailed { host, .. }
            | FleetError::SkipHost { host, .. }
            | FleetError::WorkerJoinTimeout { host } => Some(host),
            FleetError::UserAbort | FleetError::Io(_) | FleetError::Ssh(_) => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    BadHostString,
    Unreachable,
    AuthFailed,
    BadHostKey,
    CommandFailed,
    CommandTimeout,
    PromptAborted,
    TransferFailed,
    UserAbort,
    SkipHost,
    WorkerJoinTimeout,
}
