//! Remote-execution engine: drives shell commands and file transfers
//! across a fleet of SSH hosts from user-authored tasks.
//!
//! Module layout mirrors the component table this crate was built from:
//! a scoped configuration overlay ([`env`]), host-string parsing
//! ([`host_string`]), an on-disk config loader ([`config`]), a per-host
//! connection cache ([`connection`]) with gateway/bastion support
//! ([`gateway`]), the interactive PTY command protocol ([`channel`]), the
//! five primitive operations ([`operations`]), host-list resolution
//! ([`resolver`]), task dispatch ([`task`], [`executor`]), output
//! multiplexing ([`multiplex`]), and failure-policy resolution
//! ([`failure`]).

pub mod channel;
pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod executor;
pub mod failure;
pub mod gateway;
pub mod host_string;
pub mod multiplex;
pub mod operations;
pub mod resolver;
pub mod task;

pub use channel::ExecutionResult;
pub use config::FleetConfig;
pub use env::{Env, OutputGroup, RoleValue};
pub use error::{ErrorKind, FleetError, FleetResult};
pub use executor::{run_task, HostOutcome, TaskRunSummary};
pub use host_string::HostString;
pub use operations::TransferOutcome;
pub use resolver::HostSelector;
pub use task::{Task, TaskBody, TaskContext};
