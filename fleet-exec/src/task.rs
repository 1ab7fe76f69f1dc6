//! Task abstraction: a task is a unit of work dispatched once per resolved
//! host (or once, host-less, for a purely local task), given a
//! [`TaskContext`] through which it reaches every operation in
//! [`crate::operations`].
//!
//! This is the narrow execution-time seam an out-of-process task loader
//! would plug into: loading/parsing task definitions from a file is
//! explicitly not this crate's concern, but *running* one, once resolved
//! to a closure, is — grounded on `op-exec/src/core/scheduler.rs`'s own
//! `Task`/closure duality (`impl<F: FnMut()> Task for F`).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::channel::ExecutionResult;
use crate::connection::ConnectionCache;
use crate::env::Env;
use crate::error::FleetResult;
use crate::host_string::HostString;
use crate::operations;

/// Per-invocation handle a task body uses to run operations against the
/// host it was dispatched for (`None` for a host-less/local-only task).
pub struct TaskContext<'a> {
    pub env: &'a mut Env,
    pub cache: &'a mut ConnectionCache,
    pub host: Option<&'a HostString>,
    pub stop_flag: &'a Arc<AtomicBool>,
}

impl<'a> TaskContext<'a> {
    fn require_host(&self) -> FleetResult<&HostString> {
        self.host.ok_or_else(|| crate::error::FleetError::TransferFailed {
            host: "<none>".into(),
            reason: "operation requires a resolved host but none is bound".into(),
        })
    }

    pub fn run(&mut self, command: &str) -> FleetResult<ExecutionResult> {
        let host = self.require_host()?.clone();
        operations::run(self.env, self.cache, &host, command, None, self.stop_flag)
    }

    pub fn run_in(&mut self, command: &str, cwd: &str) -> FleetResult<ExecutionResult> {
        let host = self.require_host()?.clone();
        operations::run(self.env, self.cache, &host, command, Some(cwd), self.stop_flag)
    }

    pub fn sudo(&mut self, command: &str) -> FleetResult<ExecutionResult> {
        let host = self.require_host()?.clone();
        operations::sudo(self.env, self.cache, &host, command, None, self.stop_flag)
    }

    pub fn local(&mut self, command: &str) -> FleetResult<ExecutionResult> {
        operations::local(self.env, command, None, self.stop_flag)
    }

    pub fn put(
        &mut self,
        local_glob: &str,
        remote_path: &str,
    ) -> FleetResult<operations::TransferOutcome> {
        self.put_with_options(local_glob, remote_path, &operations::TransferOptions::default())
    }

    pub fn put_with_options(
        &mut self,
        local_glob: &str,
        remote_path: &str,
        opts: &operations::TransferOptions,
    ) -> FleetResult<operations::TransferOutcome> {
        let host = self.require_host()?.clone();
        operations::put(self.env, self.cache, &host, local_glob, remote_path, opts)
    }

    pub fn get(
        &mut self,
        remote_path: &str,
        local_path: &str,
    ) -> FleetResult<operations::TransferOutcome> {
        self.get_with_options(remote_path, local_path, &operations::TransferOptions::default())
    }

    pub fn get_with_options(
        &mut self,
        remote_path: &str,
        local_path: &str,
        opts: &operations::TransferOptions,
    ) -> FleetResult<operations::TransferOutcome> {
        let host = self.require_host()?.clone();
        operations::get(self.env, self.cache, &host, remote_path, local_path, opts)
    }

    pub fn prompt(&mut self, message: &str) -> FleetResult<String> {
        operations::prompt(self.env, message)
    }
}

/// A unit of work dispatched once per resolved host by the executor.
pub type TaskBody = Arc<dyn Fn(&mut TaskContext) -> FleetResult<()> + Send + Sync>;

/// Named wrapper around a [`TaskBody`], carrying the metadata the executor
/// and output multiplexer report against (the task name appearing in
/// status lines).
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub body: TaskBody,
}

impl Task {
    pub fn new(name: impl Into<String>, body: TaskBody) -> Task {
        Task {
            name: name.into(),
            body,
        }
    }
}
