//! Minimal in-process task registry bridging the out-of-scope fabfile
//! loader: a `Vec<TaskEntry>` built with a small builder, just enough for
//! `fleet-cli`'s `task1[:args] task2 …` surface to dispatch against without
//! a dynamic module loader. A fuller example, authored directly against
//! `TaskContext` instead of the registry, lives under `demos/`.

use std::sync::Arc;

use fleet_exec::operations::TransferOptions;
use fleet_exec::{FleetResult, TaskBody, TaskContext};

use crate::task_args::TaskArgs;

fn transfer_options(args: &TaskArgs) -> TransferOptions {
    TransferOptions {
        use_sudo: args.kwargs.get("use_sudo").map(|v| v == "true" || v == "1").unwrap_or(false),
        mirror_local_mode: args
            .kwargs
            .get("mirror_local_mode")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        mode: args.kwargs.get("mode").and_then(|v| u32::from_str_radix(v, 8).ok()),
        temp_dir: args.kwargs.get("temp_dir").cloned().unwrap_or_default(),
    }
}

pub struct TaskEntry {
    pub name: String,
    pub doc: String,
    factory: Arc<dyn Fn(&TaskArgs) -> TaskBody + Send + Sync>,
}

impl TaskEntry {
    pub fn build(&self, args: &TaskArgs) -> fleet_exec::Task {
        fleet_exec::Task::new(self.name.clone(), (self.factory)(args))
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: Vec<TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> TaskRegistry {
        TaskRegistry::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        doc: impl Into<String>,
        factory: impl Fn(&TaskArgs) -> TaskBody + Send + Sync + 'static,
    ) -> Self {
        self.entries.push(TaskEntry {
            name: name.into(),
            doc: doc.into(),
            factory: Arc::new(factory),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&TaskEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }
}

fn positional_or_kwarg(args: &TaskArgs, index: usize, key: &str) -> Option<String> {
    args.positional
        .get(index)
        .cloned()
        .or_else(|| args.kwargs.get(key).cloned())
}

/// The registry `fleet-cli` ships by default: thin wrappers over the five
/// primitive operations, so `fleet run:'uptime'` works without any task
/// module of its own.
pub fn builtin_registry() -> TaskRegistry {
    TaskRegistry::new()
        .register("run", "Runs a shell command on every resolved host.", |args| {
            let command = positional_or_kwarg(args, 0, "command").unwrap_or_default();
            let body: TaskBody = Arc::new(move |ctx: &mut TaskContext| -> FleetResult<()> {
                ctx.run(&command).map(|_| ())
            });
            body
        })
        .register(
            "sudo",
            "Runs a shell command through sudo on every resolved host.",
            |args| {
                let command = positional_or_kwarg(args, 0, "command").unwrap_or_default();
                let body: TaskBody = Arc::new(move |ctx: &mut TaskContext| -> FleetResult<()> {
                    ctx.sudo(&command).map(|_| ())
                });
                body
            },
        )
        .register(
            "local",
            "Runs a shell command on the machine running fleet itself.",
            |args| {
                let command = positional_or_kwarg(args, 0, "command").unwrap_or_default();
                let body: TaskBody = Arc::new(move |ctx: &mut TaskContext| -> FleetResult<()> {
                    ctx.local(&command).map(|_| ())
                });
                body
            },
        )
        .register(
            "put",
            "Uploads local file(s) (glob ok) to a remote path. Accepts \
             use_sudo=, mirror_local_mode=, mode= (octal), temp_dir= kwargs.",
            |args| {
                let local = positional_or_kwarg(args, 0, "local").unwrap_or_default();
                let remote = positional_or_kwarg(args, 1, "remote").unwrap_or_default();
                let opts = transfer_options(args);
                let body: TaskBody = Arc::new(move |ctx: &mut TaskContext| -> FleetResult<()> {
                    ctx.put_with_options(&local, &remote, &opts).map(|_| ())
                });
                body
            },
        )
        .register(
            "get",
            "Downloads a remote path (glob ok) to a local path. Accepts \
             use_sudo=, temp_dir= kwargs.",
            |args| {
                let remote = positional_or_kwarg(args, 0, "remote").unwrap_or_default();
                let local = positional_or_kwarg(args, 1, "local").unwrap_or_default();
                let opts = transfer_options(args);
                let body: TaskBody = Arc::new(move |ctx: &mut TaskContext| -> FleetResult<()> {
                    ctx.get_with_options(&remote, &local, &opts).map(|_| ())
                });
                body
            },
        )
}
