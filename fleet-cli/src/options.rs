//! Command-line surface, modeled directly on `op-cli/src/options.rs`'s
//! `StructOpt`-derived `Opts`/`Command` pair — same derive style, same
//! doc-comment-as-help-text convention, scaled to the flag set a fleet
//! runner needs and no further.

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "fleet",
    author = "",
    about = "Execute shell commands and transfer files across a fleet of hosts over SSH."
)]
pub struct Opts {
    /// Path to a TOML config file overriding the built-in defaults.
    #[structopt(short = "c", long = "config", name = "PATH")]
    pub config_file_path: Option<String>,

    /// Verbose mode (-v, -vv, -vvv).
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbose: u8,

    /// Comma-separated host strings (`[user[:pw]@]host[:port]`).
    #[structopt(short = "H", long = "hosts", use_delimiter = true)]
    pub hosts: Vec<String>,

    /// Comma-separated role names, expanded through the task's roledefs.
    #[structopt(short = "R", long = "roles", use_delimiter = true)]
    pub roles: Vec<String>,

    /// Comma-separated hosts to exclude from the resolved selection.
    #[structopt(short = "x", long = "exclude-hosts", use_delimiter = true)]
    pub exclude_hosts: Vec<String>,

    /// Username to connect as, overriding the local username default.
    #[structopt(short = "u", long = "user")]
    pub user: Option<String>,

    /// Password used for both SSH login and sudo prompts, when needed.
    #[structopt(short = "p", long = "password")]
    pub password: Option<String>,

    /// Path to a private key file to use for authentication.
    #[structopt(short = "i", long = "identity")]
    pub key_filename: Option<String>,

    /// Run across hosts using a bounded worker pool instead of serially.
    #[structopt(short = "P", long = "parallel")]
    pub parallel: bool,

    /// Worker pool size when `-P`/`--parallel` is set.
    #[structopt(short = "z", long = "pool-size")]
    pub pool_size: Option<usize>,

    /// Per-connection network timeout, in seconds (0 disables it).
    #[structopt(short = "t", long = "timeout")]
    pub timeout: Option<u64>,

    /// Per-command execution timeout, in seconds (0 disables it).
    #[structopt(short = "T", long = "command-timeout")]
    pub command_timeout: Option<u64>,

    /// Log failures and continue instead of aborting the run.
    #[structopt(short = "w", long = "warn-only")]
    pub warn_only: bool,

    /// Shell invocation to wrap every command in, e.g. `/bin/bash -c`.
    #[structopt(short = "s", long = "shell")]
    pub shell: Option<String>,

    /// Bastion/gateway host string to tunnel every connection through.
    #[structopt(short = "g", long = "gateway")]
    pub gateway: Option<String>,

    /// Disable falling back to default identity files (`~/.ssh/id_*`).
    #[structopt(short = "k", long = "no-keys")]
    pub no_keys: bool,

    /// Disable falling back to the running user's ssh-agent.
    #[structopt(short = "A", long = "no-agent")]
    pub no_agent: bool,

    /// Abort immediately if an interactive password prompt is seen.
    #[structopt(short = "a", long = "abort-on-prompts")]
    pub abort_on_prompts: bool,

    /// Skip hosts that fail to resolve or connect instead of aborting.
    #[structopt(long = "skip-bad-hosts")]
    pub skip_bad_hosts: bool,

    /// Comma-separated output groups to hide (status, running, stdout,
    /// stderr, warnings, user, debug, aborts).
    #[structopt(long = "hide", use_delimiter = true)]
    pub hide: Vec<String>,

    /// Comma-separated output groups to show, overriding a prior `--hide`.
    #[structopt(long = "show", use_delimiter = true)]
    pub show: Vec<String>,

    /// List the tasks in the in-process registry and exit.
    #[structopt(short = "l", long = "list")]
    pub list_tasks: bool,

    /// Print TASK's docstring and exit.
    #[structopt(short = "d", long = "display", name = "TASK")]
    pub display_task: Option<String>,

    /// Path to a fabfile-style task module. Loading one is out of scope for
    /// this crate; accepted for surface compatibility and ignored beyond a
    /// warning if given.
    #[structopt(short = "f", long = "fabfile", name = "FABFILE")]
    pub fabfile: Option<String>,

    /// `key=value` env override, repeatable.
    #[structopt(long = "set", name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// `task1[:posarg1,posarg2,key=value] task2 …`, commas in a value
    /// escaped as `\,`, `=` in a value escaped as `\=`.
    #[structopt(name = "TASK")]
    pub tasks: Vec<String>,
}
