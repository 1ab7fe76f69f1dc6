use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use colored::Colorize;
use structopt::StructOpt;
use tracing::{error, warn};

use fleet_exec::env::{OutputGroup, Value};
use fleet_exec::{Env, FleetConfig, HostSelector};

mod options;
mod registry;
mod task_args;

use options::Opts;
use registry::TaskRegistry;
use task_args::parse_task_spec;

/// Maps `-v` occurrence count to a `tracing` filter, the same scale
/// `op-cli`/`op-log`'s `init_tracing(verbosity, ...)` uses.
fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity_filter(verbose)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn install_sigint_handler(stop_flag: Arc<AtomicBool>) {
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, stop_flag);
}

fn build_env(opts: &Opts, config: &FleetConfig) -> Env {
    let mut env = Env::new();
    config.apply(&mut env);

    if let Some(user) = &opts.user {
        env.set("user", Value::Str(user.clone()));
    }
    if let Some(pw) = &opts.password {
        env.set("password", Value::Str(pw.clone()));
    }
    if let Some(key) = &opts.key_filename {
        env.set("key_filename", Value::Str(key.clone()));
    }
    if let Some(gw) = &opts.gateway {
        env.set("gateway", Value::Str(gw.clone()));
    }
    if let Some(shell) = &opts.shell {
        env.set("shell", Value::Str(shell.clone()));
    }
    if let Some(secs) = opts.timeout {
        env.set("timeout", Value::UInt(secs));
    }
    if let Some(secs) = opts.command_timeout {
        env.set("command_timeout", Value::UInt(secs));
    }
    env.set("no_agent", Value::Bool(opts.no_agent));
    env.set("no_keys", Value::Bool(opts.no_keys));
    env.set("parallel", Value::Bool(opts.parallel));
    if let Some(pool_size) = opts.pool_size {
        env.set("pool_size", Value::UInt(pool_size as u64));
    }
    env.set("warn_only", Value::Bool(opts.warn_only));
    env.set("abort_on_prompts", Value::Bool(opts.abort_on_prompts));
    env.set("skip_bad_hosts", Value::Bool(opts.skip_bad_hosts));

    let hidden: Vec<OutputGroup> = opts.hide.iter().filter_map(|s| OutputGroup::parse(s)).collect();
    env.hide(&hidden);
    let shown: Vec<OutputGroup> = opts.show.iter().filter_map(|s| OutputGroup::parse(s)).collect();
    env.show(&shown);

    // `--set k=v` is a generic overlay for task-read custom keys, not a
    // typed-setting override: the built-in settings above each have their
    // own dedicated flag already.
    for kv in &opts.set {
        if let Some((k, v)) = kv.split_once('=') {
            env.set(k, Value::Str(v.to_string()));
        } else {
            warn!("ignoring malformed --set `{}`, expected key=value", kv);
        }
    }

    env
}

fn print_task_list(registry: &TaskRegistry) {
    for entry in registry.entries() {
        println!("{:<12} {}", entry.name, entry.doc);
    }
}

fn print_task_doc(registry: &TaskRegistry, name: &str) -> bool {
    match registry.get(name) {
        Some(entry) => {
            println!("{}", entry.doc);
            true
        }
        None => {
            eprintln!("no such task `{}`", name);
            false
        }
    }
}

fn main() {
    let opts = Opts::from_args();
    init_tracing(opts.verbose);

    let registry = registry::builtin_registry();

    if opts.list_tasks {
        print_task_list(&registry);
        return;
    }
    if let Some(name) = &opts.display_task {
        if !print_task_doc(&registry, name) {
            std::process::exit(2);
        }
        return;
    }
    if let Some(fabfile) = &opts.fabfile {
        warn!(
            "-f/--fabfile `{}` given, but loading task modules is out of scope for this crate; ignoring",
            fabfile
        );
    }

    if opts.tasks.is_empty() {
        eprintln!("no task given; pass one or more task1[:args] specs, or -l to list tasks");
        std::process::exit(2);
    }

    let config = match FleetConfig::load(opts.config_file_path.as_ref().map(std::path::Path::new)) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("error loading config: {}", err);
            std::process::exit(1);
        }
    };

    let mut env = build_env(&opts, &config);
    let selector = HostSelector::new()
        .hosts(opts.hosts.clone())
        .roles(opts.roles.clone())
        .exclude(opts.exclude_hosts.clone());

    let stop_flag = Arc::new(AtomicBool::new(false));
    install_sigint_handler(stop_flag.clone());

    let mut any_failed = false;
    for raw_spec in &opts.tasks {
        let spec = parse_task_spec(raw_spec);
        let entry = match registry.get(&spec.name) {
            Some(entry) => entry,
            None => {
                eprintln!("no such task `{}`", spec.name);
                std::process::exit(2);
            }
        };
        let task = entry.build(&spec.args);

        let summary = match fleet_exec::run_task(&task, &selector, &mut env, &stop_flag) {
            Ok(s) => s,
            Err(err) => {
                error!("task `{}` failed: {}", spec.name, err);
                std::process::exit(1);
            }
        };

        if !summary.all_succeeded() {
            any_failed = true;
            for outcome in summary.failures() {
                let line = format!(
                    "[{}] {} failed: {}",
                    outcome.host,
                    spec.name,
                    outcome.result.as_ref().unwrap_err()
                );
                eprintln!("{}", line.red());
            }
        }

        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
    }

    if any_failed {
        std::process::exit(1);
    }
}
