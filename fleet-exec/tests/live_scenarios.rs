//! Live-host scenarios. These need a real, reachable SSH server and are
//! `#[ignore]`d by default; run with `cargo test -- --ignored` against a
//! box named by `FLEET_TEST_HOST` (and optionally `FLEET_TEST_HOST2` for
//! the two-host scenarios), authenticated via `FLEET_TEST_USER`/
//! `FLEET_TEST_PASSWORD` or the running user's ssh-agent/default keys.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fleet_exec::env::Value;
use fleet_exec::{Env, HostSelector, Task, TaskContext};

fn test_env() -> Env {
    let mut env = Env::new();
    if let Ok(user) = std::env::var("FLEET_TEST_USER") {
        env.set("user", Value::Str(user));
    }
    if let Ok(pw) = std::env::var("FLEET_TEST_PASSWORD") {
        env.set("password", Value::Str(pw));
    }
    env
}

fn require_host(var: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| panic!("set {} to run live scenarios", var))
}

#[test]
#[ignore]
fn single_host_single_command_returns_exit_zero_and_stdout() {
    let host = require_host("FLEET_TEST_HOST");
    let mut env = test_env();
    let selector = HostSelector::new().hosts([host]);
    let stop = Arc::new(AtomicBool::new(false));

    let task = Task::new(
        "uname",
        Arc::new(|ctx: &mut TaskContext| {
            let result = ctx.run("uname -s")?;
            assert!(result.succeeded());
            assert_eq!(result.to_string(), "Linux");
            Ok(())
        }),
    );

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.all_succeeded());
}

#[test]
#[ignore]
fn two_hosts_serial_both_succeed() {
    let h1 = require_host("FLEET_TEST_HOST");
    let h2 = require_host("FLEET_TEST_HOST2");
    let mut env = test_env();
    let selector = HostSelector::new().hosts([h1, h2]);
    let stop = Arc::new(AtomicBool::new(false));

    let task = Task::new(
        "echo",
        Arc::new(|ctx: &mut TaskContext| {
            let result = ctx.run("echo hi")?;
            assert_eq!(result.to_string(), "hi");
            Ok(())
        }),
    );

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.all_succeeded());
}

#[test]
#[ignore]
fn two_hosts_parallel_both_succeed() {
    let h1 = require_host("FLEET_TEST_HOST");
    let h2 = require_host("FLEET_TEST_HOST2");
    let mut env = test_env();
    env.set("parallel", Value::Bool(true));
    let selector = HostSelector::new().hosts([h1, h2]);
    let stop = Arc::new(AtomicBool::new(false));

    let task = Task::new(
        "echo",
        Arc::new(|ctx: &mut TaskContext| {
            ctx.run("echo hi")?;
            Ok(())
        }),
    );

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.all_succeeded());
}

#[test]
#[ignore]
fn sudo_with_cached_password_strips_prompt_from_output() {
    let host = require_host("FLEET_TEST_HOST");
    let mut env = test_env();
    let selector = HostSelector::new().hosts([host]);
    let stop = Arc::new(AtomicBool::new(false));

    let task = Task::new(
        "whoami",
        Arc::new(|ctx: &mut TaskContext| {
            let result = ctx.sudo("whoami")?;
            assert_eq!(result.to_string(), "root");
            assert!(!result.stdout.contains("password"));
            Ok(())
        }),
    );

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.all_succeeded());
}

#[test]
#[ignore]
fn gateway_tunnels_through_bastion_to_target_host() {
    let bastion = require_host("FLEET_TEST_GATEWAY");
    let target = require_host("FLEET_TEST_HOST");
    let mut env = test_env();
    env.set("gateway", Value::Str(bastion));
    let selector = HostSelector::new().hosts([target]);
    let stop = Arc::new(AtomicBool::new(false));

    let task = Task::new(
        "uptime",
        Arc::new(|ctx: &mut TaskContext| {
            let result = ctx.run("uptime")?;
            assert!(result.succeeded());
            Ok(())
        }),
    );

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.all_succeeded());
}
