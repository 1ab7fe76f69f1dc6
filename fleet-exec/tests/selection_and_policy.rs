//! Exercises host-list resolution and failure-policy composition end to
//! end through `run_task`, without touching the network: each task body
//! here just records which host it ran on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fleet_exec::env::{RoleValue, Value};
use fleet_exec::{Env, FleetError, HostSelector, Task, TaskContext};

fn recording_task(seen: Arc<Mutex<Vec<String>>>) -> Task {
    Task::new(
        "record",
        Arc::new(move |ctx: &mut TaskContext| {
            if let Some(hs) = ctx.host {
                seen.lock().unwrap().push(hs.host.clone());
            }
            Ok(())
        }),
    )
}

#[test]
fn role_expansion_with_exclude_resolves_expected_hosts() {
    let mut env = Env::new();
    env.set_roledef("web", RoleValue::List(vec!["h1".into(), "h2".into()]));
    env.set_roledef("db", RoleValue::List(vec!["h3".into()]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let task = recording_task(seen.clone());
    let selector = HostSelector::new().roles(["web", "db"]).exclude(["h2"]);
    let stop = Arc::new(AtomicBool::new(false));

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.all_succeeded());
    assert_eq!(*seen.lock().unwrap(), vec!["h1", "h3"]);
}

#[test]
fn warn_only_continues_past_a_failing_host_and_records_the_rest() {
    let mut env = Env::new();
    env.set("warn_only", Value::Bool(true));

    let task = Task::new(
        "maybe-fail",
        Arc::new(|ctx: &mut TaskContext| {
            let host = ctx.host.map(|h| h.host.clone()).unwrap_or_default();
            if host == "h2" {
                Err(FleetError::CommandFailed {
                    host: "h2".into(),
                    command: "false".into(),
                    code: 1,
                })
            } else {
                Ok(())
            }
        }),
    );
    let selector = HostSelector::new().hosts(["h1", "h2", "h3"]);
    let stop = Arc::new(AtomicBool::new(false));

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(!summary.aborted);
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(summary.failures().count(), 1);
}

#[test]
fn without_warn_only_a_failure_aborts_the_serial_run() {
    let mut env = Env::new();

    let task = Task::new(
        "maybe-fail",
        Arc::new(|ctx: &mut TaskContext| {
            let host = ctx.host.map(|h| h.host.clone()).unwrap_or_default();
            if host == "h1" {
                Err(FleetError::CommandFailed {
                    host: "h1".into(),
                    command: "false".into(),
                    code: 1,
                })
            } else {
                Ok(())
            }
        }),
    );
    let selector = HostSelector::new().hosts(["h1", "h2", "h3"]);
    let stop = Arc::new(AtomicBool::new(false));

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.outcomes.len(), 1, "h2/h3 never run once h1 aborts serially");
}

#[test]
fn parallel_run_visits_every_host_despite_unordered_completion() {
    let mut env = Env::new();
    env.set("parallel", Value::Bool(true));
    env.set("pool_size", Value::UInt(4));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let task = recording_task(seen.clone());
    let selector = HostSelector::new().hosts(["h1", "h2", "h3", "h4"]);
    let stop = Arc::new(AtomicBool::new(false));

    let summary = fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(summary.all_succeeded());
    let mut hosts = seen.lock().unwrap().clone();
    hosts.sort();
    assert_eq!(hosts, vec!["h1", "h2", "h3", "h4"]);
}

#[test]
fn empty_selection_runs_the_task_once_without_a_host() {
    let mut env = Env::new();
    let ran = Arc::new(Mutex::new(false));
    let ran2 = ran.clone();
    let task = Task::new(
        "local-only",
        Arc::new(move |ctx: &mut TaskContext| {
            assert!(ctx.host.is_none());
            *ran2.lock().unwrap() = true;
            Ok(())
        }),
    );
    let selector = HostSelector::new();
    let stop = Arc::new(AtomicBool::new(false));

    fleet_exec::run_task(&task, &selector, &mut env, &stop).unwrap();
    assert!(*ran.lock().unwrap());
}
