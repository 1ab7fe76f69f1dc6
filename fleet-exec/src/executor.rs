//! Task executor: dispatches a [`Task`] across the hosts a [`HostSelector`]
//! resolves to, either serially or through a bounded worker pool, applying
//! the failure policy per host as results come in.
//!
//! The worker pool is grounded directly on
//! `op-exec/src/core/scheduler.rs`'s `Scheduler`/`Worker` pair
//! (`Mutex<VecDeque<_>>` + `Condvar` + `AtomicBool` stop flag, fixed join
//! handles), generalized from a boolean `Task::execute` to one that returns
//! a `FleetResult` per host and reports it back via `crossbeam-channel`
//! rather than fire-and-forget closures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{info, warn};

use crate::connection::ConnectionCache;
use crate::env::Env;
use crate::error::{FleetError, FleetResult};
use crate::failure::{self, Disposition};
use crate::host_string::HostString;
use crate::multiplex::{self, Stream};
use crate::resolver::{self, HostSelector};
use crate::task::{Task, TaskContext};

/// One host's outcome from a task run.
pub struct HostOutcome {
    pub host: HostString,
    pub result: FleetResult<()>,
}

/// Summary of one [`run_task`] invocation.
pub struct TaskRunSummary {
    pub outcomes: Vec<HostOutcome>,
    pub aborted: bool,
}

impl TaskRunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &HostOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.aborted && self.failures().next().is_none()
    }
}

/// Runs `task` against every host `selector` resolves to (or once,
/// host-less, if the selection is empty — the local-only case), serially
/// or in a bounded pool per `env.parallel()`/`env.pool_size()`.
pub fn run_task(
    task: &Task,
    selector: &HostSelector,
    env: &mut Env,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<TaskRunSummary> {
    let hosts = resolver::resolve(selector, env)?;

    if hosts.is_empty() {
        let mut cache = ConnectionCache::new();
        let outcome = run_one(task, env, &mut cache, None, stop_flag);
        let aborted = matches!(&outcome.result, Err(e) if e.kind() == crate::error::ErrorKind::UserAbort);
        return Ok(TaskRunSummary {
            outcomes: vec![outcome],
            aborted,
        });
    }

    if env.parallel() {
        run_parallel(task, hosts, env, stop_flag)
    } else {
        run_serial(task, hosts, env, stop_flag)
    }
}

fn run_one(
    task: &Task,
    env: &mut Env,
    cache: &mut ConnectionCache,
    host: Option<&HostString>,
    stop_flag: &Arc<AtomicBool>,
) -> HostOutcome {
    let label = host.map(HostString::to_canonical).unwrap_or_else(|| "localhost".into());
    multiplex::emit_note(env, Stream::Running, &format!("[{}] running \"{}\"", label, task.name));

    let mut scope = env.settings();
    if let Some(hs) = host {
        scope.set_host_string(hs.to_canonical());
    }

    let result = {
        let mut ctx = TaskContext {
            env: &mut *scope,
            cache,
            host,
            stop_flag,
        };
        (task.body)(&mut ctx)
    };

    HostOutcome {
        host: host.cloned().unwrap_or_else(|| HostString::new("", "localhost", 0)),
        result,
    }
}

fn run_serial(
    task: &Task,
    hosts: Vec<HostString>,
    env: &mut Env,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<TaskRunSummary> {
    let mut cache = ConnectionCache::new();
    let mut outcomes = Vec::with_capacity(hosts.len());
    let mut aborted = false;

    for hs in hosts {
        if stop_flag.load(Ordering::SeqCst) {
            aborted = true;
            break;
        }
        let outcome = run_one(task, env, &mut cache, Some(&hs), stop_flag);
        if let Err(err) = &outcome.result {
            match failure::resolve(env, err) {
                Disposition::Continue => {}
                Disposition::Abort => {
                    outcomes.push(outcome);
                    aborted = true;
                    break;
                }
            }
        }
        outcomes.push(outcome);
    }

    Ok(TaskRunSummary { outcomes, aborted })
}

type WorkItem = HostString;

struct JobQueue {
    items: Mutex<VecDeque<WorkItem>>,
    cvar: Condvar,
    stop: AtomicBool,
}

/// Bounded worker pool: `env.pool_size()` threads, each with its own `Env`
/// overlay clone and `ConnectionCache`, pulling hosts off a shared queue.
/// Any worker observing the abort flag (set after a host's outcome
/// resolves to `Disposition::Abort`) stops picking up new work; in-flight
/// commands finish or hit their own timeout/interrupt path.
fn run_parallel(
    task: &Task,
    hosts: Vec<HostString>,
    env: &Env,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<TaskRunSummary> {
    let pool_size = env.pool_size().max(1).min(hosts.len().max(1));
    info!(pool_size, hosts = hosts.len(), "dispatching task across pool");

    let queue = Arc::new(JobQueue {
        items: Mutex::new(hosts.into_iter().collect()),
        cvar: Condvar::new(),
        stop: AtomicBool::new(false),
    });

    let (result_tx, result_rx) = crossbeam_channel::unbounded::<HostOutcome>();
    let abort_flag = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(pool_size);
    for worker_id in 0..pool_size {
        let queue = queue.clone();
        let result_tx = result_tx.clone();
        let stop_flag = stop_flag.clone();
        let abort_flag = abort_flag.clone();
        let mut worker_env = env.clone();
        let task = task.clone();

        let handle = std::thread::Builder::new()
            .name(format!("fleet-worker-{}", worker_id))
            .spawn(move || {
                let mut cache = ConnectionCache::new();
                loop {
                    if stop_flag.load(Ordering::SeqCst) || abort_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = {
                        let mut guard = queue.items.lock().unwrap_or_else(|e| e.into_inner());
                        loop {
                            if let Some(item) = guard.pop_front() {
                                break Some(item);
                            }
                            if queue.stop.load(Ordering::SeqCst) {
                                break None;
                            }
                            let (g, timeout) = queue
                                .cvar
                                .wait_timeout(guard, std::time::Duration::from_millis(50))
                                .unwrap_or_else(|e| e.into_inner());
                            guard = g;
                            if timeout.timed_out() && guard.is_empty() {
                                break None;
                            }
                        }
                    };
                    let hs = match next {
                        Some(hs) => hs,
                        None => break,
                    };

                    let outcome = run_one(&task, &mut worker_env, &mut cache, Some(&hs), &stop_flag);
                    if let Err(err) = &outcome.result {
                        if failure::resolve(&worker_env, err) == Disposition::Abort {
                            abort_flag.store(true, Ordering::SeqCst);
                            queue.stop.store(true, Ordering::SeqCst);
                            queue.cvar.notify_all();
                        }
                    }
                    let _ = result_tx.send(outcome);
                }
            })
            .expect("spawning a fleet worker thread should not fail");
        handles.push(handle);
    }
    drop(result_tx);

    let mut outcomes = Vec::new();
    while let Ok(outcome) = result_rx.recv() {
        outcomes.push(outcome);
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("a fleet worker thread panicked");
        }
    }

    let aborted = abort_flag.load(Ordering::SeqCst) || stop_flag.load(Ordering::SeqCst);
    Ok(TaskRunSummary { outcomes, aborted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Value;
    use std::sync::atomic::AtomicUsize;

    fn noop_task(counter: Arc<AtomicUsize>) -> Task {
        Task::new(
            "count",
            Arc::new(move |_ctx: &mut TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[test]
    fn serial_run_visits_every_host_in_order() {
        let mut env = Env::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let task = noop_task(counter.clone());
        let selector = HostSelector::new().hosts(["a", "b", "c"]);
        let stop = Arc::new(AtomicBool::new(false));

        let summary = run_task(&task, &selector, &mut env, &stop).unwrap();
        assert_eq!(summary.outcomes.len(), 3);
        assert!(summary.all_succeeded());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_selection_runs_once_host_less() {
        let mut env = Env::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let task = noop_task(counter.clone());
        let selector = HostSelector::new();
        let stop = Arc::new(AtomicBool::new(false));

        let summary = run_task(&task, &selector, &mut env, &stop).unwrap();
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serial_warn_only_continues_past_failing_host() {
        let mut env = Env::new();
        env.set("warn_only", Value::Bool(true));
        let task = Task::new(
            "maybe-fail",
            Arc::new(|ctx: &mut TaskContext| {
                if ctx.host.map(|h| h.host.as_str()) == Some("bad") {
                    Err(crate::error::FleetError::CommandFailed {
                        host: "bad".into(),
                        command: "false".into(),
                        code: 1,
                    })
                } else {
                    Ok(())
                }
            }),
        );
        let selector = HostSelector::new().hosts(["good", "bad", "good2"]);
        let stop = Arc::new(AtomicBool::new(false));

        let summary = run_task(&task, &selector, &mut env, &stop).unwrap();
        assert_eq!(summary.outcomes.len(), 3);
        assert!(!summary.aborted);
        assert_eq!(summary.failures().count(), 1);
    }
}
