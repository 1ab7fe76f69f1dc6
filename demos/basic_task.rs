//! Sample task authored against `fleet_exec::TaskContext` directly,
//! standing in for the user-script/task-loader layer this crate
//! deliberately leaves to its caller. A real task loader would parse a
//! file like this one's `deploy` function out of a dynamically loaded
//! module; here it is just compiled in as a `[[example]]` to demonstrate
//! the seam `task.rs`/`executor.rs` expose.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fleet_exec::env::Value;
use fleet_exec::{Env, HostSelector, Task, TaskContext};

fn deploy(ctx: &mut TaskContext) -> fleet_exec::FleetResult<()> {
    ctx.run("uptime")?;
    ctx.put("./target/release/app", "/opt/app/bin/app")?;
    ctx.sudo("systemctl restart app")?;
    Ok(())
}

fn main() {
    let mut env = Env::new();
    env.set("warn_only", Value::Bool(true));

    let selector = HostSelector::new().hosts(["web1.example.com", "web2.example.com"]);
    let task = Task::new("deploy", Arc::new(deploy));
    let stop_flag = Arc::new(AtomicBool::new(false));

    match fleet_exec::run_task(&task, &selector, &mut env, &stop_flag) {
        Ok(summary) => {
            for outcome in &summary.outcomes {
                match &outcome.result {
                    Ok(()) => println!("[{}] ok", outcome.host),
                    Err(err) => println!("[{}] failed: {}", outcome.host, err),
                }
            }
        }
        Err(err) => eprintln!("deploy aborted: {}", err),
    }
}
