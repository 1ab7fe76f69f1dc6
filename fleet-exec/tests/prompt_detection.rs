//! Drives a real PTY with `rexpect` to confirm `LineSplitter`/
//! `PromptPatterns` recognize an interactive password prompt exactly the
//! way a genuine terminal emits one (no trailing newline before the `: `),
//! independent of any SSH transport, since `ssh2` itself can't be
//! exercised without a live server.

use fleet_exec::channel::{LineSplitter, PromptPatterns};
use fleet_exec::Env;

#[test]
fn recognizes_a_real_pty_password_prompt() {
    let mut session = rexpect::spawn("sh -c 'printf \"Password: \"'", Some(2_000))
        .expect("failed to spawn local pty");

    let mut splitter = LineSplitter::new();
    let env = Env::new();
    let patterns = PromptPatterns::compile(&env, &[]);

    let chunk = session.exp_eof().unwrap_or_default();
    splitter.feed(chunk.as_bytes());

    assert!(patterns.matches_pending(&splitter));
}

#[test]
fn non_prompt_output_does_not_match() {
    let mut session = rexpect::spawn("sh -c 'echo just some output'", Some(2_000))
        .expect("failed to spawn local pty");
    let output = session.exp_eof().unwrap_or_default();

    let mut splitter = LineSplitter::new();
    let env = Env::new();
    let patterns = PromptPatterns::compile(&env, &[]);
    splitter.feed(output.as_bytes());

    assert!(!patterns.matches_pending(&splitter));
}
