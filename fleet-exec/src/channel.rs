//! The interactive command/sudo execution protocol over a PTY channel.
//! This is the heart of the engine.
//!
//! `ssh2::Channel` is not safely shareable across threads once a PTY is
//! attached, and `ssh2::Session` is blocking-by-default with exactly one
//! underlying socket, so stdout/stderr/prompt-detection — conceptually
//! three cooperating readers — are realized here as one single-threaded,
//! non-blocking poll loop per host-worker rather than three OS threads. Line splitting (on
//! `\n` *or* a bare `\r`) is grounded directly on
//! `op-exec/src/utils.rs::read_until_internal`, which treats the two as
//! equivalent terminators for exactly the same reason: recognizing an
//! interactive prompt that never sends a trailing newline.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::env::Env;
use crate::error::{FleetError, FleetResult};
use crate::host_string::HostString;
use crate::multiplex::{self, Stream};

/// Accumulates bytes and yields completed lines, splitting on `\n` or a
/// bare `\r` (no pending `\n`), so a prompt with no trailing newline still
/// gets recognized.
#[derive(Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> LineSplitter {
        LineSplitter::default()
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n' || b == b'\r');
            let pos = match pos {
                Some(p) => p,
                None => break,
            };
            let delim = self.buf[pos];
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            if delim == b'\r' && self.buf.first() == Some(&b'\n') {
                self.buf.remove(0);
            }
            lines.push(line);
        }
        lines
    }

    /// The not-yet-delimited tail, checked against prompt patterns.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    /// Drops the pending tail, e.g. once it has been recognized as a prompt
    /// and answered, so the echoed `[sudo] password for ...:` line never
    /// shows up in captured output.
    pub fn clear_pending(&mut self) {
        self.buf.clear();
    }
}

/// Captured outcome of one remote (or local) operation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    pub command: String,
    pub real_command: String,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }
}

impl std::ops::Deref for ExecutionResult {
    type Target = str;
    fn deref(&self) -> &str {
        self.stdout.trim_end_matches('\n')
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stdout.trim_end_matches('\n'))
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pty: bool,
    pub combine_stderr: bool,
    pub command_timeout: Duration,
    pub is_sudo: bool,
    pub quiet: bool,
}

/// Compiled prompt-matching configuration, sourced from `Env`/`FleetConfig`
/// rather than hard-coded, so deployments with unusual sudo prompts or
/// custom confirmation text can still be recognized.
pub struct PromptPatterns {
    pub sudo_prompt: Regex,
    pub generic: Vec<Regex>,
}

impl PromptPatterns {
    pub fn compile(env: &Env, extra: &[String]) -> PromptPatterns {
        let sudo_literal = env.sudo_prompt();
        let sudo_pattern = regex::escape(sudo_literal.trim_end()).replace("%\\(user\\)s", ".*");
        let sudo_prompt =
            Regex::new(&format!("(?m){}\\s*$", sudo_pattern)).unwrap_or_else(|_| {
                Regex::new(r"(?i)\[sudo\] password for .*:\s*$").unwrap()
            });
        let mut generic = vec![Regex::new(r"(?i)password:\s*$").unwrap()];
        for pattern in extra {
            if let Ok(re) = Regex::new(pattern) {
                generic.push(re);
            }
        }
        PromptPatterns { sudo_prompt, generic }
    }

    fn matches(&self, pending: &str) -> bool {
        self.sudo_prompt.is_match(pending) || self.generic.iter().any(|re| re.is_match(pending))
    }

    /// Checks a [`LineSplitter`]'s not-yet-delimited tail against these
    /// patterns; exposed for tests that drive a real PTY instead of the
    /// full channel poll loop.
    pub fn matches_pending(&self, splitter: &LineSplitter) -> bool {
        self.matches(&splitter.pending())
    }
}

const EAGAIN: isize = -37;

fn retry_would_block<T>(mut f: impl FnMut() -> Result<T, ssh2::Error>) -> FleetResult<T> {
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.code() == ssh2::ErrorCode::Session(EAGAIN as i32) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(FleetError::Ssh(e)),
        }
    }
}

fn is_would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// Drives the PTY dialogue for one command invocation and returns its
/// captured result. `password_resolver` supplies a password when a prompt
/// is recognized: it alone decides whether that means a cached answer, a
/// one-time interactive prompt, or giving up, and returning `None` always
/// aborts the command with `PromptAborted` (the actual password cache
/// lives in `operations.rs`, which owns `Env`).
pub fn run_channel(
    session: &ssh2::Session,
    host: &HostString,
    env: &Env,
    command: &str,
    real_command: &str,
    opts: &RunOptions,
    patterns: &PromptPatterns,
    password_resolver: impl FnMut() -> Option<String>,
    stop_flag: &Arc<AtomicBool>,
    remote_interrupt: bool,
) -> FleetResult<ExecutionResult> {
    session.set_blocking(false);
    let result = run_channel_inner(
        session,
        host,
        env,
        command,
        real_command,
        opts,
        patterns,
        password_resolver,
        stop_flag,
        remote_interrupt,
    );
    // Every exit path below (success, timeout, abort, prompt-abort) must
    // leave the session blocking again: it is cached and reused for the
    // next operation against this host, which assumes blocking reads.
    session.set_blocking(true);
    result
}

fn run_channel_inner(
    session: &ssh2::Session,
    host: &HostString,
    env: &Env,
    command: &str,
    real_command: &str,
    opts: &RunOptions,
    patterns: &PromptPatterns,
    mut password_resolver: impl FnMut() -> Option<String>,
    stop_flag: &Arc<AtomicBool>,
    remote_interrupt: bool,
) -> FleetResult<ExecutionResult> {
    let mut channel = retry_would_block(|| session.channel_session())?;

    if opts.pty {
        retry_would_block(|| channel.request_pty("xterm", None, None))?;
    }
    retry_would_block(|| channel.exec(real_command))?;

    let mut out_splitter = LineSplitter::new();
    let mut err_splitter = LineSplitter::new();
    let mut captured_stdout = String::new();
    let mut captured_stderr = String::new();
    let mut answered_prompt = false;

    let start = Instant::now();
    let mut buf = [0u8; 4096];

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            if remote_interrupt {
                let _ = channel.write_all(b"\x03");
            } else {
                let _ = channel.close();
            }
            return Err(FleetError::UserAbort);
        }

        if !opts.command_timeout.is_zero() && start.elapsed() > opts.command_timeout {
            let _ = channel.close();
            return Err(FleetError::CommandTimeout {
                host: host.to_canonical(),
                timeout: opts.command_timeout,
            });
        }

        let mut made_progress = false;

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                made_progress = true;
                for line in out_splitter.feed(&buf[..n]) {
                    if !opts.quiet {
                        multiplex::emit_line(env, Stream::Out, &host.to_canonical(), &line);
                    }
                    captured_stdout.push_str(&line);
                    captured_stdout.push('\n');
                }
            }
            Err(e) if is_would_block(&e) => {}
            Err(e) => return Err(FleetError::Io(e)),
        }

        if !opts.combine_stderr {
            match channel.stderr().read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    made_progress = true;
                    for line in err_splitter.feed(&buf[..n]) {
                        if !opts.quiet {
                            multiplex::emit_line(env, Stream::Err, &host.to_canonical(), &line);
                        }
                        captured_stderr.push_str(&line);
                        captured_stderr.push('\n');
                    }
                }
                Err(e) if is_would_block(&e) => {}
                Err(e) => return Err(FleetError::Io(e)),
            }
        }

        if !answered_prompt {
            let pending = out_splitter.pending();
            if !pending.is_empty() && patterns.matches(&pending) {
                match password_resolver() {
                    Some(password) => {
                        let mut line = password;
                        line.push('\n');
                        if channel.write_all(line.as_bytes()).is_ok() {
                            let _ = channel.flush();
                        }
                        out_splitter.clear_pending();
                        answered_prompt = true;
                        made_progress = true;
                    }
                    None => {
                        // The resolver already tried everything it is
                        // willing to (cached password, one-time interactive
                        // prompt); giving up here rather than polling keeps
                        // an unanswerable prompt from hanging forever when
                        // `command_timeout` is 0.
                        let _ = channel.close();
                        return Err(FleetError::PromptAborted {
                            host: host.to_canonical(),
                            reason: pending.trim().to_string(),
                        });
                    }
                }
            }
        }

        if channel.eof() {
            break;
        }

        if !made_progress {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    let _ = channel.send_eof();
    retry_would_block(|| channel.wait_eof())?;
    retry_would_block(|| channel.close())?;
    retry_would_block(|| channel.wait_close())?;
    let return_code = retry_would_block(|| channel.exit_status().map(|c| c as i64))? as i32;

    Ok(ExecutionResult {
        stdout: captured_stdout,
        stderr: captured_stderr,
        return_code,
        command: command.to_string(),
        real_command: real_command.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_newline() {
        let mut s = LineSplitter::new();
        let lines = s.feed(b"hello\nworld\n");
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(s.pending(), "");
    }

    #[test]
    fn splits_on_bare_carriage_return_without_newline() {
        let mut s = LineSplitter::new();
        let lines = s.feed(b"Password: ");
        assert!(lines.is_empty());
        assert_eq!(s.pending(), "Password: ");
    }

    #[test]
    fn collapses_crlf_into_one_line() {
        let mut s = LineSplitter::new();
        let lines = s.feed(b"hello\r\nworld\r\n");
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[test]
    fn clear_pending_drops_unanswered_prompt_text() {
        let mut s = LineSplitter::new();
        s.feed(b"[sudo] password for bob: ");
        assert!(!s.pending().is_empty());
        s.clear_pending();
        assert_eq!(s.pending(), "");
    }

    #[test]
    fn prompt_patterns_match_generic_password_prompt() {
        let mut env = Env::new();
        env.set(
            "sudo_prompt",
            crate::env::Value::Str("[sudo] password for %(user)s: ".into()),
        );
        let patterns = PromptPatterns::compile(&env, &[]);
        assert!(patterns.matches("Password: "));
        assert!(patterns.matches("[sudo] password for bob: "));
        assert!(!patterns.matches("Linux 5.15.0"));
    }
}
