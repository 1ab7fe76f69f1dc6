//! The five primitive operations: `run`, `sudo`, `local`,
//! `put`, `get`, plus `prompt`. Each builds on [`crate::connection`] and
//! [`crate::channel`]; `local` builds on `shared_child` instead, since it
//! never touches SSH at all.
//!
//! `run`/`sudo` command construction is grounded on
//! `op-exec/src/exec/command/mod.rs`'s `CommandBuilder` (shell-wrap, cd,
//! run-as prefixing); `put`/`get` are grounded on `ssh2`'s own SCP helpers,
//! the same transport the wider example pack uses for ssh2-based file
//! transfer.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::channel::{run_channel, ExecutionResult, PromptPatterns, RunOptions};
use crate::connection::{Connection, ConnectionCache};
use crate::env::Env;
use crate::error::{FleetError, FleetResult};
use crate::host_string::HostString;
use crate::multiplex::{self, Stream};

/// Wraps `command` through the configured shell, optionally `cd`-ing first,
/// the way `op-exec`'s `CommandBuilder` does.
fn build_shell_command(env: &Env, command: &str, cwd: Option<&str>) -> String {
    let shell = env.shell();
    let body = match cwd {
        Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
        None => command.to_string(),
    };
    format!("{} {}", shell, shell_quote(&body))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn password_for(env: &mut Env, hs: &HostString, is_sudo: bool) -> Option<String> {
    if let Some(pw) = env.passwords().get(&hs.to_canonical()).cloned() {
        return Some(pw);
    }
    if !is_sudo {
        return env.password();
    }
    if !env.use_sudo_password() {
        return None;
    }
    env.password()
}

/// Reads a password from the terminal with echo disabled, serialized
/// against the output lock so it can't land mid-line with other workers'
/// output. Returns `None` if there is no terminal to read from (e.g. a
/// non-interactive run), which callers treat the same as an aborted prompt.
fn prompt_password_interactive(message: &str) -> Option<String> {
    let _guard = multiplex::hold();
    rpassword::prompt_password(message).ok()
}

/// Builds the `password_resolver` closure `run_channel` calls when it sees
/// a prompt: a cached password is returned once; with none cached, a
/// one-time interactive prompt is made unless `abort_on_prompts` is set.
/// Either way the resolver never asks twice for the same command, and the
/// interactively-entered password (if any) is written into `interactive`
/// so the caller can fold it into `Env`'s password cache once `run_channel`
/// returns.
fn password_resolver(
    cached: Option<String>,
    abort_on_prompts: bool,
    prompt_message: String,
    interactive: Rc<RefCell<Option<String>>>,
) -> impl FnMut() -> Option<String> {
    let mut attempted = false;
    move || {
        if attempted {
            return None;
        }
        attempted = true;
        if let Some(pw) = &cached {
            return Some(pw.clone());
        }
        if abort_on_prompts {
            return None;
        }
        let pw = prompt_password_interactive(&prompt_message)?;
        *interactive.borrow_mut() = Some(pw.clone());
        Some(pw)
    }
}

fn command_result_to_error(host: &HostString, result: &ExecutionResult) -> Option<FleetError> {
    if result.failed() {
        Some(FleetError::CommandFailed {
            host: host.to_canonical(),
            command: result.command.clone(),
            code: result.return_code,
        })
    } else {
        None
    }
}

/// Runs `command` on `host` as the connected user.
pub fn run(
    env: &mut Env,
    cache: &mut ConnectionCache,
    host: &HostString,
    command: &str,
    cwd: Option<&str>,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<ExecutionResult> {
    let real_command = build_shell_command(env, command, cwd);
    info!(host = %host.to_canonical(), command, "run");

    let conn = cache.get_or_connect(host, env)?;
    let patterns = PromptPatterns::compile(env, &[]);
    let opts = RunOptions {
        pty: env.always_use_pty(),
        combine_stderr: env.combine_stderr(),
        command_timeout: Duration::from_secs(env.command_timeout()),
        is_sudo: false,
        quiet: false,
    };

    let password = password_for(env, host, false);
    let host_key = host.to_canonical();
    let interactive = Rc::new(RefCell::new(None::<String>));
    let resolver = password_resolver(
        password,
        env.abort_on_prompts(),
        format!("[{}] password: ", host_key),
        Rc::clone(&interactive),
    );
    let result = run_channel(
        &conn.session,
        host,
        env,
        command,
        &real_command,
        &opts,
        &patterns,
        resolver,
        stop_flag,
        env.remote_interrupt(),
    )?;

    if let Some(pw) = interactive.borrow_mut().take() {
        env.set_password_for(&host_key, pw);
    }

    if let Some(err) = command_result_to_error(host, &result) {
        return Err(err);
    }
    Ok(result)
}

/// Runs `command` on `host` through `sudo -S -p <prompt>`, answering the
/// password prompt from the sudo password cache.
pub fn sudo(
    env: &mut Env,
    cache: &mut ConnectionCache,
    host: &HostString,
    command: &str,
    cwd: Option<&str>,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<ExecutionResult> {
    let sudo_prompt = env.sudo_prompt();
    let mut prefix = format!("sudo -S -p '{}'", sudo_prompt.replace('\'', "'\\''"));
    if let Some(group) = env.sudo_group() {
        prefix.push_str(&format!(" -g {}", group));
    }
    if let Some(user) = env.sudo_user() {
        prefix.push_str(&format!(" -u {}", user));
    }
    let inner = format!("{} {}", prefix, command);
    let real_command = build_shell_command(env, &inner, cwd);
    info!(host = %host.to_canonical(), command, "sudo");

    let conn = cache.get_or_connect(host, env)?;
    let patterns = PromptPatterns::compile(env, &[]);
    let opts = RunOptions {
        pty: true,
        combine_stderr: env.combine_stderr(),
        command_timeout: Duration::from_secs(env.command_timeout()),
        is_sudo: true,
        quiet: false,
    };

    let password = password_for(env, host, true);
    let host_key = host.to_canonical();
    let interactive = Rc::new(RefCell::new(None::<String>));
    let resolver = password_resolver(
        password,
        env.abort_on_prompts(),
        format!("[{}] sudo password: ", host_key),
        Rc::clone(&interactive),
    );
    let result = run_channel(
        &conn.session,
        host,
        env,
        command,
        &real_command,
        &opts,
        &patterns,
        resolver,
        stop_flag,
        env.remote_interrupt(),
    )?;

    if let Some(pw) = interactive.borrow_mut().take() {
        env.set_password_for(&host_key, pw);
    }

    if let Some(err) = command_result_to_error(host, &result) {
        return Err(err);
    }
    Ok(result)
}

/// Runs `command` on the machine running the task itself, killable via
/// `stop_flag` the same way a remote command is interruptible.
///
/// Piping stdout/stderr through `os_pipe` into a background reader thread
/// rather than relying on `Stdio::piped()` + `SharedChild`'s own fields is
/// grounded on `op-exec2/src/command/local/mod.rs::spawn_local_command`,
/// since `shared_child::SharedChild` does not itself expose the child's
/// stdout/stderr handles the way `std::process::Child` does.
pub fn local(
    env: &Env,
    command: &str,
    cwd: Option<&str>,
    stop_flag: &Arc<AtomicBool>,
) -> FleetResult<ExecutionResult> {
    let real_command = build_shell_command(env, command, cwd);
    info!(command, "local");

    let mut parts = env.shell().split_whitespace().map(String::from).collect::<Vec<_>>();
    let program = parts.remove(0);
    let mut cmd = std::process::Command::new(program);
    cmd.args(parts);
    cmd.arg(command);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let (mut out_reader, out_writer) = os_pipe::pipe()?;
    let (mut err_reader, err_writer) = os_pipe::pipe()?;
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(out_writer);
    cmd.stderr(err_writer);

    let child = shared_child::SharedChild::spawn(&mut cmd)?;
    drop(cmd);

    let out_handle = std::thread::spawn(move || {
        let mut buf = String::new();
        out_reader.read_to_string(&mut buf).ok();
        buf
    });
    let err_handle = std::thread::spawn(move || {
        let mut buf = String::new();
        err_reader.read_to_string(&mut buf).ok();
        buf
    });

    loop {
        if stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
            let _ = child.kill();
            break;
        }
        if let Some(_status) = child.try_wait()? {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let status = child.wait()?;

    let stdout_buf = out_handle.join().unwrap_or_default();
    let stderr_buf = err_handle.join().unwrap_or_default();

    for line in stdout_buf.lines() {
        multiplex::emit_line(env, Stream::Out, "localhost", line);
    }
    for line in stderr_buf.lines() {
        multiplex::emit_line(env, Stream::Err, "localhost", line);
    }

    if stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
        return Err(FleetError::UserAbort);
    }

    let result = ExecutionResult {
        stdout: stdout_buf,
        stderr: stderr_buf,
        return_code: status.code().unwrap_or(-1),
        command: command.to_string(),
        real_command,
    };
    if result.failed() {
        return Err(FleetError::CommandFailed {
            host: "localhost".to_string(),
            command: result.command,
            code: result.return_code,
        });
    }
    Ok(result)
}

/// Per-file outcome of a `put`/`get` batch: which files made it across and
/// which didn't. A `warn_only` env keeps going after a per-file failure;
/// otherwise the first one aborts the whole transfer for this host.
#[derive(Debug, Clone, Default)]
pub struct TransferOutcome {
    pub transferred: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Extra `put`/`get` behavior beyond the basic local/remote path pair,
/// mirroring the way `RunOptions` carries `run`/`sudo`'s extra knobs.
/// `temp_dir` empty means "pick a sensible default" (`/tmp`), not "none".
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub use_sudo: bool,
    pub mirror_local_mode: bool,
    pub mode: Option<u32>,
    pub temp_dir: String,
}

impl TransferOptions {
    fn temp_dir(&self) -> &str {
        if self.temp_dir.is_empty() {
            "/tmp"
        } else {
            self.temp_dir.trim_end_matches('/')
        }
    }
}

/// Uploads local file(s) matching `local_glob` to `remote_path` on `host`,
/// expanding globs with the `glob` crate the way a local-only upload helper
/// would. A leading `~` in `remote_path` is resolved against the remote
/// user's home directory; intermediate remote directories are created as
/// needed. With `opts.use_sudo`, each file is uploaded to `opts.temp_dir`
/// first and moved into place with `sudo mv`, since an unprivileged upload
/// can't write directly to a root-owned destination.
pub fn put(
    env: &mut Env,
    cache: &mut ConnectionCache,
    host: &HostString,
    local_glob: &str,
    remote_path: &str,
    opts: &TransferOptions,
) -> FleetResult<TransferOutcome> {
    let matches: Vec<_> = glob::glob(local_glob)
        .map_err(|e| FleetError::TransferFailed {
            host: host.to_canonical(),
            reason: format!("bad glob `{}`: {}", local_glob, e),
        })?
        .filter_map(Result::ok)
        .collect();

    if matches.is_empty() {
        return Err(FleetError::TransferFailed {
            host: host.to_canonical(),
            reason: format!("no local files match `{}`", local_glob),
        });
    }

    let sudo_password = if opts.use_sudo { password_for(env, host, true) } else { None };
    let conn = cache.get_or_connect(host, env)?;
    let remote_path = resolve_remote_path(conn, remote_path).map_err(|e| FleetError::TransferFailed {
        host: host.to_canonical(),
        reason: e,
    })?;
    let warn_only = env.warn_only();
    let mut outcome = TransferOutcome::default();

    for local_path in &matches {
        let dest = if matches_is_directory_target(&remote_path) || matches.len() > 1 {
            format!(
                "{}/{}",
                remote_path.trim_end_matches('/'),
                local_path.file_name().unwrap().to_string_lossy()
            )
        } else {
            remote_path.clone()
        };

        match upload_with_options(conn, local_path, &dest, opts, sudo_password.as_deref()) {
            Ok(()) => outcome.transferred.push(dest),
            Err(reason) if warn_only => outcome.failed.push((dest, reason)),
            Err(reason) => {
                return Err(FleetError::TransferFailed {
                    host: host.to_canonical(),
                    reason,
                })
            }
        }
    }

    Ok(outcome)
}

/// Resolves a leading `~` (bare or `~/...`) against the remote home
/// directory; any other path is returned unchanged.
fn resolve_remote_path(conn: &mut Connection, path: &str) -> Result<String, String> {
    if path == "~" {
        return conn.remote_home().map(str::to_string).map_err(|e| e.to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = conn.remote_home().map_err(|e| e.to_string())?;
        return Ok(format!("{}/{}", home.trim_end_matches('/'), rest));
    }
    Ok(path.to_string())
}

fn parent_dir(path: &str) -> Option<String> {
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

/// Runs a plain (non-PTY) remote command, optionally feeding `password`
/// (plus a trailing newline) to its stdin for a `sudo -S` prompt; fails on
/// nonzero exit.
fn exec_with_optional_password(
    session: &ssh2::Session,
    command: &str,
    password: Option<&str>,
) -> Result<(), String> {
    let mut channel = session.channel_session().map_err(|e| e.to_string())?;
    channel.exec(command).map_err(|e| e.to_string())?;
    if let Some(pw) = password {
        let mut line = pw.to_string();
        line.push('\n');
        let _ = channel.write_all(line.as_bytes());
        let _ = channel.flush();
    }
    let _ = channel.send_eof();
    let mut output = String::new();
    channel.read_to_string(&mut output).map_err(|e| e.to_string())?;
    channel.wait_close().ok();
    let code = channel.exit_status().unwrap_or(-1);
    if code != 0 {
        return Err(format!("`{}` exited {}: {}", command, code, output.trim()));
    }
    Ok(())
}

fn exec_simple(session: &ssh2::Session, command: &str) -> Result<(), String> {
    exec_with_optional_password(session, command, None)
}

/// Permissions to upload `local_path` with: explicit `mode` wins, then
/// `mirror_local_mode`, then the historical default of `0o644`.
fn effective_mode(local_path: &Path, opts: &TransferOptions) -> Result<i32, String> {
    if let Some(mode) = opts.mode {
        return Ok(mode as i32);
    }
    if opts.mirror_local_mode {
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(local_path).map_err(|e| e.to_string())?;
        return Ok((meta.permissions().mode() & 0o777) as i32);
    }
    Ok(0o644)
}

fn upload_with_options(
    conn: &mut Connection,
    local_path: &Path,
    dest: &str,
    opts: &TransferOptions,
    sudo_password: Option<&str>,
) -> Result<(), String> {
    let mode = effective_mode(local_path, opts)?;

    if opts.use_sudo {
        let file_name = local_path
            .file_name()
            .ok_or_else(|| format!("local path `{}` has no file name", local_path.display()))?
            .to_string_lossy()
            .into_owned();
        let temp_path = format!("{}/{}.fleet-upload", opts.temp_dir(), file_name);
        upload_one(&conn.session, local_path, &temp_path, mode)?;
        if let Some(dir) = parent_dir(dest) {
            exec_with_optional_password(&conn.session, &format!("sudo -S mkdir -p '{}'", dir), sudo_password)?;
        }
        exec_with_optional_password(
            &conn.session,
            &format!("sudo -S mv '{}' '{}'", temp_path, dest),
            sudo_password,
        )?;
        exec_with_optional_password(
            &conn.session,
            &format!("sudo -S chmod {:o} '{}'", mode, dest),
            sudo_password,
        )
    } else {
        if let Some(dir) = parent_dir(dest) {
            exec_simple(&conn.session, &format!("mkdir -p '{}'", dir))?;
        }
        upload_one(&conn.session, local_path, dest, mode)
    }
}

fn upload_one(session: &ssh2::Session, local_path: &Path, dest: &str, mode: i32) -> Result<(), String> {
    let metadata = std::fs::metadata(local_path).map_err(|e| e.to_string())?;
    let mut local_file = std::fs::File::open(local_path).map_err(|e| e.to_string())?;
    let mut remote_channel = session
        .scp_send(Path::new(dest), mode, metadata.len(), None)
        .map_err(|e| e.to_string())?;
    std::io::copy(&mut local_file, &mut remote_channel).map_err(|e| e.to_string())?;
    remote_channel.send_eof().ok();
    remote_channel.wait_eof().ok();
    remote_channel.close().ok();
    remote_channel.wait_close().ok();
    Ok(())
}

fn matches_is_directory_target(remote_path: &str) -> bool {
    remote_path.ends_with('/')
}

fn is_glob_pattern(s: &str) -> bool {
    s.contains(|c| matches!(c, '*' | '?' | '['))
}

/// Lists remote paths matching `pattern` via a plain (non-PTY) `ls -1 -d`
/// invocation: `get`'s remote-side wildcard expansion, since the transport
/// has no native glob primitive of its own.
fn list_remote_glob(session: &ssh2::Session, pattern: &str) -> FleetResult<Vec<String>> {
    let mut channel = session.channel_session().map_err(FleetError::Ssh)?;
    // `pattern` is left unquoted deliberately: the whole point is to let the
    // remote shell glob-expand it, which quoting would defeat.
    channel
        .exec(&format!("ls -1 -d {} 2>/dev/null", pattern))
        .map_err(FleetError::Ssh)?;
    let mut output = String::new();
    channel.read_to_string(&mut output)?;
    channel.wait_close().ok();
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Downloads `remote_path` from `host` into `local_path`, expanding
/// `remote_path` via a remote `ls` first when it contains glob
/// metacharacters. A leading `~` is resolved against the remote home. With
/// `opts.use_sudo`, each file is `sudo cp`-ed into `opts.temp_dir` (made
/// world-readable) before downloading, since an unprivileged download can't
/// read a root-owned source directly.
pub fn get(
    env: &mut Env,
    cache: &mut ConnectionCache,
    host: &HostString,
    remote_path: &str,
    local_path: &str,
    opts: &TransferOptions,
) -> FleetResult<TransferOutcome> {
    let sudo_password = if opts.use_sudo { password_for(env, host, true) } else { None };
    let conn = cache.get_or_connect(host, env)?;
    let remote_path = resolve_remote_path(conn, remote_path).map_err(|e| FleetError::TransferFailed {
        host: host.to_canonical(),
        reason: e,
    })?;

    let remote_files = if is_glob_pattern(&remote_path) {
        let matches = list_remote_glob(&conn.session, &remote_path)?;
        if matches.is_empty() {
            return Err(FleetError::TransferFailed {
                host: host.to_canonical(),
                reason: format!("no remote files match `{}`", remote_path),
            });
        }
        matches
    } else {
        vec![remote_path.clone()]
    };

    let warn_only = env.warn_only();
    let multiple = remote_files.len() > 1;
    let mut outcome = TransferOutcome::default();

    for remote_file in remote_files {
        let dest = if matches_is_directory_target(local_path) || multiple {
            let name = Path::new(&remote_file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| remote_file.clone());
            format!("{}/{}", local_path.trim_end_matches('/'), name)
        } else {
            local_path.to_string()
        };

        match download_with_options(conn, &remote_file, &dest, opts, sudo_password.as_deref()) {
            Ok(()) => outcome.transferred.push(dest),
            Err(reason) if warn_only => outcome.failed.push((remote_file, reason)),
            Err(reason) => {
                return Err(FleetError::TransferFailed {
                    host: host.to_canonical(),
                    reason,
                })
            }
        }
    }

    Ok(outcome)
}

fn download_with_options(
    conn: &mut Connection,
    remote_file: &str,
    dest: &str,
    opts: &TransferOptions,
    sudo_password: Option<&str>,
) -> Result<(), String> {
    if !opts.use_sudo {
        return download_one(&conn.session, remote_file, dest);
    }

    let file_name = Path::new(remote_file)
        .file_name()
        .ok_or_else(|| format!("remote path `{}` has no file name", remote_file))?
        .to_string_lossy()
        .into_owned();
    let temp_path = format!("{}/{}.fleet-download", opts.temp_dir(), file_name);
    exec_with_optional_password(
        &conn.session,
        &format!("sudo -S cp '{}' '{}' && sudo -S chmod 0644 '{}'", remote_file, temp_path, temp_path),
        sudo_password,
    )?;
    let result = download_one(&conn.session, &temp_path, dest);
    let _ = exec_with_optional_password(&conn.session, &format!("sudo -S rm -f '{}'", temp_path), sudo_password);
    result
}

fn download_one(session: &ssh2::Session, remote_file: &str, dest: &str) -> Result<(), String> {
    let (mut remote_channel, stat) = session
        .scp_recv(Path::new(remote_file))
        .map_err(|e| e.to_string())?;
    let mut local_file = std::fs::File::create(dest).map_err(|e| e.to_string())?;
    std::io::copy(&mut remote_channel, &mut local_file).map_err(|e| e.to_string())?;
    remote_channel.send_eof().ok();
    remote_channel.wait_eof().ok();
    remote_channel.close().ok();
    remote_channel.wait_close().ok();
    // Mirrors the source file's mode onto the download by default, the same
    // way `scp -p` behaves, so a put/get round trip preserves it.
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode((stat.mode() as u32) & 0o777);
    let _ = std::fs::set_permissions(dest, perms);
    Ok(())
}

/// Prompts the user running the task for a value, serialized against the
/// same output lock as every other line so it never interleaves with
/// in-flight command output.
pub fn prompt(env: &Env, message: &str) -> FleetResult<String> {
    multiplex::emit_note(env, Stream::User, message);
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn build_shell_command_wraps_through_configured_shell() {
        let env = Env::new();
        let cmd = build_shell_command(&env, "ls -la", None);
        assert_eq!(cmd, "/bin/sh -c 'ls -la'");
    }

    #[test]
    fn build_shell_command_prefixes_cd_when_cwd_given() {
        let env = Env::new();
        let cmd = build_shell_command(&env, "ls", Some("/opt/app"));
        assert_eq!(cmd, "/bin/sh -c 'cd '\\''/opt/app'\\'' && ls'");
    }

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's here"), r"'it'\''s here'");
    }

    #[test]
    fn directory_target_detected_by_trailing_slash() {
        assert!(matches_is_directory_target("/var/www/"));
        assert!(!matches_is_directory_target("/var/www/app.tar"));
    }

    /// Exercises the same `glob`-expansion step `put` runs, against real
    /// scratch files, without opening an SSH connection.
    #[test]
    fn glob_expansion_finds_every_matching_local_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.log"] {
            std::fs::write(dir.path().join(name), b"data").unwrap();
        }
        let pattern = dir.path().join("*.txt");
        let matches: Vec<_> = glob::glob(pattern.to_str().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(matches.len(), 2);
    }
}
