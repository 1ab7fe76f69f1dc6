//! Gateway/bastion chaining: reaching a host only addressable through an
//! intermediate SSH hop.
//!
//! `ssh2::Session` only handshakes over a concrete `TcpStream`, so it is
//! impossible to nest a second `Session` directly over a gateway
//! `ssh2::Channel`. Instead this opens a `channel_direct_tcpip` through the
//! already-authenticated gateway session, binds a loopback `TcpListener`,
//! and splices the two with a non-blocking poll loop reading/writing in
//! 8KB chunks — the same local-forward shape `ssh -L` implements, just
//! driven in-process.
//! Grounded on the `ssh2`-based connection handling in
//! `other_examples/03bfdf02_zoza1982-picoflow__src-executors-ssh.rs.rs`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::FleetResult;

/// A local loopback endpoint that forwards to `target_host:target_port`
/// through a gateway's `ssh2::Session`. Dropping it does not stop the pump
/// threads already servicing an accepted connection; the tunnel is meant
/// to live as long as the `Connection` that owns it.
pub struct Tunnel {
    pub local_addr: std::net::SocketAddr,
    _accept_thread: JoinHandle<()>,
}

impl Tunnel {
    /// Spawns an accept loop that, for each local connection, opens one
    /// `direct-tcpip` channel on `gateway` and pumps bytes in both
    /// directions. Only a single hop is modeled (gateway -> target); chained
    /// multi-hop bastions are built by resolving the gateway's own
    /// connection through another `Tunnel` first.
    pub fn open(
        gateway: ssh2::Session,
        target_host: &str,
        target_port: u16,
    ) -> FleetResult<Tunnel> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let local_addr = listener.local_addr()?;
        let target_host = target_host.to_string();

        let accept_thread = std::thread::spawn(move || {
            for incoming in listener.incoming() {
                let local_stream = match incoming {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let channel = match gateway.channel_direct_tcpip(
                    &target_host,
                    target_port,
                    None,
                ) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                pump(local_stream, channel, &gateway);
            }
        });

        Ok(Tunnel {
            local_addr,
            _accept_thread: accept_thread,
        })
    }
}

fn is_would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// Retries a write against a non-blocking channel until every byte lands,
/// the same EAGAIN-retry shape `channel::retry_would_block` uses for
/// session-level calls.
fn write_all_retrying(channel: &mut ssh2::Channel, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "wrote 0 bytes")),
            Ok(n) => data = &data[n..],
            Err(e) if is_would_block(&e) => std::thread::sleep(Duration::from_millis(2)),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Splices a local TCP socket with a gateway channel until either side
/// closes.
///
/// A single non-blocking poll loop drives both directions in the thread
/// that called it, rather than splitting each direction into its own
/// thread behind a shared `Arc<Mutex<Channel>>`: two threads blocking on
/// opposite ends of one mutex-guarded channel can starve each other (the
/// reader holds the lock across a blocking `read` while the writer waits
/// for it), and libssh2 is not safe to drive from two threads regardless.
/// This mirrors the per-host poll loop in `channel::run_channel_inner`.
fn pump(mut local_stream: TcpStream, mut channel: ssh2::Channel, session: &ssh2::Session) {
    if local_stream.set_nonblocking(true).is_err() {
        return;
    }
    session.set_blocking(false);
    let mut buf = [0u8; 8192];

    loop {
        let mut made_progress = false;

        match local_stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                made_progress = true;
                if write_all_retrying(&mut channel, &buf[..n]).is_err() {
                    break;
                }
            }
            Err(e) if is_would_block(&e) => {}
            Err(_) => break,
        }

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                made_progress = true;
                if local_stream.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(e) if is_would_block(&e) => {}
            Err(_) => break,
        }

        if channel.eof() {
            break;
        }
        if !made_progress {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    session.set_blocking(true);
}
