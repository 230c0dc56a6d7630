//! Lifecycle of a single REPL subprocess: spawn it bound to an ephemeral TCP
//! port, speak its unframed JSON-over-TCP protocol, and tear it down
//! cleanly. One `ReplHandle` is exclusively owned by one cache slot at a
//! time; a worker borrows it mutably for the duration of a single query.

use crate::error::{Result, VerifyError};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const RECV_BUFSIZE: usize = 64 * 1024;

/// A single REPL session: something that can run one JSON query and, when
/// done, tear itself down. Implemented by the real subprocess-backed
/// `ReplHandle` and, in tests, by an in-process fake so the cache, worker
/// and dispatcher can be exercised without a real proof-assistant binary.
pub trait Session: Send {
    fn interact(&mut self, cmd: &Value, read_deadline: Duration) -> Result<Value>;
    fn shutdown(self: Box<Self>);
    fn pid(&self) -> u32;
    fn port(&self) -> u16;
}

/// Spawns REPL sessions. The cache holds one of these and calls it on a
/// cache miss; swapping it for a fake factory in tests avoids needing a
/// real proof-assistant binary on `PATH`.
pub trait SessionFactory: Send {
    fn spawn(&self) -> Result<Box<dyn Session>>;
}

/// A live REPL subprocess: the child process, the header it was
/// initialized with, and the socket used to talk to it.
pub struct ReplHandle {
    child: Child,
    stream: TcpStream,
    port: u16,
}

/// Spawns real REPL subprocesses bound to ephemeral TCP ports.
pub struct ProcessSessionFactory {
    pub repl_path: PathBuf,
    pub project_path: PathBuf,
    pub host: String,
    pub connect_timeout: Duration,
}

impl SessionFactory for ProcessSessionFactory {
    fn spawn(&self) -> Result<Box<dyn Session>> {
        let handle = ReplHandle::spawn(
            &self.repl_path,
            &self.project_path,
            &self.host,
            self.connect_timeout,
        )?;
        Ok(Box::new(handle))
    }
}

/// Bind an ephemeral port and release it immediately so the REPL child can
/// bind to it instead. Racy in the general case — another process could
/// grab the port between release and the child's bind — but the connect
/// retry loop in `connect` absorbs that rare case.
fn reserve_ephemeral_port(host: &str) -> Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Resolve the REPL binary: prefer the conventional build-output path
/// under `repl_path`, falling back to searching `PATH` for a binary named
/// `repl` (mirrors the `which` crate's role elsewhere in this ecosystem).
fn resolve_repl_binary(repl_path: &Path) -> Result<std::path::PathBuf> {
    let conventional = repl_path.join(".lake/build/bin/repl");
    if conventional.is_file() {
        return Ok(conventional.canonicalize().unwrap_or(conventional));
    }
    which::which("repl").map_err(|e| VerifyError::ReplBroken(format!("repl binary not found: {e}")))
}

impl ReplHandle {
    /// Spawn a new REPL process bound to a fresh ephemeral port, wait for
    /// it to accept a TCP connection, and return the handle (not yet
    /// initialized with any header — the cache does that immediately
    /// after spawning).
    pub fn spawn(
        repl_path: &Path,
        project_path: &Path,
        host: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let port = reserve_ephemeral_port(host)?;
        let binary = resolve_repl_binary(repl_path)?;

        let tmp = std::env::temp_dir();
        let fout = File::create(tmp.join(format!("repl-{port}.log")))?;
        let ferr = File::create(tmp.join(format!("repl-{port}.err")))?;

        let mut command = Command::new("lake");
        command
            .arg("-R")
            .arg("env")
            .arg(&binary)
            .arg("--tcp")
            .arg(port.to_string())
            .current_dir(project_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(fout))
            .stderr(Stdio::from(ferr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    unsafe {
                        libc::setpgid(0, 0);
                    }
                    Ok(())
                });
            }
        }

        let child = command.spawn()?;
        tracing::debug!(pid = child.id(), port, "spawned REPL subprocess");

        let stream = Self::connect(host, port, connect_timeout)?;

        Ok(ReplHandle {
            child,
            stream,
            port,
        })
    }

    fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
        let deadline = Instant::now() + timeout;
        loop {
            match TcpStream::connect((host, port)) {
                Ok(stream) => return Ok(stream),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(500));
                }
                Err(_) => return Err(VerifyError::ReplUnavailable),
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Send `cmd` and return the parsed, time-decorated reply. A reply that
    /// never assembles into valid JSON within `read_deadline` becomes
    /// `{time, error: <decode message>}` rather than blocking forever; the
    /// handle itself stays usable for the next query.
    pub fn interact(&mut self, cmd: &Value, read_deadline: Duration) -> Result<Value> {
        let payload = serde_json::to_vec(cmd).map_err(|e| VerifyError::ReplBroken(e.to_string()))?;
        self.stream
            .write_all(&payload)
            .map_err(|e| VerifyError::ReplBroken(e.to_string()))?;

        let start = Instant::now();
        self.stream
            .set_read_timeout(Some(read_deadline))
            .map_err(|e| VerifyError::ReplBroken(e.to_string()))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; RECV_BUFSIZE];

        loop {
            if Instant::now().duration_since(start) >= read_deadline {
                let elapsed = start.elapsed().as_secs_f64();
                return Ok(json!({
                    "time": elapsed,
                    "error": "timed out waiting for a complete JSON reply",
                }));
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(VerifyError::ReplBroken(
                        "connection closed by REPL".to_string(),
                    ))
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // No more bytes arrived before the deadline; if we have
                    // something, see if it already parses.
                }
                Err(e) => return Err(VerifyError::ReplBroken(e.to_string())),
            }

            match serde_json::from_slice::<Value>(&buf) {
                Ok(mut value) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    if let Value::Object(ref mut map) = value {
                        map.insert("time".to_string(), json!(elapsed));
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if buf.is_empty() {
                        std::thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                    // Incomplete JSON so far — sleep briefly and try to
                    // read more before giving up to the deadline above.
                    let _ = e;
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    /// Best-effort empty frame, close the socket, then SIGTERM the process
    /// group (falling back to a direct child SIGTERM where `setpgid` isn't
    /// available).
    pub fn shutdown(mut self) {
        let _ = self.stream.write_all(b"");
        let _ = self.stream.shutdown(std::net::Shutdown::Both);

        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            unsafe {
                let pgid = libc::getpgid(pid);
                if pgid > 0 {
                    libc::killpg(pgid, libc::SIGTERM);
                } else {
                    libc::kill(pid, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let _ = self.child.wait();
    }
}

impl Session for ReplHandle {
    fn interact(&mut self, cmd: &Value, read_deadline: Duration) -> Result<Value> {
        ReplHandle::interact(self, cmd, read_deadline)
    }

    fn shutdown(self: Box<Self>) {
        ReplHandle::shutdown(*self)
    }

    fn pid(&self) -> u32 {
        ReplHandle::pid(self)
    }

    fn port(&self) -> u16 {
        ReplHandle::port(self)
    }
}

impl Drop for ReplHandle {
    fn drop(&mut self) {
        // Last line of defense: if a handle is dropped without going
        // through `shutdown` (e.g. a panic unwind), still try to reap the
        // child so it doesn't become orphaned.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
