// Command channel to a Python interpreter running the bundled repl_server.py.
//
// Commands and responses travel over two socket pairs mapped to fds 3 and 4
// in the child, leaving the child's stdout/stderr free for diagnostics.
// Sockets rather than pipes: writes use MSG_NOSIGNAL, so a dead subprocess
// surfaces as EPIPE instead of a SIGPIPE delivered to the host process.

use super::drain::{spawn_drain, Stream};
use super::protocol::{self, END_LINE};
use super::CommandChannel;
use crate::error::{RenderError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Child fd the server reads commands from.
pub const CHILD_CMD_FD: i32 = 3;
/// Child fd the server writes responses to.
pub const CHILD_RESP_FD: i32 = 4;

/// How to launch the interpreter.
#[derive(Clone, Debug)]
pub struct ReplOptions {
    pub python: PathBuf,
    pub server_script: PathBuf,
    /// Entries for the child's PYTHONPATH, in order.
    pub python_path: Vec<PathBuf>,
    pub command_timeout: Option<Duration>,
    pub close_grace: Duration,
}

/// Writes with `send(MSG_NOSIGNAL)`.
struct CommandWriter(UnixStream);

impl Write for CommandWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::send(
                self.0.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ReplChannel {
    child: Option<Child>,
    pid: u32,
    commands: Option<CommandWriter>,
    responses: Receiver<io::Result<String>>,
    /// Set by the reader thread when the response stream ends.
    eof: Arc<AtomicBool>,
    timeout: Option<Duration>,
    close_grace: Duration,
    dead: bool,
}

impl ReplChannel {
    /// Start the interpreter and wire up the command, response and
    /// diagnostic streams.
    pub fn spawn(options: &ReplOptions) -> Result<Self> {
        let (parent_cmd, child_cmd) = UnixStream::pair()?;
        let (parent_resp, child_resp) = UnixStream::pair()?;
        child_cmd.shutdown(std::net::Shutdown::Write)?;
        parent_resp.shutdown(std::net::Shutdown::Write)?;

        let python_path = std::env::join_paths(&options.python_path).map_err(|e| {
            RenderError::InvalidArgument(format!("unusable PYTHONPATH entry: {}", e))
        })?;
        let mut python_path: OsString = python_path;
        if let Some(existing) = std::env::var_os("PYTHONPATH").filter(|p| !p.is_empty()) {
            if !python_path.is_empty() {
                python_path.push(":");
            }
            python_path.push(existing);
        }

        let cmd_fd = child_cmd.as_raw_fd();
        let resp_fd = child_resp.as_raw_fd();

        let mut command = Command::new(&options.python);
        command
            .arg("-u")
            .arg(&options.server_script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONPATH", &python_path)
            .env("PYTHONUNBUFFERED", "1")
            .env("SHM_RENDER_CMD_FD", CHILD_CMD_FD.to_string())
            .env("SHM_RENDER_RESP_FD", CHILD_RESP_FD.to_string());

        // The socket pairs are CLOEXEC; the child's copies are moved to the
        // fixed slots, which dup2 leaves inheritable. Going through fds >= 10
        // first keeps one move from clobbering the other.
        unsafe {
            command.pre_exec(move || {
                let high_cmd = libc::fcntl(cmd_fd, libc::F_DUPFD, 10);
                let high_resp = libc::fcntl(resp_fd, libc::F_DUPFD, 10);
                if high_cmd < 0 || high_resp < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(high_cmd, CHILD_CMD_FD) < 0 || libc::dup2(high_resp, CHILD_RESP_FD) < 0 {
                    return Err(io::Error::last_os_error());
                }
                libc::close(high_cmd);
                libc::close(high_resp);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|e| {
            RenderError::Provisioning(format!(
                "failed to spawn {}: {}",
                options.python.display(),
                e
            ))
        })?;
        drop(child_cmd);
        drop(child_resp);

        let pid = child.id();
        tracing::info!(pid, python = %options.python.display(), "spawned renderer subprocess");

        let drained = child
            .stdout
            .take()
            .map_or(Ok(()), |stdout| spawn_drain(stdout, Stream::Stdout, pid))
            .and_then(|_| {
                child
                    .stderr
                    .take()
                    .map_or(Ok(()), |stderr| spawn_drain(stderr, Stream::Stderr, pid))
            });
        if let Err(e) = drained {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }

        let (tx, responses) = crossbeam_channel::unbounded();
        let eof = Arc::new(AtomicBool::new(false));
        let reader_eof = eof.clone();
        let spawned = thread::Builder::new()
            .name(format!("shm-render-resp-{}", pid))
            .spawn(move || {
                let mut reader = BufReader::new(parent_resp);
                let mut buf = Vec::with_capacity(256);
                loop {
                    buf.clear();
                    let line = match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            if buf.ends_with(b"\n") {
                                buf.pop();
                            }
                            Ok(String::from_utf8_lossy(&buf).into_owned())
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
                reader_eof.store(true, Ordering::Release);
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }

        Ok(Self {
            child: Some(child),
            pid,
            commands: Some(CommandWriter(parent_cmd)),
            responses,
            eof,
            timeout: options.command_timeout,
            close_grace: options.close_grace,
            dead: false,
        })
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn mark_dead(&mut self) {
        if !self.dead {
            tracing::warn!(pid = self.pid, "command channel is no longer usable");
        }
        self.dead = true;
    }

    fn kill(&mut self) {
        self.commands = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => tracing::info!(pid = self.pid, %status, "renderer subprocess killed"),
                Err(e) => tracing::warn!(pid = self.pid, error = %e, "failed to reap renderer subprocess"),
            }
        }
    }

    fn next_line(&self, deadline: Option<Instant>) -> Result<String> {
        let received = match deadline {
            Some(deadline) => self.responses.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => RenderError::Timeout(self.timeout.unwrap_or_default()),
                RecvTimeoutError::Disconnected => RenderError::ChannelClosed,
            })?,
            None => self.responses.recv().map_err(|_| RenderError::ChannelClosed)?,
        };
        Ok(received?)
    }
}

impl CommandChannel for ReplChannel {
    fn execute(&mut self, command: &str, capture_output: bool) -> Result<String> {
        if self.dead {
            return Err(RenderError::ChannelClosed);
        }
        let request = protocol::encode_request(command, capture_output)?;
        let writer = self.commands.as_mut().ok_or(RenderError::ChannelClosed)?;
        if let Err(e) = writer.write_all(request.as_bytes()) {
            self.mark_dead();
            return Err(e.into());
        }
        tracing::trace!(pid = self.pid, command, "sent command");

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut response = String::new();
        loop {
            match self.next_line(deadline) {
                Ok(line) if line == END_LINE => break,
                Ok(line) => {
                    response.push_str(&line);
                    response.push('\n');
                }
                Err(e @ RenderError::Timeout(_)) => {
                    tracing::error!(pid = self.pid, command, "command timed out, killing subprocess");
                    self.mark_dead();
                    self.kill();
                    return Err(e);
                }
                Err(e) => {
                    self.mark_dead();
                    return Err(e);
                }
            }
        }

        let trimmed = response.trim_end_matches('\n').len();
        response.truncate(trimmed);
        Ok(response)
    }

    fn close(&mut self) -> Result<()> {
        self.dead = true;
        // EOF on the command stream ends the server loop.
        self.commands = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + self.close_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(pid = self.pid, %status, "renderer subprocess exited");
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => {
                    tracing::warn!(pid = self.pid, "renderer subprocess did not exit, killing");
                    let _ = child.kill();
                    child.wait()?;
                    return Ok(());
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        !self.dead && self.child.is_some() && !self.eof.load(Ordering::Acquire)
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|_| self.pid)
    }
}

impl Drop for ReplChannel {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.kill();
        }
    }
}

impl std::fmt::Debug for ReplChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_repl_channel(self, f)
    }
}
