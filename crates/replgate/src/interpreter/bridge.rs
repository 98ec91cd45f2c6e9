//! Owned handle to one interactive interpreter process.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::ExecutionOutput;
use super::demarcation::{self, Sentinel, StreamEvent, StreamKind};
use super::error::BridgeError;
use crate::config::InterpreterConfig;

/// Capacity of the per-execution event channel shared by both stream readers.
const EVENT_BUFFER: usize = 256;

/// How long to wait for a killed interpreter to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

type StdoutReader = BufReader<ChildStdout>;
type StderrReader = BufReader<ChildStderr>;

/// An interpreter process together with its three standard streams.
///
/// Streams are `None` only while an execution owns them or after [`close`](Self::close).
pub struct InterpreterBridge {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<StdoutReader>,
    stderr: Option<StderrReader>,
    sentinel: Sentinel,
    code_template: Option<String>,
    stdout_marker: String,
    stderr_marker: String,
    execution_timeout: Duration,
    closed: bool,
}

impl InterpreterBridge {
    /// Spawn the interpreter and run the startup handshake.
    ///
    /// The handshake drains banners and prompts so the first real execution starts with an
    /// empty backlog on both streams. Any failure kills the process before returning.
    pub async fn open(config: &InterpreterConfig) -> Result<Self, BridgeError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let working_dir = config
            .working_dir()
            .map_err(|e| BridgeError::Spawn(format!("{e:#}")))?;
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so a timeout can take down anything the code started.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {e}", config.program)))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.start_kill();
            return Err(BridgeError::Spawn("interpreter pipes unavailable".to_string()));
        };

        let sentinel = Sentinel::generate();
        let mut bridge = Self {
            child,
            pid,
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            stderr: Some(BufReader::new(stderr)),
            code_template: Some(config.code_template.clone()).filter(|t| !t.is_empty()),
            stdout_marker: sentinel.render(&config.stdout_marker),
            stderr_marker: sentinel.render(&config.stderr_marker),
            sentinel,
            execution_timeout: config.execution_timeout(),
            closed: false,
        };

        match bridge
            .round_trip(&config.prelude, config.startup_timeout())
            .await
        {
            Ok(banner) => {
                debug!(
                    "Interpreter {} (pid {:?}) ready with sentinel {}, discarded {} stdout and {} stderr bytes",
                    config.program,
                    pid,
                    bridge.sentinel(),
                    banner.stdout.len(),
                    banner.stderr.len()
                );
                Ok(bridge)
            }
            Err(e) => {
                warn!("Handshake with {} failed: {}", config.program, e);
                bridge.close().await;
                Err(BridgeError::Spawn(format!("handshake failed: {e}")))
            }
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn sentinel(&self) -> &Sentinel {
        &self.sentinel
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run `code` and capture what it printed, bounded by the execution deadline.
    ///
    /// Any error leaves the bridge in an unusable state; the caller must close it.
    pub async fn execute(&mut self, code: &str) -> Result<ExecutionOutput, BridgeError> {
        self.round_trip(code, self.execution_timeout).await
    }

    async fn round_trip(
        &mut self,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutput, BridgeError> {
        if self.closed {
            return Err(BridgeError::Closed);
        }

        let deadline = Instant::now() + timeout;
        let payload = demarcation::compose_command(
            code,
            self.code_template.as_deref(),
            &self.stdout_marker,
            &self.stderr_marker,
        );

        let stdin = self.stdin.as_mut().ok_or(BridgeError::Closed)?;
        match tokio::time::timeout_at(deadline, write_payload(stdin, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::Write(e)),
            Err(_) => return Err(BridgeError::Timeout(timeout)),
        }

        let (Some(stdout), Some(stderr)) = (self.stdout.take(), self.stderr.take()) else {
            return Err(BridgeError::Closed);
        };

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
        let stdout_task = tokio::spawn(demarcation::drain_until_sentinel(
            stdout,
            StreamKind::Stdout,
            self.sentinel.clone(),
            tx.clone(),
        ));
        let stderr_task = tokio::spawn(demarcation::drain_until_sentinel(
            stderr,
            StreamKind::Stderr,
            self.sentinel.clone(),
            tx,
        ));

        match demarcation::collect(&mut rx, 2, deadline, timeout).await {
            Ok(output) => {
                // Both readers saw their sentinel and are returning their streams.
                let stdout = stdout_task.await.map_err(|e| BridgeError::Read {
                    stream: StreamKind::Stdout,
                    reason: e.to_string(),
                })?;
                let stderr = stderr_task.await.map_err(|e| BridgeError::Read {
                    stream: StreamKind::Stderr,
                    reason: e.to_string(),
                })?;
                self.stdout = Some(stdout);
                self.stderr = Some(stderr);
                Ok(output)
            }
            Err(e) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(e)
            }
        }
    }

    /// Release the streams and terminate the interpreter with everything it spawned.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.stdin.take();
        self.stdout.take();
        self.stderr.take();

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }

        if let Err(e) = self.child.start_kill() {
            debug!("Interpreter {:?} already gone: {}", self.pid, e);
        }

        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!("Interpreter {:?} exited with {}", self.pid, status),
            Ok(Err(e)) => warn!("Error waiting for interpreter {:?}: {:?}", self.pid, e),
            Err(_) => warn!("Timeout waiting for interpreter {:?} to exit", self.pid),
        }
    }
}

impl Drop for InterpreterBridge {
    fn drop(&mut self) {
        // kill_on_drop only covers the leader; take the group down too.
        #[cfg(unix)]
        if !self.is_closed()
            && let Some(pid) = self.pid
        {
            kill_process_group(pid);
        }
    }
}

async fn write_payload(stdin: &mut ChildStdin, payload: &str) -> std::io::Result<()> {
    stdin.write_all(payload.as_bytes()).await?;
    stdin.flush().await
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        debug!("Killing process group {} failed: {}", pgid, err);
    }
}
