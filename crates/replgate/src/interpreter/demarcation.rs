//! Sentinel framing for unframed interpreter output.
//!
//! After the user's code, one marker command per output stream prints a per-bridge random
//! token. Each stream is read line by line until the token shows up; everything before it
//! belongs to the current execution. Both streams are drained by independent tasks that feed
//! a single event channel, so a full pipe on one stream can never stall the other.
//!
//! A line printed by user code that ends with the token is indistinguishable from the marker.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::ExecutionOutput;
use super::error::BridgeError;

/// Placeholder replaced by the sentinel token in marker templates.
pub const SENTINEL_PLACEHOLDER: &str = "{sentinel}";

/// Placeholder replaced by the quoted user code in a code template.
pub const CODE_PLACEHOLDER: &str = "{code}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Token that terminates one response on one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel(String);

impl Sentinel {
    pub fn generate() -> Self {
        Self(format!("__replgate_{}__", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// If `line` terminates the response, return the output printed before the token on
    /// that same line (possibly empty).
    pub fn split<'a>(&self, line: &'a str) -> Option<&'a str> {
        line.strip_suffix(self.as_str())
    }

    pub fn render(&self, template: &str) -> String {
        template.replace(SENTINEL_PLACEHOLDER, self.as_str())
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the bytes written to stdin for one execution.
///
/// With a `code_template`, the code is sent as a single line: the template with `{code}`
/// replaced by the code as a double-quoted string literal (JSON escapes, which Python
/// accepts as-is). Without one the code is sent verbatim. Either way non-empty code is
/// followed by a blank line so an open block statement is closed before the markers run.
pub fn compose_command(
    code: &str,
    code_template: Option<&str>,
    stdout_marker: &str,
    stderr_marker: &str,
) -> String {
    let code = code.trim_end_matches(['\n', '\r']);
    let mut payload = String::with_capacity(code.len() + stdout_marker.len() + stderr_marker.len() + 4);
    if !code.is_empty() {
        match code_template {
            Some(template) => {
                let literal = serde_json::Value::String(code.to_string()).to_string();
                payload.push_str(&template.replace(CODE_PLACEHOLDER, &literal));
            }
            None => payload.push_str(code),
        }
        payload.push_str("\n\n");
    }
    payload.push_str(stdout_marker);
    payload.push('\n');
    payload.push_str(stderr_marker);
    payload.push('\n');
    payload
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(StreamKind, String),
    /// The sentinel was seen; nothing more belongs to this execution.
    Finished(StreamKind),
    /// The stream hit EOF or an I/O error before the sentinel.
    Failed(StreamKind, String),
}

/// Read `reader` line by line until the sentinel, forwarding every output line as an event.
///
/// Bytes that are not valid UTF-8 are replaced rather than treated as a read failure.
/// Returns the reader so the next execution can continue where this one stopped.
pub async fn drain_until_sentinel<R>(
    mut reader: R,
    kind: StreamKind,
    sentinel: Sentinel,
    events: mpsc::Sender<StreamEvent>,
) -> R
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                let _ = events
                    .send(StreamEvent::Failed(kind, "interpreter closed the stream".to_string()))
                    .await;
                break;
            }
            Ok(_) => {
                let line = decode_line(&buf);
                if let Some(head) = sentinel.split(&line) {
                    if !head.is_empty() {
                        let _ = events.send(StreamEvent::Line(kind, head.to_string())).await;
                    }
                    let _ = events.send(StreamEvent::Finished(kind)).await;
                    break;
                }
                if events.send(StreamEvent::Line(kind, line)).await.is_err() {
                    // Collector gave up (deadline); stop reading.
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(StreamEvent::Failed(kind, e.to_string())).await;
                break;
            }
        }
    }
    reader
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Consume stream events until every stream finished or the deadline passes.
///
/// `timeout` is only used for the error value; `deadline` is authoritative.
pub async fn collect(
    events: &mut mpsc::Receiver<StreamEvent>,
    streams: usize,
    deadline: Instant,
    timeout: Duration,
) -> Result<ExecutionOutput, BridgeError> {
    let mut stdout: Vec<String> = Vec::new();
    let mut stderr: Vec<String> = Vec::new();
    let mut finished = 0usize;

    let expired = tokio::time::sleep_until(deadline);
    tokio::pin!(expired);

    while finished < streams {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Line(StreamKind::Stdout, line)) => stdout.push(line),
                Some(StreamEvent::Line(StreamKind::Stderr, line)) => stderr.push(line),
                Some(StreamEvent::Finished(_)) => finished += 1,
                Some(StreamEvent::Failed(stream, reason)) => {
                    return Err(BridgeError::Read { stream, reason });
                }
                None => {
                    return Err(BridgeError::Read {
                        stream: StreamKind::Stdout,
                        reason: "stream readers stopped before the sentinel".to_string(),
                    });
                }
            },
            _ = &mut expired => return Err(BridgeError::Timeout(timeout)),
        }
    }

    Ok(ExecutionOutput {
        stdout: stdout.join("\n"),
        stderr: stderr.join("\n"),
    })
}
