//! Subprocess supervision and log streaming.
//!
//! A [`JobRunner`] launches one [`ProcessSpec`] and hands back a [`LogStream`]:
//! a bounded channel fed by a supervisor task. Stdout and stderr lines are
//! forwarded in arrival order, followed by exactly one [`LogRecord::Exited`];
//! the channel closes once the process has exited. A slow consumer applies
//! backpressure all the way to the child's pipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Environment overlay every stage process receives.
pub const STAGE_ENV: [(&str, &str); 3] = [
    ("PYTHONIOENCODING", "utf-8"),
    ("LOG_LEVEL", "DEBUG"),
    ("HF_HUB_ENABLE_HF_TRANSFER", "1"),
];

/// Everything needed to start a subprocess, passed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), cwd: cwd.into(), env: BTreeMap::new() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_stage_env(self) -> Self {
        STAGE_ENV.iter().fold(self, |spec, (k, v)| spec.env(*k, *v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Emitted by the runner itself (e.g. the process could not be started).
    Runner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Line { source: LogSource, text: String, at: DateTime<Utc> },
    /// Terminal record. `code` is `None` when the process was killed by a
    /// signal or never started.
    Exited { code: Option<i32>, success: bool },
}

impl LogRecord {
    fn line(source: LogSource, text: impl Into<String>) -> Self {
        Self::Line { source, text: text.into(), at: Utc::now() }
    }

    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line { source: LogSource::Runner, text, .. } => write!(f, "Runner: {text}"),
            Self::Line { text, .. } => f.write_str(text),
            Self::Exited { code: Some(code), .. } => write!(f, "Runner: process exited with code {code}"),
            Self::Exited { code: None, .. } => f.write_str("Runner: process terminated without an exit code"),
        }
    }
}

/// Consumer half of a running process's output.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<LogRecord>,
}

impl LogStream {
    /// Next record, or `None` once the process has exited and every record
    /// has been delivered.
    pub async fn next(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }

    /// Drains the stream to completion.
    pub async fn collect(mut self) -> Vec<LogRecord> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await {
            out.push(record);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobRunner {
    capacity: usize,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl JobRunner {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1) }
    }

    /// Starts `spec` and returns its log stream. Must be called from within a
    /// Tokio runtime. Failure to start is reported in-stream, never as an
    /// error.
    pub fn start(&self, spec: ProcessSpec) -> LogStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(supervise(spec, tx));
        LogStream { rx }
    }
}

async fn supervise(spec: ProcessSpec, tx: mpsc::Sender<LogRecord>) {
    info!(program = %spec.program, cwd = %spec.cwd.display(), "starting process");
    debug!(args = ?spec.args, env = ?spec.env, "process spec");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %spec.program, error = %e, "failed to start process");
            let _ = tx
                .send(LogRecord::line(LogSource::Runner, format!("failed to start {}: {e}", spec.program)))
                .await;
            let _ = tx.send(LogRecord::Exited { code: None, success: false }).await;
            return;
        }
    };

    let stdout = child.stdout.take().map(|out| tokio::spawn(forward_lines(out, LogSource::Stdout, tx.clone())));
    let stderr = child.stderr.take().map(|err| tokio::spawn(forward_lines(err, LogSource::Stderr, tx.clone())));

    for reader in [stdout, stderr].into_iter().flatten() {
        let _ = reader.await;
    }

    let record = match child.wait().await {
        Ok(status) => LogRecord::Exited { code: status.code(), success: status.success() },
        Err(e) => {
            let _ = tx.send(LogRecord::line(LogSource::Runner, format!("failed to wait for process: {e}"))).await;
            LogRecord::Exited { code: None, success: false }
        }
    };
    info!(program = %spec.program, exit = %record, "process finished");
    let _ = tx.send(record).await;
}

/// Upper bound on an unterminated line before it is flushed anyway.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Emits a record at every `\n` or `\r` as soon as the bytes arrive, so
/// carriage-return progress bars surface while they are still updating.
/// Invalid UTF-8 is replaced rather than dropped.
async fn forward_lines<R>(reader: R, source: LogSource, tx: mpsc::Sender<LogRecord>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    // Bytes of the current line carried across reads; only ASCII separators
    // end a line, so multibyte characters are never split here.
    let mut pending = Vec::new();
    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(LogRecord::line(LogSource::Runner, format!("read error on {source:?}: {e}"))).await;
                break;
            }
        };
        let consumed = chunk.len();
        for piece in chunk.split_inclusive(|b| matches!(b, b'\n' | b'\r')) {
            match piece.split_last() {
                Some((b'\n' | b'\r', body)) => {
                    pending.extend_from_slice(body);
                    flush(&mut pending, source, &tx).await;
                }
                _ => pending.extend_from_slice(piece),
            }
        }
        reader.consume(consumed);

        if pending.len() >= MAX_LINE_BYTES {
            let mut head = std::mem::take(&mut pending);
            pending = head.split_off(utf8_boundary(&head));
            flush(&mut head, source, &tx).await;
        }
    }
    flush(&mut pending, source, &tx).await;
}

/// Sends `pending` as one line if it is non-empty and clears it. The
/// consumer may have gone away; the reader keeps draining regardless so the
/// child never blocks on a full pipe.
async fn flush(pending: &mut Vec<u8>, source: LogSource, tx: &mpsc::Sender<LogRecord>) {
    if !pending.is_empty() {
        let _ = tx.send(LogRecord::line(source, String::from_utf8_lossy(pending))).await;
        pending.clear();
    }
}

/// Length of the longest prefix that does not end inside a multibyte
/// character.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}
