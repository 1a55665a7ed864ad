//! Single spawn point for every external process.
//!
//! Stdout and stderr are piped and consumed line-by-line by detached reader
//! tasks, so a chatty child never blocks on a full pipe. The last ~8 KiB of
//! stderr is retained for bot-block signature matching. Cancellation and
//! soft timeouts share one code path: terminate, wait out the grace period,
//! then kill.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Bytes of stderr retained for signature matching.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Default grace period between terminate and kill.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// One external invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Soft timeout; elapsing is handled exactly like cancellation.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a completed invocation.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: Option<i32>,
    /// Last ~8 KiB of stderr, lossily decoded.
    pub stderr_tail: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Per-line output consumer.
pub type LineSink = Box<dyn FnMut(&str) + Send + 'static>;

/// A sink that discards every line.
pub fn discard_sink() -> LineSink {
    Box::new(|_| {})
}

/// Spawns external processes and supervises their lifetime.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    grace: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATION_GRACE)
    }
}

impl CommandRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Run a command to completion, streaming output into the sinks.
    ///
    /// Returns `Error::Cancelled` when the token fires and
    /// `Error::Transient` when the soft timeout elapses; both paths stop the
    /// child gracefully first. Retrying is the caller's concern.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        spec: CommandSpec,
        stdout_sink: LineSink,
        stderr_sink: LineSink,
    ) -> Result<CommandOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!(
            program = %spec.program.display(),
            args = ?spec.args,
            "Spawning external command"
        );

        let mut cmd = process_utils::tokio_command(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::fatal(format!("failed to spawn {}: {e}", spec.program.display()))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::fatal("child stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::fatal("child stderr was not piped"))?;

        let stdout_task = tokio::spawn(async move {
            let mut sink = stdout_sink;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink(&line);
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut sink = stderr_sink;
            let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink(&line);
                push_tail(&mut tail, line.as_bytes());
            }
            tail
        });

        let timeout = async {
            match spec.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        let mut interrupted: Option<Error> = None;
        let exit_status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => {
                debug!(program = %spec.program.display(), "Cancellation observed, stopping child");
                process_utils::stop_gracefully(&mut child, self.grace).await;
                interrupted = Some(Error::Cancelled);
                None
            }
            _ = &mut timeout => {
                warn!(
                    program = %spec.program.display(),
                    timeout = ?spec.timeout,
                    "Command timed out, stopping child"
                );
                process_utils::stop_gracefully(&mut child, self.grace).await;
                interrupted = Some(Error::transient(format!(
                    "{} timed out after {:?}",
                    spec.program.display(),
                    spec.timeout.unwrap_or_default()
                )));
                None
            }
        };

        // Readers finish once the child's pipes close.
        let _ = stdout_task.await;
        let mut tail = stderr_task.await.unwrap_or_default();

        if let Some(err) = interrupted {
            return Err(err);
        }

        let outcome = CommandOutcome {
            exit_code: exit_status.and_then(|s| s.code()),
            stderr_tail: String::from_utf8_lossy(tail.make_contiguous()).into_owned(),
        };
        debug!(
            program = %spec.program.display(),
            exit_code = ?outcome.exit_code,
            "External command finished"
        );
        Ok(outcome)
    }
}

fn push_tail(tail: &mut VecDeque<u8>, line: &[u8]) {
    for &byte in line {
        if tail.len() == STDERR_TAIL_BYTES {
            tail.pop_front();
        }
        tail.push_back(byte);
    }
    if tail.len() == STDERR_TAIL_BYTES {
        tail.pop_front();
    }
    tail.push_back(b'\n');
}
