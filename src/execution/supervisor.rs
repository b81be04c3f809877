//! Bounded-time execution of the analysis command.
//!
//! The supervisor launches `binary [opt ...] url` with stdout and stderr
//! sharing the write end of one pipe, so the captured output keeps the order
//! in which the child wrote it. The child is polled at a fixed interval.
//! When the task's timeout elapses the child receives SIGTERM; if it is still
//! alive after the grace period it receives SIGKILL. Output produced before
//! termination is kept.

use std::io::{PipeReader, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::scheduler::Task;
use crate::utils::{BodyDecoder, Utf8Lossy};

/// Result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Exit code, or the negated signal number if the process was killed.
    pub rc: i32,
    /// Decoded, trimmed combined output.
    pub output: String,
    /// Whether the timeout fired.
    pub timed_out: bool,
    pub duration: Duration,
}

/// Runs the analysis binary under a time bound.
pub struct Supervisor {
    binary: String,
    poll_interval: Duration,
    kill_grace: Duration,
    decoder: Arc<dyn BodyDecoder>,
}

impl Supervisor {
    /// Creates a supervisor for `binary` with a one-second poll interval and
    /// a ten-second SIGTERM grace period.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            poll_interval: Duration::from_secs(1),
            kill_grace: Duration::from_secs(10),
            decoder: Arc::new(Utf8Lossy),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn BodyDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs the analyzer against a task.
    pub async fn run(&self, task: &Task, timeout: Duration) -> Result<Execution, ExecError> {
        let command = task.command_line(&self.binary);
        self.run_command(&command, timeout).await
    }

    /// Runs an arbitrary command line under the same supervision.
    pub async fn run_command(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<Execution, ExecError> {
        let (program, args) = command.split_first().ok_or(ExecError::EmptyCommand)?;
        let start = Instant::now();

        let (reader, writer) = std::io::pipe()?;
        let mut child = {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer)
                .kill_on_drop(true);
            // `cmd` holds the parent's copies of the write end; they close
            // when it drops at the end of this block.
            cmd.spawn().map_err(|source| ExecError::SpawnFailed {
                program: program.clone(),
                source,
            })?
        };

        debug!(program = %program, pid = ?child.id(), "Launched analyzer");

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut output_pump = pump(reader, Arc::clone(&buffer));

        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                timed_out = true;
                warn!(program = %program, timeout_secs = timeout.as_secs(), "Timeout, terminating analyzer");
                break self.terminate(&mut child).await?;
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        // A descendant that inherited the pipe can keep it open after the
        // child is gone; stop waiting for EOF after the grace period.
        if tokio::time::timeout(self.kill_grace, &mut output_pump)
            .await
            .is_err()
        {
            warn!(program = %program, "Output stream still open after exit, abandoning it");
        }

        let bytes = match buffer.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let output = self.decoder.decode(&bytes).trim().to_string();

        Ok(Execution {
            rc: exit_code(&status),
            output,
            timed_out,
            duration: start.elapsed(),
        })
    }

    /// SIGTERM, then SIGKILL if the child outlives the grace period.
    async fn terminate(&self, child: &mut Child) -> Result<ExitStatus, ExecError> {
        send_sigterm(child);

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                info!(
                    pid = ?child.id(),
                    grace_secs = self.kill_grace.as_secs(),
                    "Analyzer ignored SIGTERM, killing"
                );
                child.kill().await?;
                Ok(child.wait().await?)
            }
        }
    }
}

/// Drains the combined output pipe into the shared buffer.
///
/// The read end is a blocking handle, so it is read on the blocking pool.
/// Chunks land in the buffer as they arrive, so whatever was read before an
/// abandoned wait is still there.
fn pump(mut reader: PipeReader, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match buffer.lock() {
                    Ok(mut guard) => guard.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Error reading analyzer output");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet, so it
    // cannot have been recycled for another process.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, error = %std::io::Error::last_os_error(), "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to terminate analyzer");
    }
}

/// Exit code, or the negated signal number for a signalled process.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
