use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{LogBuffer, LogMatch};
use crate::{Error, Result};

/// Startup includes chain catch-up, so waits are generous by default.
pub const DEFAULT_WAIT_FOR_LOG_TIMEOUT: Duration = Duration::from_secs(60);
/// Time between the graceful termination request and the forceful kill.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const DEFAULT_LOG_FILE_NAME: &str = "daemon.log";

// Output readers normally finish right after the child exits. A grandchild
// holding the pipes open must not block stop() forever.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

struct RunningProcess {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

/// An external program with captured output.
pub struct SupervisedProcess {
    name: String,
    working_dir: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    grace_period: Duration,
    log_file_name: String,
    log: Arc<LogBuffer>,
    // Index of the first log line written by the current run.
    run_start: usize,
    running: Option<RunningProcess>,
}

impl SupervisedProcess {
    pub fn new(
        name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            working_dir: working_dir.into(),
            program: program.into(),
            args,
            grace_period: DEFAULT_STOP_GRACE_PERIOD,
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            log: Arc::new(LogBuffer::new()),
            run_start: 0,
            running: None,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_log_file_name(mut self, log_file_name: impl Into<String>) -> Self {
        self.log_file_name = log_file_name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Replaces the argument list used by the next `start`.
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn log(&self) -> Arc<LogBuffer> {
        self.log.clone()
    }

    pub fn log_path(&self) -> PathBuf {
        self.working_dir.join(&self.log_file_name)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|running| running.child.id())
    }

    /// Spawns the program and starts capturing its output.
    ///
    /// Returns as soon as the process exists. Use [`Self::wait_for_log`] to
    /// wait for readiness.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadyRunning(self.name.clone()));
        }
        tokio::fs::create_dir_all(&self.working_dir).await?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        self.run_start = self.log.len().await;
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_output_reader(
                self.name.clone(),
                stdout,
                self.log.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_output_reader(
                self.name.clone(),
                stderr,
                self.log.clone(),
            ));
        }

        info!("{} started (pid: {:?})", self.name, child.id());
        self.running = Some(RunningProcess { child, readers });
        Ok(())
    }

    /// Waits until a line of the current run matches `pattern`.
    ///
    /// The whole output of the current run is scanned on every call, so a line
    /// printed before the call satisfies it immediately.
    pub async fn wait_for_log(&self, pattern: &str, timeout: Duration) -> Result<LogMatch> {
        let regex = Regex::new(pattern)?;
        debug!("{} waiting for log {:?}", self.name, pattern);
        self.log
            .wait_for(&regex, self.run_start, timeout)
            .await
            .ok_or_else(|| Error::Timeout {
                pattern: pattern.to_string(),
                timeout,
            })
    }

    /// Requests graceful termination, kills the process after the grace period
    /// and writes the captured log to [`Self::log_path`].
    ///
    /// Stopping a process that is not running does nothing. The log is written
    /// even when waiting for or killing the process fails, the first error is
    /// returned.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(RunningProcess { mut child, readers }) = self.running.take() else {
            return Ok(());
        };

        request_termination(&self.name, &mut child);
        let exited = match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(status) => status.map(|status| info!("{} exited with {}", self.name, status)),
            Err(_) => {
                warn!(
                    "{} still running after {:?}, killing it",
                    self.name, self.grace_period
                );
                child.kill().await
            }
        };
        if let Err(err) = &exited {
            warn!("Failed to stop {}: {}", self.name, err);
        }

        let saved = self.collect_output(readers).await;
        exited?;
        saved
    }

    async fn collect_output(&self, readers: Vec<JoinHandle<()>>) -> Result<()> {
        for mut reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }

        self.save_log().await
    }

    async fn save_log(&self) -> Result<()> {
        let mut contents = self.log.snapshot().await.join("\n");
        contents.push('\n');
        let path = self.log_path();
        tokio::fs::write(&path, contents).await?;
        debug!("{} log saved to {:?}", self.name, path);
        Ok(())
    }
}

fn spawn_output_reader<R>(name: String, stream: R, log: Arc<LogBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!("{}: {}", name, line);
                    log.append(line).await;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("{} output stream failed: {}", name, err);
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn request_termination(name: &str, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the child has already been reaped.
    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to {} (pid {}): {}", name, pid, err);
        }
    }
}

#[cfg(not(unix))]
fn request_termination(name: &str, child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!("Failed to terminate {}: {}", name, err);
    }
}
