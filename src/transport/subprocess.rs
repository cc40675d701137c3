use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::GeminiOptions;
use crate::error::GeminiError;
use crate::transport::args::build_args;
use crate::transport::{CapturedOutput, Transport};

pub const DEFAULT_EXECUTABLE: &str = "gemini";

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Runs the gemini CLI once per `execute` and captures its output.
pub struct SubprocessTransport {
    executable: String,
    base_args: Vec<String>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    max_output_bytes: usize,
    /// Set by `connect`; `None` means not connected.
    resolved: Option<PathBuf>,
    /// Process group leader of the in-flight execution, if any.
    active_pid: Option<u32>,
}

impl Default for SubprocessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessTransport {
    pub fn new() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            base_args: Vec::new(),
            timeout: None,
            cancellation: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            resolved: None,
            active_pid: None,
        }
    }

    /// Binary name (looked up on `PATH`) or path.
    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Arguments placed before the generated CLI arguments.
    pub fn base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Token that aborts an in-flight `execute` when cancelled.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.resolved.is_some()
    }

    async fn run(
        &mut self,
        executable: PathBuf,
        prompt: &str,
        options: &GeminiOptions,
    ) -> Result<CapturedOutput, GeminiError> {
        let start = Instant::now();
        let limit = self.max_output_bytes;
        let cli_args = build_args(options)?;
        let exe_name = executable.display().to_string();

        let mut cmd = Command::new(&executable);
        cmd.args(&self.base_args)
            .args(&cli_args)
            .env("GEMINI_CODE_SDK", "rust")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0) // so the whole tree can be killed, not just the leader
            .kill_on_drop(true);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GeminiError::Connection(format!("failed to spawn {exe_name}: {e}")))?;

        let (Some(mut stdin), Some(stdout_pipe), Some(stderr_pipe)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(GeminiError::Connection(format!(
                "stdio pipes unavailable for {exe_name}"
            )));
        };

        // Written from a separate task: a prompt larger than the pipe buffer
        // would otherwise deadlock against a child blocked on a full stdout.
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            // drop closes the pipe; the child sees EOF
        });

        let child_pid = child.id();
        self.active_pid = child_pid;

        let read_future = async move {
            let mut stdout_handle = spawn_capture(stdout_pipe, limit);
            let mut stderr_handle = spawn_capture(stderr_pipe, limit);

            // A reader that hit the cap leaves the child blocked on a full
            // pipe, so the other reader never sees EOF unless the group dies.
            let (stdout_buf, stderr_buf) = tokio::select! {
                result = &mut stdout_handle => {
                    let buf = joined(result)?;
                    if buf.len() > limit
                        && let Some(pid) = child_pid
                    {
                        kill_process_group(pid);
                    }
                    (buf, joined(stderr_handle.await)?)
                }
                result = &mut stderr_handle => {
                    let buf = joined(result)?;
                    if buf.len() > limit
                        && let Some(pid) = child_pid
                    {
                        kill_process_group(pid);
                    }
                    (joined(stdout_handle.await)?, buf)
                }
            };
            let status = child.wait().await?;
            Ok::<(Vec<u8>, Vec<u8>, ExitStatus), std::io::Error>((stdout_buf, stderr_buf, status))
        };

        let outcome = tokio::select! {
            result = read_future => Ok(result),
            _ = deadline(self.timeout) => Err(GeminiError::Timeout(elapsed_ms(start))),
            _ = cancelled(self.cancellation.as_ref()) => Err(GeminiError::Cancelled(elapsed_ms(start))),
        };
        self.active_pid = None;

        let (stdout, stderr, status) = match outcome {
            Ok(result) => result.map_err(|e| {
                GeminiError::Execution(format!("failed to read from {exe_name}: {e}"))
            })?,
            Err(e) => {
                if let Some(pid) = child_pid {
                    kill_process_group(pid);
                }
                tracing::warn!(executable = %exe_name, error = %e, "CLI execution aborted");
                return Err(e);
            }
        };

        if stdout.len() > limit || stderr.len() > limit {
            return Err(GeminiError::Execution(format!(
                "{exe_name} produced more than {limit} bytes of output"
            )));
        }

        let output = CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        };

        if !output.success() {
            tracing::warn!(
                executable = %exe_name,
                code = ?output.exit_code,
                "CLI process exited unsuccessfully"
            );
        }

        if !output.stderr.is_empty() {
            tracing::debug!(executable = %exe_name, stderr = %output.stderr, "CLI stderr output");
        }

        Ok(output)
    }
}

impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<(), GeminiError> {
        if self.resolved.is_some() {
            return Ok(());
        }

        let path = which::which(&self.executable).map_err(|e| {
            tracing::debug!(executable = %self.executable, error = %e, "executable lookup failed");
            GeminiError::CliNotFound(self.executable.clone())
        })?;

        tracing::debug!(executable = %path.display(), "gemini CLI resolved");
        self.resolved = Some(path);
        Ok(())
    }

    async fn execute(
        &mut self,
        prompt: &str,
        options: &GeminiOptions,
    ) -> Result<CapturedOutput, GeminiError> {
        let Some(executable) = self.resolved.clone() else {
            return Err(GeminiError::Connection(
                "execute called before connect".to_string(),
            ));
        };
        self.run(executable, prompt, options).await
    }

    async fn disconnect(&mut self) -> Result<(), GeminiError> {
        // Only set when an execute future was dropped mid-flight.
        if let Some(pid) = self.active_pid.take() {
            tracing::debug!(pid, "killing abandoned CLI process group");
            kill_process_group(pid);
        }
        self.resolved = None;
        Ok(())
    }
}

/// Read a pipe to EOF, keeping at most `limit + 1` bytes so overflow is detectable.
fn spawn_capture<R>(pipe: R, limit: usize) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::with_capacity(limit.min(64 * 1024));
        let mut capped = pipe.take((limit as u64).saturating_add(1));
        capped.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

fn joined(
    result: Result<std::io::Result<Vec<u8>>, JoinError>,
) -> std::io::Result<Vec<u8>> {
    result.map_err(std::io::Error::other)?
}

fn kill_process_group(pid: u32) {
    // process_group(0) made the child its own group leader, so pgid == pid.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
