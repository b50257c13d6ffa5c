//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is spawned with `kill_on_drop(true)`, so dropping the returned
/// future also kills the process.
///
/// # Example
///
/// ```no_run
/// use sc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> sc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/track.mp3")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

enum Outcome {
    Finished(std::io::Result<(ExitStatus, String)>),
    TimedOut(Duration),
    Cancelled,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Run without a deadline of its own; the caller bounds the run through
    /// the cancellation token instead.
    pub fn without_timeout(&mut self) -> &mut Self {
        self.timeout = None;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`sc_core::Error::Timeout`] if the process outlives the timeout.
    /// - [`sc_core::Error::Tool`] if spawning fails or the process exits with
    ///   a non-zero status (message includes stderr).
    pub async fn execute(&self) -> sc_core::Result<ToolOutput> {
        self.execute_streaming(&CancellationToken::new(), |_| {})
            .await
    }

    /// Execute the command, handing each stdout line to `on_line` as it
    /// arrives, and killing the child if `cancel` fires.
    ///
    /// The full stdout is still returned in [`ToolOutput::stdout`].
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), plus [`sc_core::Error::Cancelled`]
    /// when the token fires first.
    pub async fn execute_streaming<F>(
        &self,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> sc_core::Result<ToolOutput>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = %program_name, args = ?self.args, "spawning");

        let mut child = cmd.spawn().map_err(|e| sc_core::Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| sc_core::Error::Tool {
            tool: program_name.clone(),
            message: "stdout was not captured".into(),
        })?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_all(stderr)));

        let deadline = async {
            match self.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        let outcome = tokio::select! {
            finished = drive(&mut child, stdout, &mut on_line) => Outcome::Finished(finished),
            after = deadline => Outcome::TimedOut(after),
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let (status, stdout) = match outcome {
            Outcome::Finished(Ok(done)) => done,
            Outcome::Finished(Err(e)) => {
                let _ = child.kill().await;
                return Err(sc_core::Error::Tool {
                    tool: program_name,
                    message: format!("I/O error waiting for process: {e}"),
                });
            }
            Outcome::TimedOut(after) => {
                let _ = child.kill().await;
                tracing::warn!(tool = %program_name, ?after, "killed after timeout");
                return Err(sc_core::Error::Timeout {
                    tool: program_name,
                    after,
                });
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                tracing::debug!(tool = %program_name, "killed on cancellation");
                return Err(sc_core::Error::Cancelled { tool: program_name });
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(sc_core::Error::Tool {
                tool: program_name,
                message: format!("exited with status {}: {}", status, stderr.trim()),
            });
        }

        Ok(ToolOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Pump stdout line by line until EOF, then reap the child.
async fn drive<F>(
    child: &mut Child,
    stdout: impl AsyncRead + Unpin,
    on_line: &mut F,
) -> std::io::Result<(ExitStatus, String)>
where
    F: FnMut(&str) + Send,
{
    let mut reader = BufReader::new(stdout);
    let mut collected = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        on_line(line);
        collected.push_str(line);
        collected.push('\n');
    }

    let status = child.wait().await?;
    Ok((status, collected))
}

async fn read_all(mut pipe: impl AsyncRead + Unpin) -> String {
    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes).await;
    String::from_utf8_lossy(&bytes).into_owned()
}
