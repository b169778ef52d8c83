use sha2::{Digest, Sha256};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::errors::BackupError;

const STDERR_LIMIT: usize = 8 * 1024;
const COPY_BUF: usize = 64 * 1024;

/// Captured result of a finished child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Byte count and SHA-256 of everything copied from a child's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub size: u64,
    pub sha256: String,
}

pub(crate) fn lossy_trimmed(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut cut = STDERR_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

pub(crate) fn spawn_error(tool: &str, e: std::io::Error) -> BackupError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BackupError::ToolNotFound {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    } else {
        BackupError::Io(e)
    }
}

pub(crate) fn collect_stderr<R>(stderr: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        lossy_trimmed(&buf)
    })
}

pub(crate) fn exit_failure(tool: &str, status: ExitStatus, stderr: String) -> BackupError {
    BackupError::ToolFailed {
        tool: tool.to_string(),
        exit_code: status.code(),
        stderr,
    }
}

pub(crate) async fn kill_quietly(child: &mut Child, tool: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool, error = %e, "failed to kill timed out child");
    }
}

/// Copies the child's stdout into `sink` while hashing it. Fails on a
/// non-zero exit or when `timeout` elapses, in which case the child is killed.
pub async fn run_to_writer<W>(
    mut cmd: Command,
    tool: &str,
    sink: &mut W,
    timeout: Duration,
) -> Result<CopySummary, BackupError>
where
    W: AsyncWrite + Unpin,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    let stderr_task = collect_stderr(child.stderr.take());
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackupError::Stream(format!("{} stdout was not captured", tool)))?;

    let copy = async {
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        sink.flush().await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, size, hex::encode(hasher.finalize())))
    };

    let (status, size, sha256) = match tokio::time::timeout(timeout, copy).await {
        Ok(result) => result?,
        Err(_) => {
            kill_quietly(&mut child, tool).await;
            stderr_task.abort();
            return Err(BackupError::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };
    let stderr = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(exit_failure(tool, status, stderr));
    }
    if !stderr.is_empty() {
        tracing::debug!(tool, stderr = %stderr, "tool wrote to stderr");
    }
    Ok(CopySummary { size, sha256 })
}

/// Runs the child to completion with `stdin` as its input. A non-zero exit is
/// returned as output, not as an error; only spawn failures and timeouts fail.
pub async fn run_to_completion(
    mut cmd: Command,
    tool: &str,
    stdin: Stdio,
    timeout: Duration,
) -> Result<ToolOutput, BackupError> {
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(ToolOutput {
                exit_code: output.status.code(),
                stdout: lossy_trimmed(&output.stdout),
                stderr: lossy_trimmed(&output.stderr),
            })
        }
        // Dropping the future drops the child, which kills it.
        Err(_) => Err(BackupError::Timeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}
