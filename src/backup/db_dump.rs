use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::process::Command;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;

use crate::config::BackupSettings;
use crate::errors::BackupError;
use crate::utils::process::{collect_stderr, exit_failure, kill_quietly, spawn_error};
use crate::utils::{resolve_tool, ToolCommand};
use crate::vault::{ConnectionRecord, DatabaseKind, SslMode};

pub fn dump_tool_name(kind: DatabaseKind) -> &'static str {
    match kind {
        DatabaseKind::Postgres => "pg_dump",
        DatabaseKind::Mysql => "mysqldump",
    }
}

pub(crate) fn mysql_ssl_arg(mode: SslMode) -> Option<&'static str> {
    match mode {
        SslMode::Prefer => None,
        SslMode::Disable => Some("--ssl-mode=DISABLED"),
        SslMode::Require => Some("--ssl-mode=REQUIRED"),
        SslMode::VerifyCa => Some("--ssl-mode=VERIFY_CA"),
        SslMode::VerifyFull => Some("--ssl-mode=VERIFY_IDENTITY"),
    }
}

/// Passes the password through the environment, never argv, so it does not
/// show up in process listings.
pub(crate) fn apply_credentials(cmd: &mut Command, record: &ConnectionRecord) {
    match record.kind {
        DatabaseKind::Postgres => {
            cmd.env("PGPASSWORD", &record.password)
                .env("PGSSLMODE", record.ssl_mode.as_str())
                .env("PGCONNECT_TIMEOUT", "10");
        }
        DatabaseKind::Mysql => {
            cmd.env("MYSQL_PWD", &record.password);
        }
    }
}

/// Connection arguments for the dump tool, appended after any override args.
pub fn dump_args(record: &ConnectionRecord) -> Vec<String> {
    let mut args: Vec<String> = match record.kind {
        DatabaseKind::Postgres => vec![
            "--host".into(),
            record.host.clone(),
            "--port".into(),
            record.port.to_string(),
            "--username".into(),
            record.username.clone(),
            "--no-password".into(),
            "--clean".into(),
            "--if-exists".into(),
            "--no-owner".into(),
            "--dbname".into(),
        ],
        DatabaseKind::Mysql => {
            let mut args = vec![
                "--host".into(),
                record.host.clone(),
                "--port".into(),
                record.port.to_string(),
                "--user".into(),
                record.username.clone(),
                "--single-transaction".into(),
                "--routines".into(),
                "--triggers".into(),
                "--add-drop-table".into(),
            ];
            args.extend(mysql_ssl_arg(record.ssl_mode).map(String::from));
            args
        }
    };
    args.push(record.database.clone());
    args
}

/// Resolved tool plus a ready-to-spawn command for dumping `record`.
pub fn dump_command(
    record: &ConnectionRecord,
    settings: &BackupSettings,
) -> Result<(ToolCommand, Command), BackupError> {
    let tool = resolve_tool(dump_tool_name(record.kind), settings.dump_tool.as_ref())?;
    let mut cmd = tool.command();
    cmd.args(dump_args(record));
    apply_credentials(&mut cmd, record);
    Ok((tool, cmd))
}

/// Live dump output for direct download. Nothing is buffered beyond one
/// read chunk; dropping the stream kills the dump process.
pub struct DumpStream {
    pub filename: String,
    inner: BoxStream<'static, Result<Bytes, BackupError>>,
    target_guard: Option<OwnedMutexGuard<()>>,
}

impl DumpStream {
    pub fn content_type(&self) -> &'static str {
        "application/sql"
    }

    /// Spawns the dump tool. The final item is an error when the tool exits
    /// non-zero or runs past the timeout.
    pub fn spawn(
        record: &ConnectionRecord,
        settings: &BackupSettings,
        filename: String,
    ) -> Result<Self, BackupError> {
        let (tool, mut cmd) = dump_command(record, settings)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| spawn_error(&tool.name, e))?;
        let stderr_task = collect_stderr(child.stderr.take());
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::Stream(format!("{} stdout was not captured", tool.name)))?;

        let deadline = Instant::now() + settings.tool_timeout;
        let secs = settings.tool_timeout.as_secs();
        let tool_name = tool.name.clone();

        let body = ReaderStream::new(stdout)
            .map_err(|e| BackupError::Stream(e.to_string()))
            .take_until(tokio::time::sleep_until(deadline));

        let tail = stream::once(async move {
            let timed_out = |tool: String| BackupError::Timeout { tool, secs };
            if Instant::now() >= deadline {
                kill_quietly(&mut child, &tool_name).await;
                return Err(timed_out(tool_name));
            }
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Err(_) => {
                    kill_quietly(&mut child, &tool_name).await;
                    Err(timed_out(tool_name))
                }
                Ok(Err(e)) => Err(BackupError::Io(e)),
                Ok(Ok(status)) if status.success() => {
                    tracing::info!(tool = %tool_name, "streamed dump finished");
                    Ok(())
                }
                Ok(Ok(status)) => {
                    let stderr = stderr_task.await.unwrap_or_default();
                    Err(exit_failure(&tool_name, status, stderr))
                }
            }
        })
        .filter_map(|outcome| async move { outcome.err().map(Err::<Bytes, BackupError>) });

        Ok(Self {
            filename,
            inner: body.chain(tail).boxed(),
            target_guard: None,
        })
    }

    /// Keeps the target's lock until the stream ends or is dropped.
    pub(crate) fn holding(mut self, guard: OwnedMutexGuard<()>) -> Self {
        self.target_guard = Some(guard);
        self
    }
}

impl futures::Stream for DumpStream {
    type Item = Result<Bytes, BackupError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            self.target_guard = None;
        }
        polled
    }
}
