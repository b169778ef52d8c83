pub(crate) mod db_restore;

use serde::Serialize;
use std::time::Instant;
use tempfile::NamedTempFile;

use crate::backup::object_store::parse_s3_uri;
use crate::backup::{artifact, BackupKind, BackupOrchestrator, BackupTarget};
use crate::errors::BackupError;
use crate::utils::process::run_to_completion;

/// Whether the pre-restore backup of the target was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyBackupOutcome {
    pub succeeded: bool,
    pub key: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub artifact_key: String,
    pub connection_id: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub safety_backup: SafetyBackupOutcome,
}

impl RestoreReport {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl BackupOrchestrator {
    /// Accepts a full key, a bare filename, or an `s3://bucket/key` URI.
    pub fn resolve_artifact_key(&self, reference: &str) -> Result<String, BackupError> {
        let reference = reference.trim();
        let key = if reference.starts_with("s3://") {
            let (bucket, key) = parse_s3_uri(reference)?;
            let configured = self.storage().ok().and_then(|storage| storage.bucket());
            if let Some(configured) = configured.filter(|configured| *configured != bucket) {
                return Err(BackupError::InvalidArtifact(format!(
                    "{} is not in the configured bucket {}",
                    reference, configured
                )));
            }
            key
        } else if reference.contains('/') {
            reference.to_string()
        } else {
            artifact::artifact_key(self.prefix(), reference)
        };
        if !self.is_own_key(&key) {
            return Err(BackupError::InvalidArtifact(format!(
                "{} is not under {}/",
                key,
                self.prefix()
            )));
        }
        Ok(key)
    }

    /// Applies a stored artifact to `target`.
    ///
    /// A safety backup of the target is attempted first; its failure is
    /// logged and reported but does not block the restore. The downloaded
    /// file is removed on every exit path. A non-zero exit of the restore
    /// tool is returned as [`BackupError::RestoreFailed`] carrying the report.
    pub async fn restore(
        &self,
        artifact_ref: &str,
        target: &BackupTarget,
    ) -> Result<RestoreReport, BackupError> {
        let key = self.resolve_artifact_key(artifact_ref)?;
        let storage = self.storage()?;
        if storage.head(&key).await?.is_none() {
            return Err(BackupError::ArtifactNotFound(key));
        }
        let record = self.resolve(target).await?;

        let lock = self.target_lock(&record.id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let safety_backup = match self.create_backup_locked(&record, BackupKind::Safety).await {
            Ok(safety) => {
                tracing::info!(key = %safety.key, "safety backup taken before restore");
                SafetyBackupOutcome {
                    succeeded: true,
                    key: Some(safety.key),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %record.id, error = %e, "safety backup failed; continuing with restore");
                SafetyBackupOutcome {
                    succeeded: false,
                    key: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let download = match &self.settings().temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let bytes = storage.download_to(&key, download.path()).await?;
        tracing::info!(key = %key, bytes, connection_id = %record.id, "artifact downloaded for restore");

        let (tool, cmd, stdin) = db_restore::restore_command(&record, self.settings(), download.path())?;
        let output = run_to_completion(cmd, &tool.name, stdin, self.settings().tool_timeout).await?;

        let report = RestoreReport {
            artifact_key: key,
            connection_id: record.id.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            safety_backup,
        };
        if !report.success() {
            tracing::error!(
                key = %report.artifact_key,
                exit_code = ?report.exit_code,
                stderr = %report.stderr,
                "restore failed"
            );
            return Err(BackupError::RestoreFailed(Box::new(report)));
        }
        tracing::info!(
            key = %report.artifact_key,
            connection_id = %report.connection_id,
            duration_ms = report.duration_ms,
            "restore completed"
        );
        Ok(report)
    }
}
