//! Backup Orchestrator
//!
//! Produces dumps with the engine's client tool, stores them in object
//! storage, lists and retires them. Restores live in [`crate::restore`].

pub mod artifact;
pub mod db_dump;
pub mod object_store;
pub mod retention;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::config::BackupSettings;
use crate::errors::{BackupError, ConnectionError, StorageError};
use crate::pool::{ConnectionManager, PoolConnector};
use crate::utils::process::run_to_writer;
use crate::vault::ConnectionRecord;
pub use artifact::{Artifact, BackupKind};
pub use db_dump::DumpStream;
pub use object_store::{ObjectStore, S3ObjectStore, StoredObject};
pub use retention::{CleanupReport, RetentionPolicy};

pub const DEFAULT_PREFIX: &str = "backups";
const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Which connection a backup or restore runs against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackupTarget {
    #[default]
    Active,
    Connection(String),
}

/// Resolves a target to a record with its decrypted password.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_target(&self, target: &BackupTarget) -> Result<ConnectionRecord, ConnectionError>;
}

#[async_trait]
impl<C: PoolConnector> TargetResolver for ConnectionManager<C> {
    async fn resolve_target(&self, target: &BackupTarget) -> Result<ConnectionRecord, ConnectionError> {
        let id = match target {
            BackupTarget::Active => self
                .current_connection_id()
                .await
                .ok_or(ConnectionError::NoActiveConnection)?,
            BackupTarget::Connection(id) => id.clone(),
        };
        self.store()
            .get_connection(&id)
            .await?
            .ok_or(ConnectionError::NotFound(id))
    }
}

/// What the scheduler needs from the orchestrator.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run_backup(
        &self,
        kind: BackupKind,
        retention_days: Option<u32>,
    ) -> Result<Artifact, BackupError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_bytes: u64,
    pub newest: Option<chrono::DateTime<Utc>>,
    pub oldest: Option<chrono::DateTime<Utc>>,
    pub by_kind: BTreeMap<String, usize>,
}

pub struct BackupOrchestrator {
    resolver: Arc<dyn TargetResolver>,
    storage: Option<Arc<dyn ObjectStore>>,
    prefix: String,
    settings: BackupSettings,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    cleanup_lock: Mutex<()>,
}

impl BackupOrchestrator {
    /// `storage` may be absent; stored backups then fail with a
    /// configuration error while streaming still works.
    pub fn new(
        resolver: Arc<dyn TargetResolver>,
        storage: Option<Arc<dyn ObjectStore>>,
        prefix: Option<String>,
        settings: BackupSettings,
    ) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        Self {
            resolver,
            storage,
            prefix,
            settings,
            inflight: DashMap::new(),
            cleanup_lock: Mutex::new(()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    pub(crate) fn storage(&self) -> Result<&Arc<dyn ObjectStore>, BackupError> {
        self.storage.as_ref().ok_or_else(|| {
            StorageError::NotConfigured(
                "set backup.storage in the secret store or s3_storage in config.json".into(),
            )
            .into()
        })
    }

    pub(crate) async fn resolve(&self, target: &BackupTarget) -> Result<ConnectionRecord, BackupError> {
        Ok(self.resolver.resolve_target(target).await?)
    }

    /// Per-target lock; backups and restores on one connection never overlap.
    pub(crate) fn target_lock(&self, connection_id: &str) -> Arc<Mutex<()>> {
        self.inflight
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn is_own_key(&self, key: &str) -> bool {
        key.strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|name| !name.is_empty() && !name.contains('/'))
    }

    fn check_key(&self, key: &str) -> Result<(), BackupError> {
        if self.is_own_key(key) {
            Ok(())
        } else {
            Err(BackupError::InvalidArtifact(format!(
                "{} is not under {}/",
                key, self.prefix
            )))
        }
    }

    /// Backs up the active connection.
    pub async fn create_backup(&self, kind: BackupKind) -> Result<Artifact, BackupError> {
        self.create_backup_for(&BackupTarget::Active, kind).await
    }

    pub async fn create_backup_for(
        &self,
        target: &BackupTarget,
        kind: BackupKind,
    ) -> Result<Artifact, BackupError> {
        let artifact = self.create_serialized(target, kind).await?;
        let report = self.cleanup_old_backups().await;
        if !report.deleted.is_empty() {
            tracing::info!(deleted = report.deleted.len(), "retention removed old backups");
        }
        Ok(artifact)
    }

    async fn create_serialized(
        &self,
        target: &BackupTarget,
        kind: BackupKind,
    ) -> Result<Artifact, BackupError> {
        let record = self.resolve(target).await?;
        let lock = self.target_lock(&record.id);
        let _guard = lock.lock().await;
        self.create_backup_locked(&record, kind).await
    }

    /// Caller must hold the target lock for `record`.
    pub(crate) async fn create_backup_locked(
        &self,
        record: &ConnectionRecord,
        kind: BackupKind,
    ) -> Result<Artifact, BackupError> {
        let storage = self.storage()?;
        let started = std::time::Instant::now();
        let created_at = Utc::now().trunc_subsecs(3);
        let filename = artifact::artifact_filename(&record.database, kind, created_at);
        let key = artifact::artifact_key(&self.prefix, &filename);

        // Spool to disk; the temp file is removed when `spool` drops.
        let spool = match &self.settings.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let mut sink = tokio::fs::File::from_std(spool.reopen()?);

        let (tool, cmd) = db_dump::dump_command(record, &self.settings)?;
        tracing::info!(
            connection_id = %record.id,
            target = %record.display_target(),
            tool = %tool.name,
            %kind,
            "starting dump"
        );
        let summary = run_to_writer(cmd, &tool.name, &mut sink, self.settings.tool_timeout).await?;
        drop(sink);

        let metadata = HashMap::from([
            ("database".to_string(), record.database.clone()),
            ("kind".to_string(), kind.to_string()),
            ("host".to_string(), record.host.clone()),
            ("engine".to_string(), record.kind.to_string()),
            ("checksum-sha256".to_string(), summary.sha256.clone()),
            ("created-at".to_string(), created_at.to_rfc3339()),
        ]);
        let etag = storage.put_file(&key, spool.path(), metadata).await?;

        tracing::info!(
            key = %key,
            size = summary.size,
            duration_ms = started.elapsed().as_millis() as u64,
            "backup stored"
        );
        Ok(Artifact {
            key,
            filename,
            size: summary.size,
            etag,
            sha256: Some(summary.sha256),
            created_at,
            kind: Some(kind),
            database: record.database.clone(),
        })
    }

    /// Streams a dump of `target` without storing it. The target's lock is
    /// held until the stream is exhausted or dropped, so a stream never
    /// overlaps a stored backup or a restore of the same connection.
    pub async fn stream_backup(&self, target: &BackupTarget) -> Result<DumpStream, BackupError> {
        let record = self.resolve(target).await?;
        let guard = self.target_lock(&record.id).lock_owned().await;
        let filename = artifact::artifact_filename(
            &record.database,
            BackupKind::Manual,
            Utc::now().trunc_subsecs(3),
        );
        tracing::info!(connection_id = %record.id, %filename, "streaming dump");
        Ok(DumpStream::spawn(&record, &self.settings, filename)?.holding(guard))
    }

    /// Newest first. Keys outside the naming scheme are skipped.
    pub async fn list_backups(&self) -> Result<Vec<Artifact>, BackupError> {
        let storage = self.storage()?;
        let objects = storage.list(&format!("{}/", self.prefix)).await?;
        let mut artifacts: Vec<Artifact> = objects
            .iter()
            .filter(|o| self.is_own_key(&o.key))
            .filter_map(|o| {
                let parsed = Artifact::from_stored(o);
                if parsed.is_none() {
                    tracing::debug!(key = %o.key, "ignoring object outside backup naming scheme");
                }
                parsed
            })
            .collect();
        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.key.cmp(&a.key)));
        Ok(artifacts)
    }

    /// Idempotent.
    pub async fn delete_backup(&self, key: &str) -> Result<(), BackupError> {
        self.check_key(key)?;
        self.storage()?.delete(key).await?;
        tracing::info!(key, "backup deleted");
        Ok(())
    }

    pub async fn generate_download_url(&self, key: &str, ttl: Duration) -> Result<String, BackupError> {
        self.check_key(key)?;
        if ttl.is_zero() || ttl > MAX_PRESIGN_TTL {
            return Err(BackupError::InvalidArtifact(format!(
                "download link lifetime must be between 1 second and {} seconds",
                MAX_PRESIGN_TTL.as_secs()
            )));
        }
        let storage = self.storage()?;
        if storage.head(key).await?.is_none() {
            return Err(BackupError::ArtifactNotFound(key.to_string()));
        }
        Ok(storage.presign_get(key, ttl).await?)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_backups: self.settings.max_backups,
            max_age_days: self.settings.max_age_days,
        }
    }

    pub async fn cleanup_old_backups(&self) -> CleanupReport {
        self.cleanup_with_policy(self.retention_policy()).await
    }

    /// Never fails; listing and deletion errors are logged and reported.
    pub async fn cleanup_with_policy(&self, policy: RetentionPolicy) -> CleanupReport {
        let _guard = self.cleanup_lock.lock().await;
        let artifacts = match self.list_backups().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!(error = %e, "retention cleanup skipped; listing failed");
                return CleanupReport {
                    error: Some(e.to_string()),
                    ..CleanupReport::default()
                };
            }
        };

        let mut report = CleanupReport {
            examined: artifacts.len(),
            ..CleanupReport::default()
        };
        let doomed = retention::plan_retention(&artifacts, policy, Utc::now());
        let Ok(storage) = self.storage() else {
            return report;
        };
        for key in doomed {
            match storage.delete(&key).await {
                Ok(()) => {
                    tracing::info!(key = %key, "retention deleted backup");
                    report.deleted.push(key);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "retention failed to delete backup");
                    report.failed.push(retention::CleanupFailure {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn get_backup_stats(&self) -> Result<BackupStats, BackupError> {
        let artifacts = self.list_backups().await?;
        let mut stats = BackupStats {
            count: artifacts.len(),
            total_bytes: artifacts.iter().map(|a| a.size).sum(),
            newest: artifacts.first().map(|a| a.created_at),
            oldest: artifacts.last().map(|a| a.created_at),
            by_kind: BTreeMap::new(),
        };
        for a in &artifacts {
            let kind = a.kind.map_or("legacy", BackupKind::as_str);
            *stats.by_kind.entry(kind.to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl BackupRunner for BackupOrchestrator {
    async fn run_backup(
        &self,
        kind: BackupKind,
        retention_days: Option<u32>,
    ) -> Result<Artifact, BackupError> {
        let artifact = self
            .create_serialized(&BackupTarget::Active, kind)
            .await?;
        let mut policy = self.retention_policy();
        if let Some(days) = retention_days {
            policy.max_age_days = i64::from(days.max(1));
        }
        self.cleanup_with_policy(policy).await;
        Ok(artifact)
    }
}
