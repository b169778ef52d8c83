//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backup::{
    Artifact, BackupKind, BackupOrchestrator, BackupRunner, BackupTarget, ObjectStore,
    StoredObject, TargetResolver,
};
use crate::config::{BackupSettings, PoolSettings, ToolOverride, VaultSecrets};
use crate::errors::{BackupError, ConnectionError, StorageError};
use crate::pool::{ConnectionManager, DatabasePool, PoolConnector};
use crate::vault::{ConnectionConfig, ConnectionRecord, DatabaseKind, SecretStore, SslMode};

pub fn test_secrets() -> VaultSecrets {
    VaultSecrets {
        encryption_key: "test-encryption-key-0123456789".to_string(),
        admin_username: "admin".to_string(),
        admin_password: "admin-password-123".to_string(),
        admin_email: Some("admin@example.com".to_string()),
    }
}

pub async fn memory_store() -> SecretStore {
    SecretStore::open_in_memory(&test_secrets())
        .await
        .expect("in-memory secret store")
}

/// Postgres connection definition with password `pw-<name>`.
pub fn pg_connection(name: &str, host: &str, database: &str) -> ConnectionConfig {
    ConnectionConfig {
        name: name.to_string(),
        kind: DatabaseKind::Postgres,
        host: host.to_string(),
        port: None,
        database: database.to_string(),
        username: "blog".to_string(),
        password: format!("pw-{}", name),
        ssl_mode: SslMode::Prefer,
        is_active: false,
    }
}

pub fn connection_record(kind: DatabaseKind, host: &str) -> ConnectionRecord {
    let now = Utc::now();
    ConnectionRecord {
        id: "conn-1".to_string(),
        name: "primary".to_string(),
        kind,
        host: host.to_string(),
        port: kind.default_port(),
        database: "blog".to_string(),
        username: "blog".to_string(),
        password: "record-secret".to_string(),
        ssl_mode: SslMode::Prefer,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Replaces a client tool with `sh -c <script>`; generated arguments become
/// `$1..$n`.
pub fn sh_tool(script: &str) -> ToolOverride {
    ToolOverride {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string(), "tool".to_string()],
    }
}

// ----- fake pools -----

#[derive(Default)]
struct FakeBackends {
    unreachable: Mutex<HashSet<String>>,
    executed: Mutex<HashMap<String, Vec<String>>>,
}

/// Builds [`FakePool`]s; hosts can be flipped between reachable and not.
#[derive(Clone, Default)]
pub struct FakeConnector {
    backends: Arc<FakeBackends>,
}

impl FakeConnector {
    pub fn set_unreachable(&self, host: &str) {
        self.backends.unreachable.lock().unwrap().insert(host.to_string());
    }

    pub fn set_reachable(&self, host: &str) {
        self.backends.unreachable.lock().unwrap().remove(host);
    }

    pub fn executed(&self, host: &str) -> Vec<String> {
        self.backends
            .executed
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct FakePool {
    host: String,
    backends: Arc<FakeBackends>,
    closed: Arc<AtomicBool>,
}

pub struct FakeClient {
    pub host: String,
}

impl FakePool {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Query("pool is closed".into()));
        }
        if self.backends.unreachable.lock().unwrap().contains(&self.host) {
            return Err(ConnectionError::HealthCheck {
                target: self.host.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DatabasePool for FakePool {
    type Client = FakeClient;

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.check()
    }

    async fn execute(&self, sql: &str) -> Result<u64, ConnectionError> {
        self.check()?;
        self.backends
            .executed
            .lock()
            .unwrap()
            .entry(self.host.clone())
            .or_default()
            .push(sql.to_string());
        Ok(1)
    }

    async fn acquire(&self) -> Result<FakeClient, ConnectionError> {
        self.check()?;
        Ok(FakeClient {
            host: self.host.clone(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl PoolConnector for FakeConnector {
    type Pool = FakePool;

    async fn connect(
        &self,
        record: &ConnectionRecord,
        _settings: &PoolSettings,
    ) -> Result<FakePool, ConnectionError> {
        Ok(FakePool {
            host: record.host.clone(),
            backends: Arc::clone(&self.backends),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

// ----- object storage -----

#[derive(Clone)]
struct MemoryObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
}

/// In-memory [`ObjectStore`]; clones share contents.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, MemoryObject>>>,
    fail_lists: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            MemoryObject {
                data: data.to_vec(),
                metadata: HashMap::new(),
                last_modified: Utc::now(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
    }

    pub fn metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        self.objects.lock().unwrap().get(key).map(|o| o.metadata.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    fn stored(key: &str, object: &MemoryObject) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            size: object.data.len() as u64,
            etag: Some(hex::encode(&Sha256::digest(&object.data)[..16])),
            last_modified: Some(object.last_modified),
        }
    }
}

pub const MEMORY_BUCKET: &str = "bucket";

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: HashMap<String, String>,
    ) -> Result<Option<String>, StorageError> {
        let data = tokio::fs::read(path).await?;
        let object = MemoryObject {
            data,
            metadata,
            last_modified: Utc::now(),
        };
        let etag = Self::stored(key, &object).etag;
        self.objects.lock().unwrap().insert(key.to_string(), object);
        Ok(etag)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StorageError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StorageError::S3Sdk("listing unavailable".into()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| Self::stored(k, o))
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| Self::stored(key, o)))
    }

    async fn download_to(&self, key: &str, destination: &Path) -> Result<u64, StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        tokio::fs::write(destination, &data).await?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("memory://{}?expires_in={}", key, ttl.as_secs()))
    }

    fn bucket(&self) -> Option<&str> {
        Some(MEMORY_BUCKET)
    }
}

// ----- backup fixtures -----

pub struct BackupFixture {
    pub manager: ConnectionManager<FakeConnector>,
    pub storage: MemoryObjectStore,
    pub orchestrator: Arc<BackupOrchestrator>,
}

impl BackupFixture {
    pub fn manager_resolver(&self) -> Arc<dyn TargetResolver> {
        Arc::new(self.manager.clone())
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

async fn fixture(
    settings: BackupSettings,
    storage: MemoryObjectStore,
    with_connection: bool,
) -> BackupFixture {
    let store = memory_store().await;
    if with_connection {
        store
            .create_connection(pg_connection("a", "h1", "d1"))
            .await
            .expect("create connection");
    }
    let manager =
        ConnectionManager::with_connector(store.clone(), FakeConnector::default(), PoolSettings::default());
    manager.initialize().await.expect("initialize manager");
    let orchestrator = Arc::new(BackupOrchestrator::new(
        Arc::new(manager.clone()),
        Some(Arc::new(storage.clone())),
        None,
        settings,
    ));
    BackupFixture {
        manager,
        storage,
        orchestrator,
    }
}

/// Active Postgres connection `a` (host h1, database d1, password pw-a).
pub async fn backup_fixture(settings: BackupSettings) -> BackupFixture {
    fixture(settings, MemoryObjectStore::default(), true).await
}

pub async fn backup_fixture_with_storage(
    settings: BackupSettings,
    storage: MemoryObjectStore,
) -> BackupFixture {
    fixture(settings, storage, true).await
}

pub async fn empty_backup_fixture(settings: BackupSettings) -> BackupFixture {
    fixture(settings, MemoryObjectStore::default(), false).await
}

struct NoTargets;

#[async_trait]
impl TargetResolver for NoTargets {
    async fn resolve_target(&self, _target: &BackupTarget) -> Result<ConnectionRecord, ConnectionError> {
        Err(ConnectionError::NoActiveConnection)
    }
}

/// Orchestrator with no targets and no storage, for pure key handling.
pub fn detached_orchestrator() -> BackupOrchestrator {
    BackupOrchestrator::new(Arc::new(NoTargets), None, None, BackupSettings::default())
}

// ----- scheduler -----

/// Records every run; fails while `fail` is set.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    pub runs: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub kinds: Arc<Mutex<Vec<(BackupKind, Option<u32>)>>>,
}

impl RecordingRunner {
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupRunner for RecordingRunner {
    async fn run_backup(
        &self,
        kind: BackupKind,
        retention_days: Option<u32>,
    ) -> Result<Artifact, BackupError> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.kinds.lock().unwrap().push((kind, retention_days));
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackupError::ToolFailed {
                tool: "pg_dump".into(),
                exit_code: Some(1),
                stderr: format!("run {} failed", n),
            });
        }
        let now = Utc::now();
        Ok(Artifact {
            key: format!("backups/blog-{}-{}.sql", kind, n),
            filename: format!("blog-{}-{}.sql", kind, n),
            size: 10,
            etag: None,
            sha256: None,
            created_at: now,
            kind: Some(kind),
            database: "blog".into(),
        })
    }
}
