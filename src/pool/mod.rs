//! Connection Manager
//!
//! Turns persisted connection records into live pools and exposes exactly one
//! of them as current. A background monitor re-checks every pool.

pub mod backend;
pub mod health;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolSettings;
use crate::errors::ConnectionError;
use crate::vault::{ConnectionRecord, SecretStore};
pub use backend::{DatabasePool, PoolConnector, SqlClient, SqlPool, SqlxConnector};
pub use health::{HealthReport, HealthStatus, PoolHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    ShutDown,
}

struct PoolEntry<P> {
    record: ConnectionRecord,
    pool: P,
}

struct ManagerState<P> {
    lifecycle: Lifecycle,
    pools: HashMap<String, PoolEntry<P>>,
    current: Option<String>,
    health: HashMap<String, PoolHealth>,
}

impl<P> ManagerState<P> {
    fn ensure_running(&self) -> Result<(), ConnectionError> {
        match self.lifecycle {
            Lifecycle::Uninitialized => Err(ConnectionError::NotInitialized),
            Lifecycle::ShutDown => Err(ConnectionError::ShutDown),
            Lifecycle::Running => Ok(()),
        }
    }
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner<C: PoolConnector> {
    store: SecretStore,
    connector: C,
    settings: PoolSettings,
    state: RwLock<ManagerState<C::Pool>>,
    monitor: Mutex<Option<Monitor>>,
}

/// Owns one pool per connection record. Clones share the same state.
pub struct ConnectionManager<C: PoolConnector = SqlxConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: PoolConnector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionManager<SqlxConnector> {
    pub fn new(store: SecretStore, settings: PoolSettings) -> Self {
        Self::with_connector(store, SqlxConnector, settings)
    }
}

impl<C: PoolConnector> ConnectionManager<C> {
    pub fn with_connector(store: SecretStore, connector: C, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connector,
                settings,
                state: RwLock::new(ManagerState {
                    lifecycle: Lifecycle::Uninitialized,
                    pools: HashMap::new(),
                    current: None,
                    health: HashMap::new(),
                }),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &SecretStore {
        &self.inner.store
    }

    /// Builds and checks a pool per record. Unreachable backends are marked
    /// unhealthy; start-up continues with whatever is available.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        {
            let state = self.inner.state.read().await;
            match state.lifecycle {
                Lifecycle::Running => return Ok(()),
                Lifecycle::ShutDown => return Err(ConnectionError::ShutDown),
                Lifecycle::Uninitialized => {}
            }
        }

        let records = self.inner.store.get_database_connections().await?;
        let mut pools = HashMap::new();
        let mut health = HashMap::new();
        for record in records {
            let (entry, status) = self.build_and_check(record).await;
            health.insert(status.connection_id.clone(), status);
            if let Some(entry) = entry {
                pools.insert(entry.record.id.clone(), entry);
            }
        }
        let current = self
            .inner
            .store
            .get_active_connection()
            .await?
            .map(|record| record.id);

        {
            let mut state = self.inner.state.write().await;
            state.pools = pools;
            state.health = health;
            state.current = current.clone();
            state.lifecycle = Lifecycle::Running;
        }
        self.start_monitor().await;

        tracing::info!(
            current = current.as_deref().unwrap_or("none"),
            "connection manager initialized"
        );
        Ok(())
    }

    async fn build_and_check(
        &self,
        record: ConnectionRecord,
    ) -> (Option<PoolEntry<C::Pool>>, PoolHealth) {
        match self.inner.connector.connect(&record, &self.inner.settings).await {
            Ok(pool) => {
                let (status, result) = health::check_pool(
                    &pool,
                    &record.id,
                    &record.name,
                    self.inner.settings.check_timeout,
                )
                .await;
                if let Err(e) = result {
                    tracing::warn!(connection_id = %record.id, error = %e, "initial health check failed; pool marked unhealthy");
                }
                (Some(PoolEntry { record, pool }), status)
            }
            Err(e) => {
                tracing::warn!(connection_id = %record.id, error = %e, "pool build failed");
                let status = PoolHealth::failed(&record.id, &record.name, &record.host, e.to_string());
                (None, status)
            }
        }
    }

    /// Pool of the active connection.
    pub async fn get_current_pool(&self) -> Result<C::Pool, ConnectionError> {
        let state = self.inner.state.read().await;
        state.ensure_running()?;
        let current = state
            .current
            .as_ref()
            .ok_or(ConnectionError::NoActiveConnection)?;
        state
            .pools
            .get(current)
            .map(|entry| entry.pool.clone())
            .ok_or_else(|| ConnectionError::NoPool(current.clone()))
    }

    pub async fn current_connection_id(&self) -> Option<String> {
        self.inner.state.read().await.current.clone()
    }

    /// Checks the target first; the previous pool stays current when the
    /// check or the persist step fails.
    pub async fn switch_database(&self, id: &str) -> Result<(), ConnectionError> {
        let existing = {
            let state = self.inner.state.read().await;
            state.ensure_running()?;
            state
                .pools
                .get(id)
                .map(|entry| (entry.record.updated_at, entry.pool.clone()))
        };

        let record = self
            .inner
            .store
            .get_connection(id)
            .await?
            .ok_or_else(|| ConnectionError::NotFound(id.to_string()))?;

        let (pool, newly_built) = match existing {
            Some((updated_at, pool)) if updated_at == record.updated_at => (pool, false),
            _ => (
                self.inner
                    .connector
                    .connect(&record, &self.inner.settings)
                    .await?,
                true,
            ),
        };

        let (status, checked) = health::check_pool(
            &pool,
            &record.id,
            &record.name,
            self.inner.settings.check_timeout,
        )
        .await;

        let mut state = self.inner.state.write().await;
        state.ensure_running()?;
        state.health.insert(record.id.clone(), status);
        if newly_built {
            if let Some(old) = state.pools.insert(
                record.id.clone(),
                PoolEntry {
                    record: record.clone(),
                    pool: pool.clone(),
                },
            ) {
                old.pool.close().await;
            }
        }

        if let Err(e) = checked {
            tracing::warn!(connection_id = %id, error = %e, "switch rejected; target unreachable");
            return Err(e);
        }

        // Persist and swap while holding the write lock so no reader sees a
        // half-applied switch.
        self.inner.store.set_active_connection(id).await?;
        let previous = state.current.replace(id.to_string());
        tracing::info!(
            connection_id = %id,
            previous = previous.as_deref().unwrap_or("none"),
            target = %record.display_target(),
            "switched current database"
        );
        Ok(())
    }

    pub async fn get_health_status(&self) -> Result<HealthReport, ConnectionError> {
        let state = self.inner.state.read().await;
        state.ensure_running()?;
        let mut pools: Vec<PoolHealth> = state.health.values().cloned().collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(HealthReport {
            current: state.current.clone(),
            pools,
            generated_at: chrono::Utc::now(),
        })
    }

    /// Runs one statement on the current pool; returns rows affected.
    pub async fn query(&self, sql: &str) -> Result<u64, ConnectionError> {
        let pool = self.get_current_pool().await?;
        pool.execute(sql).await
    }

    pub async fn get_client(
        &self,
    ) -> Result<<C::Pool as DatabasePool>::Client, ConnectionError> {
        let pool = self.get_current_pool().await?;
        pool.acquire().await
    }

    /// Re-reads records from the store: builds pools for new or edited
    /// records and closes pools whose record is gone.
    pub async fn refresh(&self) -> Result<(), ConnectionError> {
        self.inner.state.read().await.ensure_running()?;
        let records = self.inner.store.get_database_connections().await?;

        let stale: Vec<ConnectionRecord> = {
            let state = self.inner.state.read().await;
            records
                .iter()
                .filter(|r| {
                    state
                        .pools
                        .get(&r.id)
                        .map_or(true, |entry| entry.record.updated_at != r.updated_at)
                })
                .cloned()
                .collect()
        };

        let mut rebuilt = Vec::new();
        for record in stale {
            rebuilt.push(self.build_and_check(record).await);
        }

        let active = self.inner.store.get_active_connection().await?.map(|r| r.id);
        let mut state = self.inner.state.write().await;
        state.ensure_running()?;
        for (entry, status) in rebuilt {
            let id = status.connection_id.clone();
            state.health.insert(id.clone(), status);
            if let Some(entry) = entry {
                if let Some(old) = state.pools.insert(id, entry) {
                    old.pool.close().await;
                }
            }
        }
        let removed: Vec<String> = state
            .pools
            .keys()
            .filter(|id| !records.iter().any(|r| &r.id == *id))
            .cloned()
            .collect();
        for id in &removed {
            if let Some(entry) = state.pools.remove(id) {
                entry.pool.close().await;
            }
        }
        state
            .health
            .retain(|id, _| records.iter().any(|r| &r.id == id));
        state.current = active;
        tracing::info!(pools = state.pools.len(), removed = removed.len(), "connection manager refreshed");
        Ok(())
    }

    /// Stops the monitor and closes every pool. Later calls fail with
    /// `ConnectionError::ShutDown`.
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.inner.monitor.lock().await.take() {
            monitor.cancel.cancel();
            if let Err(e) = monitor.handle.await {
                tracing::warn!(error = %e, "health monitor task ended abnormally");
            }
        }
        let mut state = self.inner.state.write().await;
        if state.lifecycle == Lifecycle::ShutDown {
            return;
        }
        state.lifecycle = Lifecycle::ShutDown;
        for (_, entry) in state.pools.drain() {
            entry.pool.close().await;
        }
        state.current = None;
        tracing::info!("connection manager shut down");
    }

    async fn start_monitor(&self) {
        let mut slot = self.inner.monitor.lock().await;
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.health_interval;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; initialize already checked.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !run_health_checks(&weak).await {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });
        *slot = Some(Monitor { cancel, handle });
    }

    /// One monitor pass, also callable directly.
    pub async fn check_health_now(&self) -> Result<HealthReport, ConnectionError> {
        run_health_checks(&Arc::downgrade(&self.inner)).await;
        self.get_health_status().await
    }
}

/// Returns false once the manager is gone or shut down.
async fn run_health_checks<C: PoolConnector>(weak: &Weak<Inner<C>>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let targets: Vec<(String, String, C::Pool)> = {
        let state = inner.state.read().await;
        if state.lifecycle != Lifecycle::Running {
            return false;
        }
        state
            .pools
            .values()
            .map(|e| (e.record.id.clone(), e.record.name.clone(), e.pool.clone()))
            .collect()
    };

    let timeout = inner.settings.check_timeout;
    let checks = targets.iter().map(|(id, name, pool)| async move {
        health::check_pool(pool, id, name, timeout).await.0
    });
    let results = futures::future::join_all(checks).await;

    let mut state = inner.state.write().await;
    for status in results {
        if status.status == HealthStatus::Unhealthy {
            tracing::warn!(
                connection_id = %status.connection_id,
                error = status.error.as_deref().unwrap_or(""),
                "health check failed"
            );
        }
        if state.pools.contains_key(&status.connection_id) {
            state.health.insert(status.connection_id.clone(), status);
        }
    }
    true
}
