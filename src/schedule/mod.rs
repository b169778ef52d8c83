//! Backup Scheduler
//!
//! Schedule definitions are persisted in the Secret Store and materialized
//! as one cancellable tokio task per running schedule. Each fire runs a
//! backup through a [`BackupRunner`] and appends to a capped execution log.

pub mod cron_spec;
pub mod model;

pub use model::{
    ExecutionLogEntry, RunStatus, RunTrigger, ScheduleConfig, ScheduleDefinition, ScheduleStatus,
    ScheduleTemplate, ScheduleUpdate, ScheduleView,
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backup::BackupRunner;
use crate::config::SchedulerSettings;
use crate::errors::{ScheduleError, VaultError};
use crate::vault::{ConfigOptions, SecretStore};
use cron_spec::CronSchedule;

const SCHEDULE_PREFIX: &str = "backup.schedules.";
const LOG_PREFIX: &str = "backup.logs.";
const CONFIG_GROUP: &str = "backup";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn schedule_key(id: &str) -> String {
    format!("{}{}", SCHEDULE_PREFIX, id)
}

fn log_key(id: &str) -> String {
    format!("{}{}", LOG_PREFIX, id)
}

/// Ids become a single config-key segment.
fn validate_id(id: &str) -> Result<(), ScheduleError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ScheduleError::InvalidId(id.to_string()))
    }
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    schedule: CronSchedule,
    tz: Tz,
}

impl Timer {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }

    fn next_run(&self) -> Option<DateTime<Utc>> {
        cron_spec::next_run(&self.schedule, self.tz, Utc::now())
    }
}

struct Inner {
    store: SecretStore,
    runner: Arc<dyn BackupRunner>,
    settings: SchedulerSettings,
    timers: Mutex<HashMap<String, Timer>>,
    definitions_lock: Mutex<()>,
    log_lock: Mutex<()>,
    root: CancellationToken,
}

/// Cheap to clone; clones share the same timers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(store: SecretStore, runner: Arc<dyn BackupRunner>, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                runner,
                settings,
                timers: Mutex::new(HashMap::new()),
                definitions_lock: Mutex::new(()),
                log_lock: Mutex::new(()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Starts a timer for every enabled persisted schedule. Definitions that
    /// no longer validate are logged and skipped. Returns the number started.
    pub async fn initialize(&self) -> Result<usize, ScheduleError> {
        let definitions = self.inner.load_all().await?;
        let mut timers = self.inner.timers.lock().await;
        let mut started = 0;
        for definition in definitions.into_iter().filter(|d| d.enabled) {
            match self.start_timer(&mut timers, &definition) {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::error!(schedule_id = %definition.id, error = %e, "stored schedule is invalid; not started");
                }
            }
        }
        tracing::info!(started, "scheduler initialized");
        Ok(started)
    }

    /// Validates, persists and (when enabled) starts a schedule, replacing
    /// any existing definition and timer with the same id.
    pub async fn create_schedule(
        &self,
        id: &str,
        config: ScheduleConfig,
    ) -> Result<ScheduleView, ScheduleError> {
        validate_id(id)?;
        let timezone = config
            .timezone
            .clone()
            .unwrap_or_else(|| self.inner.settings.default_timezone.clone());
        cron_spec::parse_cron(&config.cron_expression)?;
        cron_spec::parse_timezone(&timezone)?;

        let mut timers = self.inner.timers.lock().await;
        let definition = {
            let _guard = self.inner.definitions_lock.lock().await;
            let existing = self.inner.load(id).await?;
            let now = Utc::now();
            let definition = ScheduleDefinition {
                id: id.to_string(),
                cron_expression: config.cron_expression.trim().to_string(),
                enabled: config.enabled,
                timezone,
                backup_kind: config.backup_kind,
                retention_days: config.retention_days,
                description: config.description,
                last_run: existing.as_ref().and_then(|d| d.last_run),
                created_at: existing.as_ref().map_or(now, |d| d.created_at),
                updated_at: now,
            };
            self.inner.save(&definition).await?;
            definition
        };

        if let Some(old) = timers.remove(id) {
            old.cancel.cancel();
        }
        if definition.enabled {
            self.start_timer(&mut timers, &definition)?;
        }
        tracing::info!(
            schedule_id = %id,
            cron = %definition.cron_expression,
            timezone = %definition.timezone,
            enabled = definition.enabled,
            "schedule saved"
        );
        Ok(view(definition, timers.get(id)))
    }

    /// Merges `update` into the stored definition and recreates it.
    pub async fn update_schedule(
        &self,
        id: &str,
        update: ScheduleUpdate,
    ) -> Result<ScheduleView, ScheduleError> {
        validate_id(id)?;
        let existing = self
            .inner
            .load(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        self.create_schedule(id, existing.config().merge(update)).await
    }

    /// Stops the timer and removes the definition together with its log.
    pub async fn delete_schedule(&self, id: &str) -> Result<(), ScheduleError> {
        validate_id(id)?;
        let mut timers = self.inner.timers.lock().await;
        let _guard = self.inner.definitions_lock.lock().await;
        if self.inner.load(id).await?.is_none() {
            return Err(ScheduleError::NotFound(id.to_string()));
        }
        if let Some(timer) = timers.remove(id) {
            timer.cancel.cancel();
        }
        self.inner.store.delete_config(&schedule_key(id)).await?;
        {
            let _log_guard = self.inner.log_lock.lock().await;
            self.inner.store.delete_config(&log_key(id)).await?;
        }
        tracing::info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Starts the live timer. A no-op when it is already running.
    pub async fn start_schedule(&self, id: &str) -> Result<(), ScheduleError> {
        validate_id(id)?;
        let definition = self
            .inner
            .load(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        let mut timers = self.inner.timers.lock().await;
        if timers.get(id).is_some_and(Timer::is_live) {
            return Ok(());
        }
        self.start_timer(&mut timers, &definition)?;
        tracing::info!(schedule_id = %id, "schedule started");
        Ok(())
    }

    /// Stops the live timer. The definition is kept. Idempotent.
    pub async fn stop_schedule(&self, id: &str) -> Result<(), ScheduleError> {
        validate_id(id)?;
        if self.inner.load(id).await?.is_none() {
            return Err(ScheduleError::NotFound(id.to_string()));
        }
        if let Some(timer) = self.inner.timers.lock().await.remove(id) {
            timer.cancel.cancel();
            tracing::info!(schedule_id = %id, "schedule stopped");
        }
        Ok(())
    }

    /// Runs the schedule's backup now, outside its timer. The run is logged
    /// like a timer fire; a failed backup is returned as an error after logging.
    pub async fn trigger_backup(&self, id: &str) -> Result<ExecutionLogEntry, ScheduleError> {
        validate_id(id)?;
        self.inner.execute(id, RunTrigger::Manual).await
    }

    pub async fn get_schedules(&self) -> Result<Vec<ScheduleView>, ScheduleError> {
        let definitions = self.inner.load_all().await?;
        let timers = self.inner.timers.lock().await;
        Ok(definitions
            .into_iter()
            .map(|definition| {
                let timer = timers.get(&definition.id);
                view(definition, timer)
            })
            .collect())
    }

    pub fn get_schedule_templates(&self) -> &'static [ScheduleTemplate] {
        model::TEMPLATES
    }

    /// Execution log for `id`, newest first.
    pub async fn get_backup_logs(&self, id: &str) -> Result<Vec<ExecutionLogEntry>, ScheduleError> {
        validate_id(id)?;
        let mut entries = self.inner.read_log(id).await?;
        entries.reverse();
        Ok(entries)
    }

    /// Cancels every timer. Runs already in progress get a short grace period.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .timers
            .lock()
            .await
            .drain()
            .map(|(_, timer)| timer.handle)
            .collect();
        let count = handles.len();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("scheduled runs still in progress at shutdown");
        }
        tracing::info!(timers = count, "scheduler shut down");
    }

    fn start_timer(
        &self,
        timers: &mut HashMap<String, Timer>,
        definition: &ScheduleDefinition,
    ) -> Result<(), ScheduleError> {
        let schedule = cron_spec::parse_cron(&definition.cron_expression)?;
        let tz = cron_spec::parse_timezone(&definition.timezone)?;
        if self.inner.root.is_cancelled() {
            tracing::warn!(schedule_id = %definition.id, "scheduler is shut down; timer not started");
            return Ok(());
        }
        let cancel = self.inner.root.child_token();
        let handle = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            definition.id.clone(),
            schedule.clone(),
            tz,
            cancel.clone(),
        ));
        if let Some(old) = timers.insert(
            definition.id.clone(),
            Timer {
                cancel,
                handle,
                schedule,
                tz,
            },
        ) {
            old.cancel.cancel();
        }
        Ok(())
    }
}

fn view(definition: ScheduleDefinition, timer: Option<&Timer>) -> ScheduleView {
    match timer.filter(|t| t.is_live()) {
        Some(timer) => ScheduleView {
            definition,
            status: ScheduleStatus::Running,
            next_run: timer.next_run(),
        },
        None => ScheduleView {
            definition,
            status: ScheduleStatus::Stopped,
            next_run: None,
        },
    }
}

async fn run_timer(
    inner: Weak<Inner>,
    id: String,
    schedule: CronSchedule,
    tz: Tz,
    cancel: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = cron_spec::next_run(&schedule, tz, from) else {
            tracing::warn!(schedule_id = %id, "cron expression has no future fire time");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        last_fire = Some(next);

        let Some(inner) = inner.upgrade() else { break };
        if let Err(e) = inner.execute(&id, RunTrigger::Timer).await {
            tracing::warn!(schedule_id = %id, error = %e, "scheduled backup failed; timer keeps running");
        }
    }
    tracing::debug!(schedule_id = %id, "timer exited");
}

impl Inner {
    async fn load(&self, id: &str) -> Result<Option<ScheduleDefinition>, ScheduleError> {
        let Some(value) = self.store.get_config(&schedule_key(id)).await? else {
            return Ok(None);
        };
        let definition = serde_json::from_value(value).map_err(VaultError::from)?;
        Ok(Some(definition))
    }

    async fn load_all(&self) -> Result<Vec<ScheduleDefinition>, ScheduleError> {
        let entries = self.store.list_config(SCHEDULE_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry.value) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "skipping unreadable schedule definition");
                    None
                }
            })
            .collect())
    }

    async fn save(&self, definition: &ScheduleDefinition) -> Result<(), ScheduleError> {
        let value = serde_json::to_value(definition).map_err(VaultError::from)?;
        self.store
            .set_config(
                &schedule_key(&definition.id),
                value,
                ConfigOptions::group(CONFIG_GROUP),
            )
            .await?;
        Ok(())
    }

    async fn read_log(&self, id: &str) -> Result<Vec<ExecutionLogEntry>, ScheduleError> {
        Ok(self
            .store
            .get_config(&log_key(id))
            .await?
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default())
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), ScheduleError> {
        let _guard = self.log_lock.lock().await;
        if self.load(&entry.schedule_id).await?.is_none() {
            return Ok(());
        }
        let mut entries = self.read_log(&entry.schedule_id).await?;
        entries.push(entry.clone());
        let capacity = self.settings.log_capacity.max(1);
        if entries.len() > capacity {
            let excess = entries.len() - capacity;
            entries.drain(..excess);
        }
        let value = serde_json::to_value(&entries).map_err(VaultError::from)?;
        self.store
            .set_config(&log_key(&entry.schedule_id), value, ConfigOptions::group(CONFIG_GROUP))
            .await?;
        Ok(())
    }

    /// Skipped when the schedule was deleted while the run was in progress.
    async fn record_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<(), ScheduleError> {
        let _guard = self.definitions_lock.lock().await;
        if let Some(mut definition) = self.load(id).await? {
            definition.last_run = Some(at);
            self.save(&definition).await?;
        }
        Ok(())
    }

    async fn execute(&self, id: &str, trigger: RunTrigger) -> Result<ExecutionLogEntry, ScheduleError> {
        let definition = self
            .load(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;
        let timestamp = Utc::now();
        let clock = Instant::now();
        tracing::info!(schedule_id = %id, ?trigger, kind = %definition.backup_kind, "running scheduled backup");

        let result = self
            .runner
            .run_backup(definition.backup_kind, definition.retention_days)
            .await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        let entry = match &result {
            Ok(artifact) => ExecutionLogEntry {
                schedule_id: id.to_string(),
                status: RunStatus::Success,
                trigger,
                duration_ms,
                error: None,
                artifact_key: Some(artifact.key.clone()),
                timestamp,
            },
            Err(e) => ExecutionLogEntry {
                schedule_id: id.to_string(),
                status: RunStatus::Failure,
                trigger,
                duration_ms,
                error: Some(e.to_string()),
                artifact_key: None,
                timestamp,
            },
        };

        if let Err(e) = self.append_log(&entry).await {
            tracing::error!(schedule_id = %id, error = %e, "failed to append execution log");
        }
        if let Err(e) = self.record_last_run(id, timestamp).await {
            tracing::error!(schedule_id = %id, error = %e, "failed to record last run");
        }

        match result {
            Ok(artifact) => {
                tracing::info!(schedule_id = %id, key = %artifact.key, duration_ms, "scheduled backup completed");
                Ok(entry)
            }
            Err(e) => {
                tracing::error!(schedule_id = %id, error = %e, duration_ms, "scheduled backup failed");
                Err(ScheduleError::Backup(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupKind;
    use crate::test_support::{memory_store, RecordingRunner};
    use std::sync::atomic::Ordering;

    async fn scheduler_with(runner: &RecordingRunner, settings: SchedulerSettings) -> Scheduler {
        Scheduler::new(memory_store().await, Arc::new(runner.clone()), settings)
    }

    async fn wait_for_runs(runner: &RecordingRunner, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(6);
        while Instant::now() < deadline {
            if runner.run_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stop_keeps_definition_and_clears_next_run() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;

        let created = scheduler
            .create_schedule("daily", ScheduleConfig::new("0 2 * * *"))
            .await
            .unwrap();
        assert_eq!(created.status, ScheduleStatus::Running);
        assert!(created.next_run.is_some());
        assert_eq!(created.definition.timezone, "UTC");

        scheduler.stop_schedule("daily").await.unwrap();
        scheduler.stop_schedule("daily").await.unwrap();

        let schedules = scheduler.get_schedules().await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].definition.id, "daily");
        assert_eq!(schedules[0].status, ScheduleStatus::Stopped);
        assert_eq!(schedules[0].next_run, None);
        assert!(schedules[0].definition.enabled);

        scheduler.start_schedule("daily").await.unwrap();
        let schedules = scheduler.get_schedules().await.unwrap();
        assert_eq!(schedules[0].status, ScheduleStatus::Running);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_definitions_are_not_persisted() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;

        let err = scheduler
            .create_schedule("bad", ScheduleConfig::new("0 2 * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));

        let err = scheduler
            .create_schedule(
                "bad",
                ScheduleConfig {
                    timezone: Some("Nowhere/Land".into()),
                    ..ScheduleConfig::new("0 2 * * *")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTimezone(_)));

        let err = scheduler
            .create_schedule("not.valid", ScheduleConfig::new("0 2 * * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidId(_)));

        assert!(scheduler.get_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_uses_stored_kind_and_logs() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;
        scheduler
            .create_schedule(
                "nightly",
                ScheduleConfig {
                    enabled: false,
                    retention_days: Some(7),
                    ..ScheduleConfig::new("0 2 * * *")
                },
            )
            .await
            .unwrap();

        let entry = scheduler.trigger_backup("nightly").await.unwrap();
        assert_eq!(entry.status, RunStatus::Success);
        assert_eq!(entry.trigger, RunTrigger::Manual);
        assert!(entry.artifact_key.is_some());
        assert_eq!(
            runner.kinds.lock().unwrap().as_slice(),
            &[(BackupKind::Scheduled, Some(7))]
        );

        runner.fail.store(true, Ordering::SeqCst);
        let err = scheduler.trigger_backup("nightly").await.unwrap_err();
        assert!(matches!(err, ScheduleError::Backup(_)));

        let logs = scheduler.get_backup_logs("nightly").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, RunStatus::Failure);
        assert!(logs[0].error.as_deref().unwrap_or_default().contains("run 2 failed"));
        assert_eq!(logs[1].status, RunStatus::Success);

        let schedules = scheduler.get_schedules().await.unwrap();
        assert!(schedules[0].definition.last_run.is_some());

        assert!(matches!(
            scheduler.trigger_backup("missing").await,
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_log_is_capped_ring() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(
            &runner,
            SchedulerSettings {
                log_capacity: 3,
                ..SchedulerSettings::default()
            },
        )
        .await;
        scheduler
            .create_schedule(
                "often",
                ScheduleConfig {
                    enabled: false,
                    ..ScheduleConfig::new("0 * * * *")
                },
            )
            .await
            .unwrap();
        for _ in 0..5 {
            scheduler.trigger_backup("often").await.unwrap();
        }
        let logs = scheduler.get_backup_logs("often").await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].artifact_key.as_deref().unwrap().ends_with("-5.sql"));
        assert!(logs[2].artifact_key.as_deref().unwrap().ends_with("-3.sql"));
    }

    #[tokio::test]
    async fn test_failed_timer_run_keeps_timer_alive() {
        let runner = RecordingRunner::default();
        runner.fail.store(true, Ordering::SeqCst);
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;
        scheduler
            .create_schedule("every-second", ScheduleConfig::new("* * * * * *"))
            .await
            .unwrap();

        assert!(wait_for_runs(&runner, 2).await, "timer should keep firing after failures");
        let schedules = scheduler.get_schedules().await.unwrap();
        assert_eq!(schedules[0].status, ScheduleStatus::Running);
        let logs = scheduler.get_backup_logs("every-second").await.unwrap();
        assert!(logs.iter().all(|e| e.status == RunStatus::Failure && e.trigger == RunTrigger::Timer));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_removes_definition_and_log() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;
        scheduler
            .create_schedule("weekly", ScheduleConfig::new("0 3 * * 0"))
            .await
            .unwrap();
        scheduler.trigger_backup("weekly").await.unwrap();

        scheduler.delete_schedule("weekly").await.unwrap();
        assert!(scheduler.get_schedules().await.unwrap().is_empty());
        assert!(scheduler.get_backup_logs("weekly").await.unwrap().is_empty());
        assert!(matches!(
            scheduler.delete_schedule("weekly").await,
            Err(ScheduleError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.start_schedule("weekly").await,
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_merges_and_recreates() {
        let runner = RecordingRunner::default();
        let scheduler = scheduler_with(&runner, SchedulerSettings::default()).await;
        let created = scheduler
            .create_schedule("daily", ScheduleConfig::new("0 2 * * *"))
            .await
            .unwrap();

        let updated = scheduler
            .update_schedule(
                "daily",
                ScheduleUpdate {
                    cron_expression: Some("30 4 * * *".into()),
                    enabled: Some(false),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.definition.cron_expression, "30 4 * * *");
        assert_eq!(updated.definition.created_at, created.definition.created_at);
        assert_eq!(updated.status, ScheduleStatus::Stopped);

        let err = scheduler
            .update_schedule(
                "daily",
                ScheduleUpdate {
                    cron_expression: Some("every day".into()),
                    ..ScheduleUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
        let stored = scheduler.get_schedules().await.unwrap();
        assert_eq!(stored[0].definition.cron_expression, "30 4 * * *");

        assert!(matches!(
            scheduler.update_schedule("ghost", ScheduleUpdate::default()).await,
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_restarts_enabled_schedules() {
        let store = memory_store().await;
        let runner = RecordingRunner::default();
        let first = Scheduler::new(store.clone(), Arc::new(runner.clone()), SchedulerSettings::default());
        first
            .create_schedule("on", ScheduleConfig::new("0 2 * * *"))
            .await
            .unwrap();
        first
            .create_schedule(
                "off",
                ScheduleConfig {
                    enabled: false,
                    ..ScheduleConfig::new("0 2 * * *")
                },
            )
            .await
            .unwrap();
        first.shutdown().await;
        assert!(first
            .get_schedules()
            .await
            .unwrap()
            .iter()
            .all(|s| s.status == ScheduleStatus::Stopped));

        let second = Scheduler::new(store, Arc::new(runner), SchedulerSettings::default());
        assert_eq!(second.initialize().await.unwrap(), 1);
        let schedules = second.get_schedules().await.unwrap();
        let status = |id: &str| schedules.iter().find(|s| s.definition.id == id).unwrap().status;
        assert_eq!(status("on"), ScheduleStatus::Running);
        assert_eq!(status("off"), ScheduleStatus::Stopped);
        second.shutdown().await;
    }

    #[test]
    fn test_schedule_ids() {
        assert!(validate_id("daily_2am-utc").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a.b").is_err());
        assert!(validate_id(&"x".repeat(65)).is_err());
    }
}
