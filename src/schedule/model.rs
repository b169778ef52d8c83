use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::BackupKind;

/// Persisted form of a schedule, stored as JSON under `backup.schedules.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub timezone: String,
    pub backup_kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    pub fn config(&self) -> ScheduleConfig {
        ScheduleConfig {
            cron_expression: self.cron_expression.clone(),
            enabled: self.enabled,
            timezone: Some(self.timezone.clone()),
            backup_kind: self.backup_kind,
            retention_days: self.retention_days,
            description: self.description.clone(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_kind() -> BackupKind {
    BackupKind::Scheduled
}

/// Input to `create_schedule`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    pub cron_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// IANA name; the scheduler default applies when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_kind")]
    pub backup_kind: BackupKind,
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ScheduleConfig {
    pub fn new(cron_expression: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            enabled: true,
            timezone: None,
            backup_kind: default_kind(),
            retention_days: None,
            description: None,
        }
    }

    pub fn merge(mut self, update: ScheduleUpdate) -> Self {
        if let Some(cron_expression) = update.cron_expression {
            self.cron_expression = cron_expression;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(timezone) = update.timezone {
            self.timezone = Some(timezone);
        }
        if let Some(kind) = update.backup_kind {
            self.backup_kind = kind;
        }
        if let Some(retention_days) = update.retention_days {
            self.retention_days = retention_days;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        self
    }
}

/// Partial update; `None` leaves the field untouched. The doubly optional
/// fields take `Some(None)` to clear a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleUpdate {
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub timezone: Option<String>,
    pub backup_kind: Option<BackupKind>,
    pub retention_days: Option<Option<u32>>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Running,
    Stopped,
}

/// A definition together with its live timer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub definition: ScheduleDefinition,
    pub status: ScheduleStatus,
    /// Only set while the timer is running.
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Timer,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub schedule_id: String,
    pub status: RunStatus,
    pub trigger: RunTrigger,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifact_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub cron_expression: &'static str,
}

pub const TEMPLATES: &[ScheduleTemplate] = &[
    ScheduleTemplate {
        id: "hourly",
        name: "Hourly",
        description: "Every hour on the hour",
        cron_expression: "0 * * * *",
    },
    ScheduleTemplate {
        id: "every-6-hours",
        name: "Every 6 hours",
        description: "At minute 0 past every 6th hour",
        cron_expression: "0 */6 * * *",
    },
    ScheduleTemplate {
        id: "daily",
        name: "Daily",
        description: "Every day at 02:00",
        cron_expression: "0 2 * * *",
    },
    ScheduleTemplate {
        id: "weekdays",
        name: "Weekdays",
        description: "Monday to Friday at 01:30",
        cron_expression: "30 1 * * 1-5",
    },
    ScheduleTemplate {
        id: "weekly",
        name: "Weekly",
        description: "Sundays at 03:00",
        cron_expression: "0 3 * * 0",
    },
    ScheduleTemplate {
        id: "monthly",
        name: "Monthly",
        description: "First day of the month at 04:00",
        cron_expression: "0 4 1 * *",
    },
];
