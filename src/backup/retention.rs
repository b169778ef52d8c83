use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::artifact::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub max_age_days: i64,
}

/// Outcome of one cleanup pass. Cleanup never fails; problems end up here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<CleanupFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub key: String,
    pub error: String,
}

/// Keys to delete: everything past the newest `max_backups`, plus anything
/// strictly older than `max_age_days` that the count rule did not already
/// pick. The newest artifact is always kept.
pub fn plan_retention(
    artifacts: &[Artifact],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.key.cmp(&a.key)));

    let keep = policy.max_backups.max(1);
    let cutoff = now - Duration::days(policy.max_age_days);

    let mut doomed: Vec<String> = ordered
        .iter()
        .skip(keep)
        .map(|a| a.key.clone())
        .collect();
    doomed.extend(
        ordered
            .iter()
            .take(keep)
            .skip(1)
            .filter(|a| a.created_at < cutoff)
            .map(|a| a.key.clone()),
    );
    doomed
}
