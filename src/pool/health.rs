use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use super::backend::DatabasePool;
use crate::errors::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Last health check result for one pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolHealth {
    pub connection_id: String,
    pub name: String,
    pub host: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl PoolHealth {
    pub fn unknown(connection_id: &str, name: &str, host: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            status: HealthStatus::Unknown,
            response_time_ms: None,
            error: None,
            checked_at: None,
        }
    }

    pub fn failed(connection_id: &str, name: &str, host: &str, error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error),
            checked_at: Some(Utc::now()),
            ..Self::unknown(connection_id, name, host)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub current: Option<String>,
    pub pools: Vec<PoolHealth>,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn get(&self, connection_id: &str) -> Option<&PoolHealth> {
        self.pools.iter().find(|p| p.connection_id == connection_id)
    }
}

/// Checks `pool` with a bounded wait and records the outcome.
pub async fn check_pool<P: DatabasePool>(
    pool: &P,
    connection_id: &str,
    name: &str,
    timeout: Duration,
) -> (PoolHealth, Result<(), ConnectionError>) {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, pool.ping()).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::HealthCheck {
            target: pool.host().to_string(),
            reason: format!("no response within {} ms", timeout.as_millis()),
        }),
    };
    let elapsed = started.elapsed();
    let health = PoolHealth {
        connection_id: connection_id.to_string(),
        name: name.to_string(),
        host: pool.host().to_string(),
        status: if result.is_ok() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        response_time_ms: Some(elapsed.as_millis() as u64),
        error: result.as_ref().err().map(|e| e.to_string()),
        checked_at: Some(Utc::now()),
    };
    (health, result)
}
