use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::VaultSettings;
use crate::errors::ConfigError;

/// Lifecycle of the secret store's own database connection up to the first
/// successful attempt, which returns the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Disconnected,
    Connecting { attempt: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &VaultSettings) -> Self {
        Self {
            max_attempts: settings.connect_retries.max(1),
            base_delay: settings.connect_backoff,
            max_delay: settings.connect_backoff_cap,
        }
    }

    /// Exponential backoff for the wait after `attempt` failed, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Drives `Disconnected -> Connecting` until an attempt succeeds, falling
/// back to `Disconnected` on each failure until the policy is exhausted.
pub async fn connect_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    mut connect: F,
) -> Result<T, ConfigError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut state = ConnectState::Disconnected;
    let mut attempts = 0u32;
    let mut last_error = String::from("no attempt made");

    loop {
        state = match state {
            ConnectState::Disconnected => {
                if attempts >= policy.max_attempts {
                    return Err(ConfigError::StoreUnreachable {
                        attempts,
                        last_error,
                    });
                }
                attempts += 1;
                ConnectState::Connecting { attempt: attempts }
            }
            ConnectState::Connecting { attempt } => match connect().await {
                Ok(value) => {
                    tracing::debug!(attempt, "secret store connected");
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < policy.max_attempts {
                        let delay = policy.delay_after(attempt);
                        tracing::warn!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "secret store connect failed; retrying"
                        );
                        sleep(delay).await;
                    }
                    ConnectState::Disconnected
                }
            },
        };
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

async fn open_pool(settings: &VaultSettings) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&settings.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool_options = if is_in_memory(&settings.database_url) {
        // Every connection to :memory: is a separate database; pin exactly one.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(settings.max_connections)
    };
    pool_options.connect_with(options).await
}

pub async fn connect_store(settings: &VaultSettings) -> Result<SqlitePool, ConfigError> {
    connect_with_retry(RetryPolicy::from_settings(settings), || open_pool(settings)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(8));
        assert_eq!(policy.delay_after(40), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(fast_policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("refused #{}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_configuration_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ConfigError> = connect_with_retry(fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("connection refused") }
        })
        .await;
        match result {
            Err(ConfigError::StoreUnreachable {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "connection refused");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_store_in_memory() {
        let settings = VaultSettings {
            database_url: "sqlite::memory:".to_string(),
            ..VaultSettings::default()
        };
        let pool = connect_store(&settings).await.expect("pool");
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }
}
