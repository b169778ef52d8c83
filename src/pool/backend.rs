use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{MySql, Postgres};

use crate::config::PoolSettings;
use crate::errors::ConnectionError;
use crate::vault::{ConnectionRecord, DatabaseKind, SslMode};

/// A shared, reference-counted handle to one backend's pool.
#[async_trait]
pub trait DatabasePool: Clone + Send + Sync + 'static {
    type Client: Send;

    /// Trivial round trip (`SELECT 1`).
    async fn ping(&self) -> Result<(), ConnectionError>;

    /// Runs one statement and returns the number of rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, ConnectionError>;

    async fn acquire(&self) -> Result<Self::Client, ConnectionError>;

    async fn close(&self);

    /// Host the pool talks to; used in logs and health snapshots.
    fn host(&self) -> &str;
}

/// Builds pools from connection records.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Pool: DatabasePool;

    async fn connect(
        &self,
        record: &ConnectionRecord,
        settings: &PoolSettings,
    ) -> Result<Self::Pool, ConnectionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

#[derive(Debug, Clone)]
pub enum SqlPool {
    Postgres { pool: PgPool, host: String },
    Mysql { pool: MySqlPool, host: String },
}

pub enum SqlClient {
    Postgres(PoolConnection<Postgres>),
    Mysql(PoolConnection<MySql>),
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn mysql_ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Prefer => MySqlSslMode::Preferred,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

fn query_error(e: sqlx::Error) -> ConnectionError {
    ConnectionError::Query(e.to_string())
}

#[async_trait]
impl PoolConnector for SqlxConnector {
    type Pool = SqlPool;

    /// Pools connect lazily; the first health check establishes the first connection.
    async fn connect(
        &self,
        record: &ConnectionRecord,
        settings: &PoolSettings,
    ) -> Result<SqlPool, ConnectionError> {
        let pool = match record.kind {
            DatabaseKind::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&record.host)
                    .port(record.port)
                    .username(&record.username)
                    .password(&record.password)
                    .database(&record.database)
                    .ssl_mode(pg_ssl_mode(record.ssl_mode));
                let pool = PgPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .connect_lazy_with(options);
                SqlPool::Postgres {
                    pool,
                    host: record.host.clone(),
                }
            }
            DatabaseKind::Mysql => {
                let options = MySqlConnectOptions::new()
                    .host(&record.host)
                    .port(record.port)
                    .username(&record.username)
                    .password(&record.password)
                    .database(&record.database)
                    .ssl_mode(mysql_ssl_mode(record.ssl_mode));
                let pool = MySqlPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .connect_lazy_with(options);
                SqlPool::Mysql {
                    pool,
                    host: record.host.clone(),
                }
            }
        };
        tracing::debug!(connection_id = %record.id, target = %record.display_target(), "pool built");
        Ok(pool)
    }
}

#[async_trait]
impl DatabasePool for SqlPool {
    type Client = SqlClient;

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.execute("SELECT 1").await.map(|_| ())
    }

    async fn execute(&self, sql: &str) -> Result<u64, ConnectionError> {
        let affected = match self {
            SqlPool::Postgres { pool, .. } => {
                sqlx::query(sql).execute(pool).await.map_err(query_error)?.rows_affected()
            }
            SqlPool::Mysql { pool, .. } => {
                sqlx::query(sql).execute(pool).await.map_err(query_error)?.rows_affected()
            }
        };
        Ok(affected)
    }

    async fn acquire(&self) -> Result<SqlClient, ConnectionError> {
        match self {
            SqlPool::Postgres { pool, .. } => {
                pool.acquire().await.map(SqlClient::Postgres).map_err(query_error)
            }
            SqlPool::Mysql { pool, .. } => {
                pool.acquire().await.map(SqlClient::Mysql).map_err(query_error)
            }
        }
    }

    async fn close(&self) {
        match self {
            SqlPool::Postgres { pool, .. } => pool.close().await,
            SqlPool::Mysql { pool, .. } => pool.close().await,
        }
    }

    fn host(&self) -> &str {
        match self {
            SqlPool::Postgres { host, .. } | SqlPool::Mysql { host, .. } => host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(kind: DatabaseKind) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            id: "c1".into(),
            name: "primary".into(),
            kind,
            host: "db.internal".into(),
            port: kind.default_port(),
            database: "blog".into(),
            username: "blog".into(),
            password: "pw".into(),
            ssl_mode: SslMode::Disable,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_lazy_pools_build_without_network() {
        let settings = PoolSettings::default();
        let pg = SqlxConnector
            .connect(&record(DatabaseKind::Postgres), &settings)
            .await
            .unwrap();
        assert!(matches!(pg, SqlPool::Postgres { .. }));
        assert_eq!(pg.host(), "db.internal");
        let my = SqlxConnector
            .connect(&record(DatabaseKind::Mysql), &settings)
            .await
            .unwrap();
        assert!(matches!(my, SqlPool::Mysql { .. }));
        pg.close().await;
        my.close().await;
    }

    #[test]
    fn test_ssl_modes_map_per_driver() {
        assert!(matches!(pg_ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
        assert!(matches!(mysql_ssl_mode(SslMode::VerifyFull), MySqlSslMode::VerifyIdentity));
        assert!(matches!(mysql_ssl_mode(SslMode::Disable), MySqlSslMode::Disabled));
    }
}
