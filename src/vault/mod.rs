//! Secret Store
//!
//! Single source of truth for connection definitions, configuration entries and
//! admin credentials. Sensitive fields are encrypted with AES-256-GCM before
//! they reach the SQLite file.

pub(crate) mod connect;
pub(crate) mod crypto;
pub mod models;
pub(crate) mod password;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::config::{VaultSecrets, VaultSettings};
use crate::errors::VaultError;
use crypto::Cipher;
pub use models::{
    AdminUser, ConfigEntry, ConfigOptions, ConnectionConfig, ConnectionRecord, ConnectionUpdate,
    DatabaseKind, SslMode,
};

const DUMMY_PASSWORD: &str = "dbkeeper-timing-equalizer";
const BOOTSTRAP_ROLE: &str = "superadmin";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS database_connections (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        database_name TEXT NOT NULL,
        username TEXT NOT NULL,
        password_encrypted TEXT NOT NULL,
        ssl_mode TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    // At most one active record, enforced by the database as well.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_database_connections_single_active
        ON database_connections (is_active) WHERE is_active = 1
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        group_name TEXT NOT NULL,
        is_public BOOLEAN NOT NULL DEFAULT 0,
        is_encrypted BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        email TEXT,
        role TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        last_login TEXT,
        created_at TEXT NOT NULL
    )
    "#,
];

fn config_key_regex() -> &'static Regex {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    KEY_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("static config key regex")
    })
}

pub fn validate_config_key(key: &str) -> Result<(), VaultError> {
    if key.len() > 255 || !config_key_regex().is_match(key) {
        return Err(VaultError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Encrypted persistence for connections, configuration and admin users.
///
/// Cheap to clone; every clone shares the same pool and cipher.
#[derive(Clone)]
pub struct SecretStore {
    pool: SqlitePool,
    cipher: Arc<Cipher>,
    dummy_hash: Arc<String>,
}

impl SecretStore {
    /// Opens the store. Fails with a configuration error when the encryption
    /// key or the admin bootstrap credentials are missing.
    pub async fn connect(
        settings: &VaultSettings,
        secrets: &VaultSecrets,
    ) -> Result<Self, VaultError> {
        secrets.validate()?;
        let cipher = Cipher::from_secret(&secrets.encryption_key)?;
        let pool = connect::connect_store(settings).await?;
        Self::from_pool(pool, cipher, secrets).await
    }

    pub async fn open_in_memory(secrets: &VaultSecrets) -> Result<Self, VaultError> {
        let settings = VaultSettings {
            database_url: "sqlite::memory:".to_string(),
            connect_retries: 1,
            ..VaultSettings::default()
        };
        Self::connect(&settings, secrets).await
    }

    async fn from_pool(
        pool: SqlitePool,
        cipher: Cipher,
        secrets: &VaultSecrets,
    ) -> Result<Self, VaultError> {
        let dummy_hash = password::hash_password_blocking(DUMMY_PASSWORD.to_string()).await?;
        let store = Self {
            pool,
            cipher: Arc::new(cipher),
            dummy_hash: Arc::new(dummy_hash),
        };
        store.initialize_schema().await?;
        store.bootstrap_admin(secrets).await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), VaultError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn bootstrap_admin(&self, secrets: &VaultSecrets) -> Result<(), VaultError> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM admin_users WHERE username = ?")
                .bind(&secrets.admin_username)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            self.create_admin(
                &secrets.admin_username,
                &secrets.admin_password,
                secrets.admin_email.as_deref(),
                BOOTSTRAP_ROLE,
            )
            .await?;
            tracing::info!(username = %secrets.admin_username, "bootstrap admin created");
        }
        Ok(())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        self.cipher.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        self.cipher.decrypt(ciphertext)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ----- admin users -----

    pub async fn create_admin(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        role: &str,
    ) -> Result<AdminUser, VaultError> {
        if username.trim().is_empty() {
            return Err(VaultError::InvalidInput("username must not be empty".into()));
        }
        if password.len() < 8 {
            return Err(VaultError::InvalidInput(
                "password must be at least 8 characters".into(),
            ));
        }
        let hash = password::hash_password_blocking(password.to_string()).await?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO admin_users (id, username, password_hash, email, role, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(username)
        .bind(&hash)
        .bind(email)
        .bind(role)
        .bind(now)
        .execute(&self.pool)
        .await;
        if let Err(sqlx::Error::Database(db_err)) = &result {
            if db_err.is_unique_violation() {
                return Err(VaultError::InvalidInput(format!(
                    "admin user {} already exists",
                    username
                )));
            }
        }
        result?;
        Ok(AdminUser {
            id,
            username: username.to_string(),
            email: email.map(str::to_string),
            role: role.to_string(),
            is_active: true,
            last_login: None,
            created_at: now,
        })
    }

    /// Returns the sanitized user on success and `None` on any failure, without
    /// revealing which factor was wrong.
    pub async fn authenticate_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AdminUser>, VaultError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, email, role, is_active, last_login, created_at
             FROM admin_users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            // Same cost as a real verification.
            let _ = password::verify_password_blocking(
                self.dummy_hash.as_ref().clone(),
                password.to_string(),
            )
            .await;
            tracing::info!("admin authentication failed");
            return Ok(None);
        };

        let hash: String = row.try_get("password_hash")?;
        let verified = password::verify_password_blocking(hash, password.to_string()).await?;
        let mut user = admin_from_row(&row)?;
        if !verified || !user.is_active {
            tracing::info!("admin authentication failed");
            return Ok(None);
        }

        let now = Utc::now();
        sqlx::query("UPDATE admin_users SET last_login = ? WHERE id = ?")
            .bind(now)
            .bind(&user.id)
            .execute(&self.pool)
            .await?;
        user.last_login = Some(now);
        tracing::info!(username = %user.username, "admin authenticated");
        Ok(Some(user))
    }

    pub async fn get_admin(&self, username: &str) -> Result<Option<AdminUser>, VaultError> {
        let row = sqlx::query(
            "SELECT id, username, email, role, is_active, last_login, created_at
             FROM admin_users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(admin_from_row).transpose()
    }

    pub async fn change_admin_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> Result<(), VaultError> {
        if new_password.len() < 8 {
            return Err(VaultError::InvalidInput(
                "password must be at least 8 characters".into(),
            ));
        }
        let hash = password::hash_password_blocking(new_password.to_string()).await?;
        let result = sqlx::query("UPDATE admin_users SET password_hash = ? WHERE username = ?")
            .bind(hash)
            .bind(username)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VaultError::AdminNotFound(username.to_string()));
        }
        Ok(())
    }

    // ----- configuration -----

    pub async fn get_config(&self, key: &str) -> Result<Option<Value>, VaultError> {
        let row = sqlx::query(
            "SELECT key, value, group_name, is_public, is_encrypted, created_at, updated_at
             FROM config_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .as_ref()
            .map(|r| self.config_from_row(r))
            .transpose()?
            .map(|entry| entry.value))
    }

    /// Upsert; the last write wins.
    pub async fn set_config(
        &self,
        key: &str,
        value: Value,
        options: ConfigOptions,
    ) -> Result<(), VaultError> {
        validate_config_key(key)?;
        if options.encrypted && options.public {
            return Err(VaultError::InvalidInput(format!(
                "config entry {} cannot be both encrypted and public",
                key
            )));
        }
        let serialized = serde_json::to_string(&value)?;
        let stored = if options.encrypted {
            self.cipher.encrypt(&serialized)?
        } else {
            serialized
        };
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO config_entries (key, value, group_name, is_public, is_encrypted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                group_name = excluded.group_name,
                is_public = excluded.is_public,
                is_encrypted = excluded.is_encrypted,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(stored)
        .bind(&options.group)
        .bind(options.public)
        .bind(options.encrypted)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key, group = %options.group, encrypted = options.encrypted, "config entry saved");
        Ok(())
    }

    pub async fn delete_config(&self, key: &str) -> Result<bool, VaultError> {
        let result = sqlx::query("DELETE FROM config_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Entries whose key starts with `prefix`, values decrypted, ordered by key.
    pub async fn list_config(&self, prefix: &str) -> Result<Vec<ConfigEntry>, VaultError> {
        let rows = sqlx::query(
            "SELECT key, value, group_name, is_public, is_encrypted, created_at, updated_at
             FROM config_entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.config_from_row(r)).collect()
    }

    pub async fn get_public_config(&self) -> Result<Vec<ConfigEntry>, VaultError> {
        let rows = sqlx::query(
            "SELECT key, value, group_name, is_public, is_encrypted, created_at, updated_at
             FROM config_entries WHERE is_public = 1 AND is_encrypted = 0 ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.config_from_row(r)).collect()
    }

    fn config_from_row(&self, row: &SqliteRow) -> Result<ConfigEntry, VaultError> {
        let is_encrypted: bool = row.try_get("is_encrypted")?;
        let raw: String = row.try_get("value")?;
        let json = if is_encrypted {
            self.cipher.decrypt(&raw)?
        } else {
            raw
        };
        Ok(ConfigEntry {
            key: row.try_get("key")?,
            value: serde_json::from_str(&json)?,
            group: row.try_get("group_name")?,
            is_public: row.try_get("is_public")?,
            is_encrypted,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // ----- connections -----

    pub async fn get_database_connections(&self) -> Result<Vec<ConnectionRecord>, VaultError> {
        let rows = sqlx::query(
            "SELECT * FROM database_connections ORDER BY created_at, name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.connection_from_row(r)).collect()
    }

    pub async fn get_active_connection(&self) -> Result<Option<ConnectionRecord>, VaultError> {
        let row = sqlx::query("SELECT * FROM database_connections WHERE is_active = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| self.connection_from_row(r)).transpose()
    }

    pub async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>, VaultError> {
        let row = sqlx::query("SELECT * FROM database_connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| self.connection_from_row(r)).transpose()
    }

    /// The first connection ever created becomes active even if not requested,
    /// so a fresh install always has a traffic target.
    pub async fn create_connection(
        &self,
        config: ConnectionConfig,
    ) -> Result<ConnectionRecord, VaultError> {
        config.validate()?;
        let encrypted_password = self.cipher.encrypt(&config.password)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM database_connections")
            .fetch_one(&mut *tx)
            .await?;
        let name_taken: Option<String> =
            sqlx::query_scalar("SELECT id FROM database_connections WHERE name = ?")
                .bind(&config.name)
                .fetch_optional(&mut *tx)
                .await?;
        if name_taken.is_some() {
            return Err(VaultError::DuplicateName(config.name));
        }
        let activate = config.is_active || existing == 0;
        if activate {
            sqlx::query("UPDATE database_connections SET is_active = 0 WHERE is_active = 1")
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO database_connections
                (id, name, kind, host, port, database_name, username, password_encrypted, ssl_mode, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&config.name)
        .bind(config.kind.as_str())
        .bind(&config.host)
        .bind(i64::from(config.resolved_port()))
        .bind(&config.database)
        .bind(&config.username)
        .bind(&encrypted_password)
        .bind(config.ssl_mode.as_str())
        .bind(activate)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(connection_id = %id, name = %config.name, active = activate, "connection created");
        Ok(ConnectionRecord {
            id,
            port: config.resolved_port(),
            name: config.name,
            kind: config.kind,
            host: config.host,
            database: config.database,
            username: config.username,
            password: config.password,
            ssl_mode: config.ssl_mode,
            is_active: activate,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<ConnectionRecord, VaultError> {
        let current = self
            .get_connection(id)
            .await?
            .ok_or_else(|| VaultError::ConnectionNotFound(id.to_string()))?;
        let merged = current.to_config().merge(update);
        merged.validate()?;
        let encrypted_password = self.cipher.encrypt(&merged.password)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let name_taken: Option<String> = sqlx::query_scalar(
            "SELECT id FROM database_connections WHERE name = ? AND id <> ?",
        )
        .bind(&merged.name)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if name_taken.is_some() {
            return Err(VaultError::DuplicateName(merged.name));
        }
        if merged.is_active && !current.is_active {
            sqlx::query("UPDATE database_connections SET is_active = 0 WHERE is_active = 1")
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE database_connections SET
                name = ?, kind = ?, host = ?, port = ?, database_name = ?, username = ?,
                password_encrypted = ?, ssl_mode = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&merged.name)
        .bind(merged.kind.as_str())
        .bind(&merged.host)
        .bind(i64::from(merged.resolved_port()))
        .bind(&merged.database)
        .bind(&merged.username)
        .bind(&encrypted_password)
        .bind(merged.ssl_mode.as_str())
        .bind(merged.is_active)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(connection_id = %id, "connection updated");
        Ok(ConnectionRecord {
            id: id.to_string(),
            port: merged.resolved_port(),
            name: merged.name,
            kind: merged.kind,
            host: merged.host,
            database: merged.database,
            username: merged.username,
            password: merged.password,
            ssl_mode: merged.ssl_mode,
            is_active: merged.is_active,
            created_at: current.created_at,
            updated_at: now,
        })
    }

    pub async fn delete_connection(&self, id: &str) -> Result<(), VaultError> {
        let is_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM database_connections WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match is_active {
            None => Err(VaultError::ConnectionNotFound(id.to_string())),
            Some(true) => Err(VaultError::ActiveConnection(id.to_string())),
            Some(false) => {
                // Guard against a concurrent activation between the check and the delete.
                let result = sqlx::query(
                    "DELETE FROM database_connections WHERE id = ? AND is_active = 0",
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(VaultError::ActiveConnection(id.to_string()));
                }
                tracing::info!(connection_id = %id, "connection deleted");
                Ok(())
            }
        }
    }

    /// Deactivate-all then activate-one inside a single transaction; an
    /// unknown id rolls back and leaves the previous active record in place.
    pub async fn set_active_connection(&self, id: &str) -> Result<(), VaultError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE database_connections SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        let activated =
            sqlx::query("UPDATE database_connections SET is_active = 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        if activated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(VaultError::ConnectionNotFound(id.to_string()));
        }
        tx.commit().await?;
        tracing::info!(connection_id = %id, "active connection changed");
        Ok(())
    }

    fn connection_from_row(&self, row: &SqliteRow) -> Result<ConnectionRecord, VaultError> {
        let kind: String = row.try_get("kind")?;
        let ssl_mode: String = row.try_get("ssl_mode")?;
        let port: i64 = row.try_get("port")?;
        let encrypted: String = row.try_get("password_encrypted")?;
        Ok(ConnectionRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: kind.parse()?,
            host: row.try_get("host")?,
            port: u16::try_from(port)
                .map_err(|_| VaultError::InvalidInput(format!("stored port out of range: {}", port)))?,
            database: row.try_get("database_name")?,
            username: row.try_get("username")?,
            password: self.cipher.decrypt(&encrypted)?,
            ssl_mode: ssl_mode.parse()?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn admin_from_row(row: &SqliteRow) -> Result<AdminUser, VaultError> {
    Ok(AdminUser {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        is_active: row.try_get("is_active")?,
        last_login: row.try_get::<Option<DateTime<Utc>>, _>("last_login")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_store, test_secrets};
    use serde_json::json;

    fn pg_config(name: &str, host: &str, db: &str) -> ConnectionConfig {
        ConnectionConfig {
            name: name.to_string(),
            kind: DatabaseKind::Postgres,
            host: host.to_string(),
            port: None,
            database: db.to_string(),
            username: "blog".to_string(),
            password: format!("pw-{}", name),
            ssl_mode: SslMode::Prefer,
            is_active: false,
        }
    }

    async fn active_count(store: &SecretStore) -> usize {
        store
            .get_database_connections()
            .await
            .unwrap()
            .iter()
            .filter(|c| c.is_active)
            .count()
    }

    #[tokio::test]
    async fn test_refuses_to_start_without_encryption_key() {
        let mut secrets = test_secrets();
        secrets.encryption_key = String::new();
        let result = SecretStore::open_in_memory(&secrets).await;
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[tokio::test]
    async fn test_password_stored_encrypted_and_decrypted_on_read() {
        let store = memory_store().await;
        let created = store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        let raw: String = sqlx::query_scalar(
            "SELECT password_encrypted FROM database_connections WHERE id = ?",
        )
        .bind(&created.id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_ne!(raw, "pw-a");
        assert!(!raw.contains("pw-a"));
        let all = store.get_database_connections().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].password, "pw-a");
    }

    #[tokio::test]
    async fn test_single_active_invariant_across_mutations() {
        let store = memory_store().await;
        let a = store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        assert!(a.is_active, "first connection becomes active");
        let b = store.create_connection(pg_config("b", "h2", "d2")).await.unwrap();
        assert!(!b.is_active);
        assert_eq!(active_count(&store).await, 1);

        let mut c_cfg = pg_config("c", "h3", "d3");
        c_cfg.is_active = true;
        let c = store.create_connection(c_cfg).await.unwrap();
        assert_eq!(active_count(&store).await, 1);
        assert_eq!(store.get_active_connection().await.unwrap().unwrap().id, c.id);

        store.set_active_connection(&b.id).await.unwrap();
        assert_eq!(active_count(&store).await, 1);

        store
            .update_connection(
                &a.id,
                ConnectionUpdate {
                    is_active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(active_count(&store).await, 1);
        assert_eq!(store.get_active_connection().await.unwrap().unwrap().id, a.id);

        assert!(store.set_active_connection("missing").await.is_err());
        assert_eq!(active_count(&store).await, 1);
        assert_eq!(store.get_active_connection().await.unwrap().unwrap().id, a.id);

        store.delete_connection(&c.id).await.unwrap();
        assert_eq!(active_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_delete_rejects_active_connection() {
        let store = memory_store().await;
        let a = store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        assert!(matches!(
            store.delete_connection(&a.id).await,
            Err(VaultError::ActiveConnection(_))
        ));
        assert!(matches!(
            store.delete_connection("nope").await,
            Err(VaultError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = memory_store().await;
        store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        assert!(matches!(
            store.create_connection(pg_config("a", "h2", "d2")).await,
            Err(VaultError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_option_like_database_name_rejected_on_create_and_update() {
        let store = memory_store().await;
        assert!(matches!(
            store.create_connection(pg_config("a", "h1", "-rfoo")).await,
            Err(VaultError::InvalidInput(_))
        ));
        let a = store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        let result = store
            .update_connection(
                &a.id,
                ConnectionUpdate {
                    database: Some("-rfoo".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(VaultError::InvalidInput(_))));
        assert_eq!(store.get_connection(&a.id).await.unwrap().unwrap().database, "d1");
    }

    #[tokio::test]
    async fn test_update_merges_and_reencrypts_password() {
        let store = memory_store().await;
        let a = store.create_connection(pg_config("a", "h1", "d1")).await.unwrap();
        let updated = store
            .update_connection(
                &a.id,
                ConnectionUpdate {
                    host: Some("h9".into()),
                    password: Some("rotated-password".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.host, "h9");
        assert_eq!(updated.database, "d1");
        let reloaded = store.get_connection(&a.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password, "rotated-password");
        assert_eq!(reloaded.host, "h9");
        assert!(reloaded.updated_at >= a.updated_at);
    }

    #[tokio::test]
    async fn test_config_upsert_last_write_wins() {
        let store = memory_store().await;
        assert_eq!(store.get_config("site.title").await.unwrap(), None);
        store
            .set_config("site.title", json!("First"), ConfigOptions::group("site"))
            .await
            .unwrap();
        store
            .set_config("site.title", json!("Second"), ConfigOptions::group("site"))
            .await
            .unwrap();
        assert_eq!(store.get_config("site.title").await.unwrap(), Some(json!("Second")));
        assert!(store.delete_config("site.title").await.unwrap());
        assert!(!store.delete_config("site.title").await.unwrap());
    }

    #[tokio::test]
    async fn test_encrypted_config_never_persisted_in_plaintext() {
        let store = memory_store().await;
        let value = json!({ "api_key": "sk-very-secret" });
        store
            .set_config("integrations.mail", value.clone(), ConfigOptions::encrypted("integrations"))
            .await
            .unwrap();
        let raw: String = sqlx::query_scalar("SELECT value FROM config_entries WHERE key = ?")
            .bind("integrations.mail")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert!(!raw.contains("sk-very-secret"));
        assert_eq!(store.get_config("integrations.mail").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_invalid_keys_and_encrypted_public_rejected() {
        let store = memory_store().await;
        for key in ["", "a..b", ".a", "a b", "a.b."] {
            assert!(matches!(
                store.set_config(key, json!(1), ConfigOptions::default()).await,
                Err(VaultError::InvalidKey(_))
            ));
        }
        let options = ConfigOptions {
            group: "x".into(),
            public: true,
            encrypted: true,
        };
        assert!(store.set_config("x.y", json!(1), options).await.is_err());
    }

    #[tokio::test]
    async fn test_list_config_by_prefix_and_public_view() {
        let store = memory_store().await;
        let public = ConfigOptions {
            group: "site".into(),
            public: true,
            encrypted: false,
        };
        store.set_config("site.title", json!("Blog"), public).await.unwrap();
        store
            .set_config("backup.schedules.daily", json!({"id": "daily"}), ConfigOptions::group("backup"))
            .await
            .unwrap();
        store
            .set_config("backup.schedules_old", json!(1), ConfigOptions::group("backup"))
            .await
            .unwrap();
        let schedules = store.list_config("backup.schedules.").await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].key, "backup.schedules.daily");
        let public_entries = store.get_public_config().await.unwrap();
        assert_eq!(public_entries.len(), 1);
        assert_eq!(public_entries[0].key, "site.title");
    }

    #[tokio::test]
    async fn test_bootstrap_admin_created_once() {
        let store = memory_store().await;
        let admin = store.get_admin(&test_secrets().admin_username).await.unwrap();
        assert_eq!(admin.unwrap().role, "superadmin");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_users")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_authenticate_updates_last_login_only_on_success() {
        let store = memory_store().await;
        let secrets = test_secrets();

        let before_call = Utc::now();
        let user = store
            .authenticate_admin(&secrets.admin_username, &secrets.admin_password)
            .await
            .unwrap()
            .expect("valid credentials");
        let first_login = user.last_login.expect("last login set");
        assert!(first_login >= before_call);

        let denied = store
            .authenticate_admin(&secrets.admin_username, "wrong-password")
            .await
            .unwrap();
        assert!(denied.is_none());
        let reloaded = store.get_admin(&secrets.admin_username).await.unwrap().unwrap();
        assert_eq!(reloaded.last_login, Some(first_login));

        let unknown = store.authenticate_admin("nobody", "whatever").await.unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_change_password() {
        let store = memory_store().await;
        let secrets = test_secrets();
        store
            .change_admin_password(&secrets.admin_username, "new-password-123")
            .await
            .unwrap();
        assert!(store
            .authenticate_admin(&secrets.admin_username, &secrets.admin_password)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .authenticate_admin(&secrets.admin_username, "new-password-123")
            .await
            .unwrap()
            .is_some());
        assert!(matches!(
            store.change_admin_password("ghost", "new-password-123").await,
            Err(VaultError::AdminNotFound(_))
        ));
    }
}
