// dbkeeper/src/config/mod.rs
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

pub const ENCRYPTION_KEY_VAR: &str = "DBKEEPER_ENCRYPTION_KEY";
pub const ADMIN_USERNAME_VAR: &str = "DBKEEPER_ADMIN_USERNAME";
pub const ADMIN_PASSWORD_VAR: &str = "DBKEEPER_ADMIN_PASSWORD";
pub const ADMIN_EMAIL_VAR: &str = "DBKEEPER_ADMIN_EMAIL";
pub const MIN_ENCRYPTION_KEY_LEN: usize = 16;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonVaultConfig {
    pub database_url: Option<String>,
    pub max_connections: Option<u32>,
    pub connect_retries: Option<u32>,
    pub connect_backoff_ms: Option<u64>,
    pub connect_backoff_cap_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonPoolConfig {
    pub max_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub check_timeout_secs: Option<u64>,
    pub health_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonBackupConfig {
    pub max_backups: Option<usize>,
    pub max_age_days: Option<i64>,
    pub tool_timeout_secs: Option<u64>,
    pub temp_dir: Option<PathBuf>,
    pub dump_tool: Option<ToolOverride>,
    pub restore_tool: Option<ToolOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSchedulerConfig {
    pub log_capacity: Option<usize>,
    pub default_timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub vault: Option<JsonVaultConfig>,
    pub pools: Option<JsonPoolConfig>,
    pub backup: Option<JsonBackupConfig>,
    pub scheduler: Option<JsonSchedulerConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

/// Replaces the executable resolved from PATH. `args` are passed before the
/// generated connection arguments, which allows wrappers such as
/// `docker exec <container> pg_dump`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolOverride {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct SpacesConfig {
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub connect_backoff: Duration,
    pub connect_backoff_cap: Duration,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://dbkeeper.db".to_string(),
            max_connections: 5,
            connect_retries: 5,
            connect_backoff: Duration::from_millis(500),
            connect_backoff_cap: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub check_timeout: Duration,
    pub health_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            check_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub max_backups: usize,
    pub max_age_days: i64,
    pub tool_timeout: Duration,
    pub temp_dir: Option<PathBuf>,
    pub dump_tool: Option<ToolOverride>,
    pub restore_tool: Option<ToolOverride>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            max_backups: 10,
            max_age_days: 30,
            tool_timeout: Duration::from_secs(30 * 60),
            temp_dir: None,
            dump_tool: None,
            restore_tool: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub log_capacity: usize,
    pub default_timezone: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            log_capacity: 50,
            default_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub vault: VaultSettings,
    pub pools: PoolSettings,
    pub backup: BackupSettings,
    pub scheduler: SchedulerSettings,
    pub spaces_config: Option<SpacesConfig>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            ConfigError::Invalid(format!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)?;
        Self::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self, ConfigError> {
        let vault_raw = raw.vault.unwrap_or_default();
        let vault_defaults = VaultSettings::default();
        let vault = VaultSettings {
            database_url: vault_raw
                .database_url
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(vault_defaults.database_url),
            max_connections: vault_raw
                .max_connections
                .unwrap_or(vault_defaults.max_connections)
                .max(1),
            connect_retries: vault_raw
                .connect_retries
                .unwrap_or(vault_defaults.connect_retries)
                .max(1),
            connect_backoff: vault_raw
                .connect_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(vault_defaults.connect_backoff),
            connect_backoff_cap: vault_raw
                .connect_backoff_cap_ms
                .map(Duration::from_millis)
                .unwrap_or(vault_defaults.connect_backoff_cap),
        };

        let pools_raw = raw.pools.unwrap_or_default();
        let pool_defaults = PoolSettings::default();
        let pools = PoolSettings {
            max_connections: pools_raw
                .max_connections
                .unwrap_or(pool_defaults.max_connections)
                .max(1),
            acquire_timeout: secs_or(pools_raw.acquire_timeout_secs, pool_defaults.acquire_timeout),
            idle_timeout: secs_or(pools_raw.idle_timeout_secs, pool_defaults.idle_timeout),
            check_timeout: secs_or(pools_raw.check_timeout_secs, pool_defaults.check_timeout),
            health_interval: secs_or(pools_raw.health_interval_secs, pool_defaults.health_interval),
        };
        if pools.health_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "pools.health_interval_secs must be greater than zero".to_string(),
            ));
        }

        let backup_raw = raw.backup.unwrap_or_default();
        let backup_defaults = BackupSettings::default();
        let backup = BackupSettings {
            max_backups: backup_raw.max_backups.unwrap_or(backup_defaults.max_backups),
            max_age_days: backup_raw.max_age_days.unwrap_or(backup_defaults.max_age_days),
            tool_timeout: secs_or(backup_raw.tool_timeout_secs, backup_defaults.tool_timeout),
            temp_dir: backup_raw.temp_dir,
            dump_tool: backup_raw.dump_tool,
            restore_tool: backup_raw.restore_tool,
        };
        if backup.max_backups == 0 {
            return Err(ConfigError::Invalid(
                "backup.max_backups must be at least 1".to_string(),
            ));
        }
        if backup.max_age_days < 1 {
            return Err(ConfigError::Invalid(
                "backup.max_age_days must be at least 1".to_string(),
            ));
        }

        let scheduler_raw = raw.scheduler.unwrap_or_default();
        let scheduler_defaults = SchedulerSettings::default();
        let scheduler = SchedulerSettings {
            log_capacity: scheduler_raw
                .log_capacity
                .unwrap_or(scheduler_defaults.log_capacity)
                .max(1),
            default_timezone: scheduler_raw
                .default_timezone
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(scheduler_defaults.default_timezone),
        };

        Ok(AppConfig {
            vault,
            pools,
            backup,
            scheduler,
            spaces_config: raw.s3_storage.as_ref().and_then(spaces_config_from_raw),
        })
    }
}

fn secs_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

/// Builds the object-storage settings when every required field is present.
pub fn spaces_config_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<SpacesConfig> {
    if let (Some(bucket), Some(region), Some(key_id), Some(secret)) = (
        s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(SpacesConfig {
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: s3_raw.endpoint_url.clone().filter(|s| !s.is_empty()),
            folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        })
    } else {
        if s3_raw.bucket_name.is_some()
            || s3_raw.region.is_some()
            || s3_raw.access_key_id.is_some()
            || s3_raw.secret_access_key.is_some()
        {
            // Only warn if some S3 fields were provided but were incomplete/empty
            tracing::warn!(
                "s3_storage is present but bucket_name, region, access_key_id or secret_access_key is missing; stored backups are disabled"
            );
        }
        None
    }
}

/// Process-level secrets. Never read from config.json and never logged.
#[derive(Clone)]
pub struct VaultSecrets {
    pub encryption_key: String,
    pub admin_username: String,
    pub admin_password: String,
    pub admin_email: Option<String>,
}

impl std::fmt::Debug for VaultSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecrets")
            .field("encryption_key", &"<redacted>")
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"<redacted>")
            .field("admin_email", &self.admin_email)
            .finish()
    }
}

impl VaultSecrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };
        let secrets = VaultSecrets {
            encryption_key: required(ENCRYPTION_KEY_VAR)?,
            admin_username: required(ADMIN_USERNAME_VAR)?,
            admin_password: required(ADMIN_PASSWORD_VAR)?,
            admin_email: lookup(ADMIN_EMAIL_VAR).filter(|v| !v.trim().is_empty()),
        };
        secrets.validate()?;
        Ok(secrets)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption_key.len() < MIN_ENCRYPTION_KEY_LEN {
            return Err(ConfigError::InvalidSecret {
                name: ENCRYPTION_KEY_VAR,
                reason: format!("must be at least {} bytes", MIN_ENCRYPTION_KEY_LEN),
            });
        }
        if self.admin_password.len() < 8 {
            return Err(ConfigError::InvalidSecret {
                name: ADMIN_PASSWORD_VAR,
                reason: "must be at least 8 characters".to_string(),
            });
        }
        Ok(())
    }
}
