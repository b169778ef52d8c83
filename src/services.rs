//! Service container: builds each component once and wires them together.

use std::sync::Arc;

use crate::backup::object_store::{ObjectStore, S3ObjectStore};
use crate::backup::BackupOrchestrator;
use crate::config::{spaces_config_from_raw, AppConfig, JsonS3StorageConfig, SpacesConfig, VaultSecrets};
use crate::errors::{AppError, VaultError};
use crate::pool::ConnectionManager;
use crate::schedule::Scheduler;
use crate::vault::{ConfigOptions, SecretStore};

/// Secret Store entry holding object-storage credentials (encrypted).
pub const STORAGE_CONFIG_KEY: &str = "backup.storage";

pub struct Services {
    pub store: SecretStore,
    pub connections: ConnectionManager,
    pub backups: Arc<BackupOrchestrator>,
    pub scheduler: Scheduler,
}

impl Services {
    /// Opens the Secret Store, builds the pools, connects object storage and
    /// restarts enabled schedules. Configuration errors abort start-up.
    pub async fn start(config: AppConfig, secrets: VaultSecrets) -> Result<Self, AppError> {
        let store = SecretStore::connect(&config.vault, &secrets).await?;

        let connections = ConnectionManager::new(store.clone(), config.pools.clone());
        connections.initialize().await?;

        let spaces = storage_settings(&store, config.spaces_config.as_ref()).await?;
        let storage: Option<Arc<dyn ObjectStore>> = match &spaces {
            Some(spaces) => {
                tracing::info!(bucket = %spaces.bucket_name, region = %spaces.region, "object storage configured");
                Some(Arc::new(S3ObjectStore::connect(spaces).await))
            }
            None => {
                tracing::warn!("object storage is not configured; stored backups are unavailable");
                None
            }
        };
        let prefix = spaces.and_then(|s| s.folder_prefix);

        let backups = Arc::new(BackupOrchestrator::new(
            Arc::new(connections.clone()),
            storage,
            prefix,
            config.backup.clone(),
        ));

        let scheduler = Scheduler::new(store.clone(), backups.clone(), config.scheduler.clone());
        scheduler.initialize().await?;

        Ok(Self {
            store,
            connections,
            backups,
            scheduler,
        })
    }

    /// Stops timers first so no backup starts against a closing pool.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.connections.shutdown().await;
        self.store.close().await;
        tracing::info!("services shut down");
    }
}

/// Credentials from the Secret Store when present and complete, otherwise
/// the config file's block.
pub async fn storage_settings(
    store: &SecretStore,
    fallback: Option<&SpacesConfig>,
) -> Result<Option<SpacesConfig>, VaultError> {
    if let Some(value) = store.get_config(STORAGE_CONFIG_KEY).await? {
        let raw: JsonS3StorageConfig = serde_json::from_value(value)?;
        match spaces_config_from_raw(&raw) {
            Some(spaces) => return Ok(Some(spaces)),
            None => tracing::warn!(
                key = STORAGE_CONFIG_KEY,
                "stored object-storage settings are incomplete; using config file"
            ),
        }
    }
    Ok(fallback.cloned())
}

pub async fn save_storage_settings(store: &SecretStore, spaces: &SpacesConfig) -> Result<(), VaultError> {
    store
        .set_config(
            STORAGE_CONFIG_KEY,
            serde_json::to_value(spaces)?,
            ConfigOptions::encrypted("backup"),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultSettings;
    use crate::errors::{BackupError, StorageError};
    use crate::schedule::ScheduleConfig;
    use crate::test_support::{memory_store, test_secrets};

    fn spaces(bucket: &str) -> SpacesConfig {
        SpacesConfig {
            endpoint_url: Some("https://fra1.digitaloceanspaces.com".into()),
            region: "fra1".into(),
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            bucket_name: bucket.into(),
            folder_prefix: Some("blog-backups".into()),
        }
    }

    #[tokio::test]
    async fn test_store_settings_take_precedence_over_file() {
        let store = memory_store().await;
        let file = spaces("from-file");
        assert_eq!(
            storage_settings(&store, Some(&file)).await.unwrap(),
            Some(file.clone())
        );

        save_storage_settings(&store, &spaces("from-store")).await.unwrap();
        let resolved = storage_settings(&store, Some(&file)).await.unwrap().unwrap();
        assert_eq!(resolved.bucket_name, "from-store");

        let entry = store.list_config(STORAGE_CONFIG_KEY).await.unwrap();
        assert!(entry[0].is_encrypted);
    }

    #[tokio::test]
    async fn test_incomplete_store_settings_fall_back() {
        let store = memory_store().await;
        store
            .set_config(
                STORAGE_CONFIG_KEY,
                serde_json::json!({ "bucket_name": "partial" }),
                ConfigOptions::encrypted("backup"),
            )
            .await
            .unwrap();
        assert_eq!(storage_settings(&store, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_start_without_storage_or_connections() {
        let config = AppConfig {
            vault: VaultSettings {
                database_url: "sqlite::memory:".into(),
                max_connections: 1,
                ..VaultSettings::default()
            },
            ..AppConfig::default()
        };
        let services = Services::start(config, test_secrets()).await.unwrap();

        assert!(matches!(
            services.backups.list_backups().await,
            Err(BackupError::Storage(StorageError::NotConfigured(_)))
        ));
        services
            .scheduler
            .create_schedule("daily", ScheduleConfig::new("0 2 * * *"))
            .await
            .unwrap();
        assert_eq!(services.scheduler.get_schedules().await.unwrap().len(), 1);
        services.shutdown().await;
    }
}
