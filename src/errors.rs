use serde::Serialize;
use thiserror::Error;

/// Boot-time configuration problems. Fatal: the process must not start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required secret {0} is not set")]
    MissingSecret(&'static str),

    #[error("Invalid secret {name}: {reason}")]
    InvalidSecret { name: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Secret store database unreachable after {attempts} attempts: {last_error}")]
    StoreUnreachable { attempts: u32, last_error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Invalid config key: {0}")]
    InvalidKey(String),

    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    #[error("A connection named {0} already exists")]
    DuplicateName(String),

    #[error("Connection {0} is active and cannot be deleted")]
    ActiveConnection(String),

    #[error("Admin user {0} not found")]
    AdminNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection manager is not initialized")]
    NotInitialized,

    #[error("Connection manager has been shut down")]
    ShutDown,

    #[error("No active connection is configured")]
    NoActiveConnection,

    #[error("No pool exists for connection {0}")]
    NoPool(String),

    #[error("Connection {0} not found")]
    NotFound(String),

    #[error("Failed to build pool for {target}: {reason}")]
    Build { target: String, reason: String },

    #[error("Health check of {target} failed: {reason}")]
    HealthCheck { target: String, reason: String },

    #[error("Query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Object storage is not configured: {0}")]
    NotConfigured(String),

    #[error("AWS SDK S3 error: {0}")]
    S3Sdk(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("{tool} executable not found: {reason}")]
    ToolNotFound { tool: String, reason: String },

    #[error("{tool} exited with status {exit_code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {secs} seconds and was killed")]
    Timeout { tool: String, secs: u64 },

    #[error("Restore failed with exit code {:?}: {}", .0.exit_code, .0.stderr)]
    RestoreFailed(Box<crate::restore::RestoreReport>),

    #[error("Backup artifact {0} not found")]
    ArtifactNotFound(String),

    #[error("Invalid artifact reference: {0}")]
    InvalidArtifact(String),

    #[error("Stream failure: {0}")]
    Stream(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid timezone {0:?}")]
    InvalidTimezone(String),

    #[error("Invalid schedule id {0:?}")]
    InvalidId(String),

    #[error("Schedule {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// Umbrella error for callers that drive several components.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Coarse reason class so an operator knows whether to fix config, retry,
/// or look at the external tool's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Configuration,
    Connectivity,
    ToolExecution,
    Storage,
    Validation,
    NotFound,
    Internal,
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Config(_) => ErrorCategory::Configuration,
            AppError::Vault(e) => vault_category(e),
            AppError::Connection(e) => connection_category(e),
            AppError::Storage(e) => storage_category(e),
            AppError::Backup(e) => backup_category(e),
            AppError::Schedule(e) => match e {
                ScheduleError::InvalidCron { .. }
                | ScheduleError::InvalidTimezone(_)
                | ScheduleError::InvalidId(_) => ErrorCategory::Validation,
                ScheduleError::NotFound(_) => ErrorCategory::NotFound,
                ScheduleError::Vault(e) => vault_category(e),
                ScheduleError::Backup(e) => backup_category(e),
            },
        }
    }
}

fn vault_category(e: &VaultError) -> ErrorCategory {
    match e {
        VaultError::Config(_) => ErrorCategory::Configuration,
        VaultError::Sqlx(_) => ErrorCategory::Connectivity,
        VaultError::ConnectionNotFound(_) | VaultError::AdminNotFound(_) => ErrorCategory::NotFound,
        VaultError::InvalidKey(_)
        | VaultError::DuplicateName(_)
        | VaultError::ActiveConnection(_)
        | VaultError::InvalidInput(_) => ErrorCategory::Validation,
        _ => ErrorCategory::Internal,
    }
}

fn connection_category(e: &ConnectionError) -> ErrorCategory {
    match e {
        ConnectionError::NotFound(_) => ErrorCategory::NotFound,
        ConnectionError::NoActiveConnection => ErrorCategory::Configuration,
        ConnectionError::Vault(e) => vault_category(e),
        _ => ErrorCategory::Connectivity,
    }
}

fn storage_category(e: &StorageError) -> ErrorCategory {
    match e {
        StorageError::NotFound(_) => ErrorCategory::NotFound,
        StorageError::NotConfigured(_) => ErrorCategory::Configuration,
        _ => ErrorCategory::Storage,
    }
}

fn backup_category(e: &BackupError) -> ErrorCategory {
    match e {
        BackupError::ToolNotFound { .. } => ErrorCategory::Configuration,
        BackupError::ToolFailed { .. }
        | BackupError::Timeout { .. }
        | BackupError::RestoreFailed(_) => ErrorCategory::ToolExecution,
        BackupError::ArtifactNotFound(_) => ErrorCategory::NotFound,
        BackupError::InvalidArtifact(_) => ErrorCategory::Validation,
        BackupError::Storage(e) => storage_category(e),
        BackupError::Connection(e) => connection_category(e),
        BackupError::Stream(_) | BackupError::Io(_) => ErrorCategory::Internal,
    }
}

/// Structured result handed to the API layer instead of a raw error.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome<T: Serialize> {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

impl<T: Serialize> OperationOutcome<T> {
    pub fn from_result<E: Into<AppError>>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(data) => Self {
                status: OutcomeStatus::Success,
                category: None,
                message: None,
                data: Some(data),
            },
            Err(e) => {
                let err: AppError = e.into();
                tracing::warn!(category = ?err.category(), error = %err, "operation failed");
                Self {
                    status: OutcomeStatus::Error,
                    category: Some(err.category()),
                    message: Some(err.to_string()),
                    data: None,
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
