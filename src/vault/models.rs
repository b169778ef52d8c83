use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::VaultError;

/// Database engine behind a connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Mysql,
}

impl DatabaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            DatabaseKind::Postgres => 5432,
            DatabaseKind::Mysql => 3306,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseKind::Mysql),
            other => Err(VaultError::InvalidInput(format!(
                "unsupported backend type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "disabled" => Ok(SslMode::Disable),
            "prefer" | "preferred" => Ok(SslMode::Prefer),
            "require" | "required" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" | "verify-identity" => Ok(SslMode::VerifyFull),
            other => Err(VaultError::InvalidInput(format!("unknown ssl mode: {}", other))),
        }
    }
}

/// A persisted backend definition. `password` is decrypted on read and is
/// never serialized or printed.
#[derive(Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub name: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("is_active", &self.is_active)
            .finish()
    }
}

impl ConnectionRecord {
    /// `kind://user@host:port/database`, safe for logs.
    pub fn display_target(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.kind, self.username, self.host, self.port, self.database
        )
    }

    pub fn to_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            name: self.name.clone(),
            kind: self.kind,
            host: self.host.clone(),
            port: Some(self.port),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ssl_mode: self.ssl_mode,
            is_active: self.is_active,
        }
    }
}

/// Input for `create_connection`.
#[derive(Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub kind: DatabaseKind,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    #[serde(default)]
    pub is_active: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Partial edit of a connection; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub kind: Option<DatabaseKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<SslMode>,
    pub is_active: Option<bool>,
}

impl ConnectionConfig {
    pub fn merge(self, update: ConnectionUpdate) -> ConnectionConfig {
        ConnectionConfig {
            name: update.name.unwrap_or(self.name),
            kind: update.kind.unwrap_or(self.kind),
            host: update.host.unwrap_or(self.host),
            port: update.port.or(self.port),
            database: update.database.unwrap_or(self.database),
            username: update.username.unwrap_or(self.username),
            password: update.password.unwrap_or(self.password),
            ssl_mode: update.ssl_mode.unwrap_or(self.ssl_mode),
            is_active: update.is_active.unwrap_or(self.is_active),
        }
    }

    pub fn resolved_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        if self.name.trim().is_empty() {
            return Err(VaultError::InvalidInput("name must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(VaultError::InvalidInput("host must not be empty".into()));
        }
        if self.port == Some(0) {
            return Err(VaultError::InvalidInput("port must not be 0".into()));
        }
        if self.username.trim().is_empty() {
            return Err(VaultError::InvalidInput("username must not be empty".into()));
        }
        // Host, user and database reach the client tools as arguments.
        for (field, value) in [
            ("host", &self.host),
            ("username", &self.username),
            ("database", &self.database),
        ] {
            if value.starts_with('-') {
                return Err(VaultError::InvalidInput(format!(
                    "{} must not start with '-': {:?}",
                    field, value
                )));
            }
        }
        if self.database.trim().is_empty()
            || self
                .database
                .contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '$')
        {
            return Err(VaultError::InvalidInput(format!(
                "invalid database name: {:?}",
                self.database
            )));
        }
        Ok(())
    }
}

/// Options for `set_config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigOptions {
    pub group: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub encrypted: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            group: "general".to_string(),
            public: false,
            encrypted: false,
        }
    }
}

impl ConfigOptions {
    pub fn group(group: &str) -> Self {
        Self {
            group: group.to_string(),
            ..Self::default()
        }
    }

    pub fn encrypted(group: &str) -> Self {
        Self {
            group: group.to_string(),
            public: false,
            encrypted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub group: String,
    pub is_public: bool,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sanitized admin account; the password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
