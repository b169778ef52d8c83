use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::object_store::StoredObject;
use crate::errors::BackupError;

const KEY_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
const KEY_TIME_PARSE: &str = "%Y-%m-%dT%H-%M-%S%.fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Manual,
    Scheduled,
    Safety,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Scheduled => "scheduled",
            BackupKind::Safety => "safety",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(BackupKind::Manual),
            "scheduled" => Ok(BackupKind::Scheduled),
            "safety" => Ok(BackupKind::Safety),
            other => Err(BackupError::InvalidArtifact(format!("unknown backup kind {}", other))),
        }
    }
}

/// One stored backup. Immutable once uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub key: String,
    pub filename: String,
    pub size: u64,
    pub etag: Option<String>,
    /// Known for artifacts created by this process.
    pub sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` for legacy keys without a kind segment.
    pub kind: Option<BackupKind>,
    pub database: String,
}

impl Artifact {
    /// Object-store etag, falling back to the payload checksum.
    pub fn integrity_tag(&self) -> Option<&str> {
        self.etag.as_deref().or(self.sha256.as_deref())
    }

    /// Rebuilds an artifact from a listed object; `None` when the key does
    /// not follow the backup naming scheme.
    pub fn from_stored(object: &StoredObject) -> Option<Artifact> {
        let filename = object.key.rsplit('/').next().unwrap_or(&object.key);
        let parsed = parse_filename(filename)?;
        Some(Artifact {
            key: object.key.clone(),
            filename: filename.to_string(),
            size: object.size,
            etag: object.etag.clone(),
            sha256: None,
            created_at: parsed.created_at,
            kind: parsed.kind,
            database: parsed.database,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub database: String,
    pub kind: Option<BackupKind>,
    pub created_at: DateTime<Utc>,
}

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<db>.+?)(?:-(?P<kind>manual|scheduled|safety))?-(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(?:\.\d+)?Z)\.sql$",
        )
        .expect("static artifact regex")
    })
}

/// `<database>-<kind>-<timestamp>.sql`, or the legacy `<database>-<timestamp>.sql`.
pub fn parse_filename(filename: &str) -> Option<ParsedFilename> {
    let caps = filename_regex().captures(filename)?;
    let ts = NaiveDateTime::parse_from_str(&caps["ts"], KEY_TIME_PARSE).ok()?;
    Some(ParsedFilename {
        database: caps["db"].to_string(),
        kind: caps.name("kind").and_then(|k| k.as_str().parse().ok()),
        created_at: ts.and_utc(),
    })
}

pub fn artifact_filename(database: &str, kind: BackupKind, created_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}.sql",
        database,
        kind,
        created_at.format(KEY_TIME_FORMAT)
    )
}

pub fn artifact_key(prefix: &str, filename: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), filename)
}
