use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::backup::db_dump::{apply_credentials, mysql_ssl_arg};
use crate::config::BackupSettings;
use crate::errors::BackupError;
use crate::utils::{resolve_tool, ToolCommand};
use crate::vault::{ConnectionRecord, DatabaseKind};

pub fn restore_tool_name(kind: DatabaseKind) -> &'static str {
    match kind {
        DatabaseKind::Postgres => "psql",
        DatabaseKind::Mysql => "mysql",
    }
}

/// Arguments that apply `sql_file_path` to `record`, stopping on the first
/// error. psql reads the file itself; mysql gets it on stdin.
pub fn restore_args(record: &ConnectionRecord, sql_file_path: &Path) -> Vec<String> {
    match record.kind {
        DatabaseKind::Postgres => vec![
            "-X".into(), // Do not read psqlrc
            "-q".into(),
            "-v".into(),
            "ON_ERROR_STOP=1".into(),
            "--host".into(),
            record.host.clone(),
            "--port".into(),
            record.port.to_string(),
            "--username".into(),
            record.username.clone(),
            "--no-password".into(),
            "--dbname".into(),
            record.database.clone(),
            "-f".into(),
            sql_file_path.display().to_string(),
        ],
        DatabaseKind::Mysql => {
            let mut args = vec![
                "--host".into(),
                record.host.clone(),
                "--port".into(),
                record.port.to_string(),
                "--user".into(),
                record.username.clone(),
                "--batch".into(),
            ];
            args.extend(mysql_ssl_arg(record.ssl_mode).map(String::from));
            args.push(record.database.clone());
            args
        }
    }
}

/// Command plus the stdin it should run with.
pub fn restore_command(
    record: &ConnectionRecord,
    settings: &BackupSettings,
    sql_file_path: &Path,
) -> Result<(ToolCommand, Command, Stdio), BackupError> {
    if !sql_file_path.exists() {
        return Err(BackupError::ArtifactNotFound(format!(
            "SQL file for restoration not found: {}",
            sql_file_path.display()
        )));
    }
    let tool = resolve_tool(restore_tool_name(record.kind), settings.restore_tool.as_ref())?;
    let mut cmd = tool.command();
    cmd.args(restore_args(record, sql_file_path));
    apply_credentials(&mut cmd, record);
    let stdin = match record.kind {
        DatabaseKind::Postgres => Stdio::null(),
        DatabaseKind::Mysql => Stdio::from(std::fs::File::open(sql_file_path)?),
    };
    Ok((tool, cmd, stdin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::connection_record;
    use std::path::PathBuf;

    #[test]
    fn test_psql_stops_on_first_error_and_reads_file() {
        let record = connection_record(DatabaseKind::Postgres, "h1");
        let args = restore_args(&record, &PathBuf::from("/tmp/restore.sql"));
        let joined = args.join(" ");
        assert!(joined.contains("-v ON_ERROR_STOP=1"));
        assert!(joined.ends_with("-f /tmp/restore.sql"));
        assert!(!joined.contains(&record.password));
    }

    #[test]
    fn test_mysql_reads_stdin() {
        let record = connection_record(DatabaseKind::Mysql, "h1");
        let args = restore_args(&record, &PathBuf::from("/tmp/restore.sql"));
        assert!(!args.iter().any(|a| a.contains("restore.sql")));
        assert_eq!(args.last().map(String::as_str), Some("blog"));
        assert_eq!(restore_tool_name(record.kind), "mysql");
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let record = connection_record(DatabaseKind::Postgres, "h1");
        let result = restore_command(
            &record,
            &BackupSettings::default(),
            &PathBuf::from("/nonexistent/dbkeeper/restore.sql"),
        );
        assert!(matches!(result, Err(BackupError::ArtifactNotFound(_))));
    }
}
