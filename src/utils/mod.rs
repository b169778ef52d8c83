pub mod process;
pub mod shutdown;

use std::path::PathBuf;
use tokio::process::Command;
use which::which;

use crate::config::ToolOverride;
use crate::errors::BackupError;

/// An external client tool ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub name: String,
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl ToolCommand {
    /// A fresh command with the override's leading arguments applied; the
    /// child is killed if the returned handle is dropped.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).kill_on_drop(true);
        cmd
    }
}

/// Finds `name` on PATH unless an override is configured.
pub fn resolve_tool(name: &str, tool_override: Option<&ToolOverride>) -> Result<ToolCommand, BackupError> {
    if let Some(o) = tool_override {
        return Ok(ToolCommand {
            name: name.to_string(),
            program: o.program.clone(),
            leading_args: o.args.clone(),
        });
    }
    let program = which(name).map_err(|e| BackupError::ToolNotFound {
        tool: name.to_string(),
        reason: format!(
            "{}. Please ensure the database client tools are installed and in your PATH",
            e
        ),
    })?;
    Ok(ToolCommand {
        name: name.to_string(),
        program,
        leading_args: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_over_path_lookup() {
        let o = ToolOverride {
            program: PathBuf::from("docker"),
            args: vec!["exec".into(), "db".into(), "pg_dump".into()],
        };
        let tool = resolve_tool("pg_dump", Some(&o)).unwrap();
        assert_eq!(tool.program, PathBuf::from("docker"));
        assert_eq!(tool.leading_args.len(), 3);
        assert_eq!(tool.name, "pg_dump");
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let result = resolve_tool("dbkeeper-no-such-tool-xyz", None);
        assert!(matches!(result, Err(BackupError::ToolNotFound { .. })));
    }
}
