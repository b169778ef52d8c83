//! dbkeeper command line
//!
//! Runs the service container as a long-lived process (`serve`) or performs a
//! single operator command against it.

use anyhow::{Context, Result};
use dbkeeper::backup::{BackupKind, BackupTarget};
use dbkeeper::config::{AppConfig, VaultSecrets};
use dbkeeper::utils::shutdown::shutdown_signal;
use dbkeeper::{OperationOutcome, Services};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run_app().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<AppConfig> {
    let config_path = env::var("DBKEEPER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    if !config_path.exists() && env::var_os("DBKEEPER_CONFIG").is_none() {
        tracing::info!(path = %config_path.display(), "no config file; using defaults");
        return Ok(AppConfig::default());
    }
    AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))
}

/// Prints the outcome as JSON. Returns whether the operation succeeded.
fn report<T: Serialize, E: Into<dbkeeper::AppError>>(result: Result<T, E>) -> Result<bool> {
    let succeeded = result.is_ok();
    let outcome = OperationOutcome::from_result(result);
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to render result")?
    );
    Ok(succeeded)
}

async fn run_app() -> Result<bool> {
    let config = load_config()?;
    let secrets = VaultSecrets::from_env().context("Failed to read process secrets")?;

    let args: Vec<String> = env::args().skip(1).collect();
    let choice = args.first().map(|a| a.trim().to_string()).unwrap_or_else(|| "serve".to_string());
    let argument = args.get(1).cloned();

    let services = Services::start(config, secrets)
        .await
        .context("Failed to start services")?;

    let succeeded = match choice.as_str() {
        "serve" => {
            println!("🚀 dbkeeper running; press Ctrl-C to stop.");
            shutdown_signal().await;
            true
        }
        "backup" => {
            let target = argument.map_or(BackupTarget::Active, BackupTarget::Connection);
            report(services.backups.create_backup_for(&target, BackupKind::Manual).await)?
        }
        "list" => report(services.backups.list_backups().await)?,
        "stats" => report(services.backups.get_backup_stats().await)?,
        "restore" => {
            let artifact = argument.context("Usage: dbkeeper restore <artifact key or filename>")?;
            report(services.backups.restore(&artifact, &BackupTarget::Active).await)?
        }
        "cleanup" => {
            let cleanup = services.backups.cleanup_old_backups().await;
            report(Ok::<_, dbkeeper::AppError>(cleanup))?
        }
        "health" => report(services.connections.check_health_now().await)?,
        "schedules" => report(services.scheduler.get_schedules().await)?,
        "trigger" => {
            let id = argument.context("Usage: dbkeeper trigger <schedule id>")?;
            report(services.scheduler.trigger_backup(&id).await)?
        }
        other => {
            eprintln!(
                "❌ Unknown command {:?}. Use one of: serve, backup [connection-id], list, stats, restore <artifact>, cleanup, health, schedules, trigger <schedule-id>.",
                other
            );
            false
        }
    };

    services.shutdown().await;
    Ok(succeeded)
}
