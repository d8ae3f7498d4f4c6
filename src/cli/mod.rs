//! # Command Line Interface
//!
//! Runs the status monitor and provides secret administration commands.

use crate::broadcast::BroadcastHub;
use crate::config::{AppConfig, DatabaseConfig, ObservabilityConfig};
use crate::observability::{init_logging, init_observability, log_config_info};
use crate::services::{DataSourceService, SecretCipher, SecretCipherConfig, StatusMonitor};
use crate::storage::{create_pool, get_migration_version, run_migrations};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sourceplane")]
#[command(about = "Per-workspace data source tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration store URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the status monitor until Ctrl-C
    Run,

    /// Encrypt a secret read from stdin and print the envelope
    EncryptSecret,

    /// Print a new random base64 key for SOURCEPLANE_SECRET_KEY
    GenerateKey,

    /// Rewrite every stored secret under the current key
    ReencryptSecrets,

    /// Apply the configuration store schema
    Migrate,

    /// Check connectivity of a workspace's data source
    TestConnection {
        workspace_id: String,

        #[arg(long)]
        data_source_id: Option<String>,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateKey => {
            println!("{}", SecretCipher::generate_key()?);
        }
        Commands::EncryptSecret => {
            initialise_logging(cli.verbose);
            let cipher = SecretCipher::new(&SecretCipherConfig::from_env()?)?;

            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read secret from stdin")?;
            let secret = input.trim_end_matches(['\r', '\n']);
            if secret.is_empty() {
                anyhow::bail!("No secret provided on stdin");
            }
            println!("{}", cipher.encrypt(secret)?);
        }
        Commands::Migrate => {
            initialise_logging(cli.verbose);
            let mut database = DatabaseConfig::from_env();
            if let Some(url) = cli.database_url {
                database.url = url;
            }
            database.auto_migrate = false;

            let pool = create_pool(&database).await?;
            run_migrations(&pool).await?;
            println!("Configuration store at schema version {}", get_migration_version(&pool).await?);
        }
        Commands::Run => {
            let config = load_config(cli.database_url)?;
            init_observability(&config.observability).await?;
            run_monitor(config).await?;
        }
        Commands::ReencryptSecrets => {
            initialise_logging(cli.verbose);
            let config = load_config(cli.database_url)?;
            let service = build_service(&config).await?;

            let report = service.reencrypt_all_secrets().await?;
            println!(
                "rewritten: {}  current: {}  failed: {}",
                report.rewritten, report.current, report.failed
            );
            if report.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::TestConnection { workspace_id, data_source_id } => {
            initialise_logging(cli.verbose);
            let config = load_config(cli.database_url)?;
            let service = build_service(&config).await?;

            let result = service.test_connection(&workspace_id, data_source_id.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(database_url: Option<String>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(url) = database_url {
        config.database.url = url;
        config.validate()?;
    }
    Ok(config)
}

async fn build_service(config: &AppConfig) -> anyhow::Result<DataSourceService> {
    let pool = create_pool(&config.database).await?;
    let cipher = Arc::new(SecretCipher::new(&config.cipher)?);
    let hub = Arc::new(BroadcastHub::new(config.monitor.subscriber_buffer));
    Ok(DataSourceService::with_sqlx(pool, cipher, config.providers.clone(), hub))
}

async fn run_monitor(config: AppConfig) -> anyhow::Result<()> {
    log_config_info(&config);
    let service = build_service(&config).await?;
    let shutdown = CancellationToken::new();

    let monitor = if config.monitor.enabled {
        let monitor =
            StatusMonitor::new(service.resolver().clone(), Arc::clone(service.hub()), &config.monitor);
        Some(monitor.spawn(shutdown.clone()))
    } else {
        warn!("Status monitor disabled; nothing to run besides the service");
        None
    };

    tokio::signal::ctrl_c().await.context("Failed to install Ctrl-C handler")?;
    info!("Shutdown signal received");
    shutdown.cancel();

    if let Some(task) = monitor {
        if let Err(e) = task.await {
            warn!(error = %e, "Status monitor task ended abnormally");
        }
    }
    Ok(())
}

fn initialise_logging(verbose: bool) {
    let config = ObservabilityConfig {
        log_level: if verbose { "debug" } else { "warn" }.to_string(),
        ..ObservabilityConfig::from_env()
    };
    // A subscriber may already be installed (e.g. in integration tests)
    let _ = init_logging(&config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_test_connection() {
        let cli = Cli::try_parse_from([
            "sourceplane",
            "test-connection",
            "ws-1",
            "--data-source-id",
            "ds-9",
        ])
        .unwrap();
        match cli.command {
            Commands::TestConnection { workspace_id, data_source_id } => {
                assert_eq!(workspace_id, "ws-1");
                assert_eq!(data_source_id.as_deref(), Some("ds-9"));
            }
            _ => panic!("expected test-connection"),
        }
    }

    #[test]
    fn test_parse_secret_commands() {
        assert!(matches!(
            Cli::try_parse_from(["sourceplane", "reencrypt-secrets"]).unwrap().command,
            Commands::ReencryptSecrets
        ));
        assert!(matches!(
            Cli::try_parse_from(["sourceplane", "encrypt-secret"]).unwrap().command,
            Commands::EncryptSecret
        ));
    }
}
