//! Tenant Storage
//!
//! Operator binary for the multi-tier storage layer: runs the ops API with
//! the periodic health/cleanup loop, or performs one-shot maintenance
//! (health check, retention cleanup, backups, migrations).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tenant_storage::monitoring::HealthStatus;
use tenant_storage::{
    ApiServer, BackupService, MigrationService, StorageConfig, StorageManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tenant Storage - cache, relational and blob storage behind one API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database URL from the config file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ops API and the periodic health/cleanup loop
    Serve {
        /// Ops API bind address
        #[arg(long, env = "API_ADDR")]
        bind: Option<SocketAddr>,
    },
    /// Probe every store once and print the result
    Health,
    /// Apply telemetry and verification retention
    Cleanup,
    /// Tenant snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Copy a tenant's data to a new tenant id
    Migrate {
        old_tenant_id: String,
        new_tenant_id: String,
        /// Verify parity after copying
        #[arg(long)]
        verify: bool,
    },
    /// Compare two tenants after a migration
    VerifyMigration {
        old_tenant_id: String,
        new_tenant_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Snapshot a tenant
    Create { tenant_id: String },
    /// Replace a tenant's rows with a snapshot
    Restore { tenant_id: String, location: String },
    /// List a tenant's snapshots, newest first
    List { tenant_id: String },
    /// Delete snapshots older than the retention window
    Prune {
        tenant_id: String,
        /// Defaults to retention.backup_retention_days
        #[arg(long)]
        retention_days: Option<u32>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    info!("Starting Tenant Storage {}", tenant_storage::VERSION);

    let manager = StorageManager::from_config(&config)
        .await
        .context("failed to initialize storage")?;

    let monitoring = manager.monitoring().clone();
    let result = match args.command {
        Command::Serve { bind } => serve(manager, config, bind).await,
        Command::Health => {
            let health = manager.monitoring().check_system_health().await;
            print_json(&health)?;
            if health.status == HealthStatus::Degraded {
                bail!("system is degraded");
            }
            Ok(())
        }
        Command::Cleanup => print_json(&manager.run_cleanup().await?),
        Command::Backup { command } => run_backup(manager, &config, command).await,
        Command::Migrate {
            old_tenant_id,
            new_tenant_id,
            verify,
        } => {
            let migrations = MigrationService::new(manager);
            let summary = migrations
                .migrate_guild_data(&old_tenant_id, &new_tenant_id)
                .await?;
            print_json(&summary)?;
            if verify {
                verify_migration(&migrations, &old_tenant_id, &new_tenant_id).await?;
            }
            Ok(())
        }
        Command::VerifyMigration {
            old_tenant_id,
            new_tenant_id,
        } => {
            let migrations = MigrationService::new(manager);
            verify_migration(&migrations, &old_tenant_id, &new_tenant_id).await
        }
    };

    // Queued metric samples would be dropped with the runtime
    monitoring.flush().await;
    result
}

fn load_config(args: &Args) -> anyhow::Result<StorageConfig> {
    let mut config = match &args.config {
        Some(path) => StorageConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => StorageConfig::default(),
    };
    if let Some(url) = &args.database_url {
        config.database.url = url.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn serve(
    manager: StorageManager,
    mut config: StorageConfig,
    bind: Option<SocketAddr>,
) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind_addr = addr;
    }

    let shutdown = CancellationToken::new();

    let monitoring = manager.monitoring().clone();
    let interval = Duration::from_secs(config.monitoring.health_interval_secs.max(1));
    let loop_token = shutdown.clone();
    let monitor_handle = tokio::spawn(async move {
        monitoring.run_periodic(interval, loop_token).await;
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let server = ApiServer::new(config.server.clone(), manager, shutdown.clone());
    let result = server.run().await;

    shutdown.cancel();
    if let Err(e) = monitor_handle.await {
        error!("Monitoring loop ended abnormally: {}", e);
    }

    result?;
    info!("Shutdown complete");
    Ok(())
}

async fn run_backup(
    manager: StorageManager,
    config: &StorageConfig,
    command: BackupCommand,
) -> anyhow::Result<()> {
    let backups = BackupService::new(manager);
    match command {
        BackupCommand::Create { tenant_id } => print_json(&backups.create_backup(&tenant_id).await?),
        BackupCommand::Restore {
            tenant_id,
            location,
        } => print_json(&backups.restore_backup(&tenant_id, &location).await?),
        BackupCommand::List { tenant_id } => print_json(&backups.list_backups(&tenant_id).await?),
        BackupCommand::Prune {
            tenant_id,
            retention_days,
        } => {
            let days = retention_days.unwrap_or(config.retention.backup_retention_days);
            let removed = backups.cleanup_old_backups(&tenant_id, days).await?;
            print_json(&serde_json::json!({
                "tenantId": tenant_id,
                "retentionDays": days,
                "removed": removed,
            }))
        }
    }
}

async fn verify_migration(
    migrations: &MigrationService,
    old_tenant_id: &str,
    new_tenant_id: &str,
) -> anyhow::Result<()> {
    let report = migrations
        .verify_migration(old_tenant_id, new_tenant_id)
        .await?;
    print_json(&report)?;
    if !report.passed {
        bail!(
            "migration {} -> {} did not verify: {:?}",
            old_tenant_id,
            new_tenant_id,
            report.mismatched_categories()
        );
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sqlx=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("axum=info".parse()?);

    // Logs go to stderr so command output on stdout stays valid JSON
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
