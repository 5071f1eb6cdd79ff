//! # Datawatch Main Entry Point

use clap::{Parser, Subcommand};
use datawatch::{
    automation::lifecycle::AutomationService, config::ConfigLoader, db, server::run_server,
    telemetry,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;

#[derive(Parser)]
#[command(name = "datawatch")]
#[command(about = "Data-quality automation service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Run the automation orchestrator without the API server
    Orchestrator,
    /// Run the API server (default)
    Serve,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config_loader = ConfigLoader::new();
    let config = config_loader.load()?;

    telemetry::init_tracing(&config)?;

    let db = db::init_pool(&config).await?;

    if let Some(command) = cli.command {
        match command {
            Commands::Migrate { action } => {
                handle_migrate_command(&db, action).await?;
                return Ok(());
            }
            Commands::Orchestrator => {
                run_migrations_for_dev_profiles(&config, &db).await?;
                return run_orchestrator(config, db).await;
            }
            Commands::Serve => {}
        }
    }

    run_migrations_for_dev_profiles(&config, &db).await?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::info!(profile = %config.profile, config = %redacted_json, "Loaded configuration");
    }

    run_server(config, db).await
}

async fn run_migrations_for_dev_profiles(
    config: &datawatch::config::AppConfig,
    db: &DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if config.profile == "local" || config.profile == "test" {
        tracing::info!(profile = %config.profile, "Running migrations automatically");
        Migrator::up(db, None).await?;
    }
    Ok(())
}

async fn handle_migrate_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match action {
        MigrateAction::Up => {
            println!("Applying migrations...");
            Migrator::up(db, None).await?;
            println!("All migrations applied successfully");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db, Some(1)).await?;
            println!("Migration rolled back successfully");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;
            println!("Applied migrations: {}", applied.len());
            println!("Pending migrations: {}", pending.len());
        }
    }
    Ok(())
}

/// Headless automation service: orchestrator plus metadata worker,
/// without the HTTP surface.
async fn run_orchestrator(
    config: datawatch::config::AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = AutomationService::new(db, &config)?;
    service.start_all();

    tracing::info!("Automation orchestrator running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    service.stop_all().await;
    Ok(())
}
