//! Auth Service - schema management for the credential store.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_service_lib::config::AuthServiceConfig;
use auth_service_lib::infra::Database;

#[derive(Parser)]
#[command(name = "auth-service")]
#[command(about = "Credential and session lifecycle service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Validate configuration and store connectivity
    Check,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Run pending migrations
    Up,
    /// Rollback last migration
    Down,
    /// Show migration status
    Status,
    /// Reset and re-run all migrations
    Fresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AuthServiceConfig::from_env()?;
    let db = Database::connect_without_migrations(&config.database).await?;

    match cli.command {
        Commands::Migrate { action } => match action {
            MigrateAction::Up => {
                db.run_migrations().await?;
                tracing::info!("Migrations applied");
            }
            MigrateAction::Down => {
                db.rollback_migration().await?;
                tracing::info!("Last migration rolled back");
            }
            MigrateAction::Status => {
                for (name, applied) in db.migration_status().await? {
                    let marker = if applied { "applied" } else { "pending" };
                    println!("{:<8} {}", marker, name);
                }
            }
            MigrateAction::Fresh => {
                db.fresh_migrations().await?;
                tracing::warn!("Database reset and all migrations re-applied");
            }
        },
        Commands::Check => {
            db.ping().await?;
            auth_service_lib::build_authenticator(db.into_connection(), &config)?;
            tracing::info!(config = ?config, "Configuration valid and store reachable");
        }
    }

    Ok(())
}
