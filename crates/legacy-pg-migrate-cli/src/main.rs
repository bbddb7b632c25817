//! legacy-pg-migrate CLI - legacy MySQL portal to PostgreSQL migration.

use clap::{Parser, Subcommand};
use legacy_pg_migrate::orchestrator::{dependency_levels, plan};
use legacy_pg_migrate::{Config, EntityKey, MappingRegistry, MigrateError, Migrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "legacy-pg-migrate")]
#[command(about = "Legacy MySQL portal to PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: MYSQL_* and PG_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every entity in dependency order, then the join tables
    Run {
        /// Only migrate these entities (comma separated)
        #[arg(long, value_delimiter = ',')]
        entities: Vec<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Leave the join tables out
        #[arg(long)]
        skip_relationships: bool,
    },

    /// Migrate a single entity whose dependencies are already migrated
    MigrateTable {
        /// Entity key, e.g. `user` or `institution`
        entity: String,
    },

    /// Compare row counts between source and target
    Verify,

    /// Print the migration order without connecting
    Plan {
        /// Only plan these entities (comma separated)
        #[arg(long, value_delimiter = ',')]
        entities: Vec<String>,
    },

    /// Show the latest migration log entries
    History {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)?;

    // Planning needs neither configuration nor connections.
    if let Commands::Plan { entities } = &cli.command {
        return print_plan(entities, cli.output_json);
    }

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            info!("No configuration file given, using environment");
            Config::from_env()?
        }
    };

    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Plan { .. } => Ok(()),

        Commands::Run {
            entities,
            workers,
            skip_relationships,
        } => {
            if !entities.is_empty() {
                config.migration.entities = entities;
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            if skip_relationships {
                config.migration.skip_relationships = true;
            }
            config.validate()?;

            let migrator = Migrator::connect(config)
                .await?
                .with_cancellation(cancel_token);
            let result = migrator.run_full_migration().await;
            migrator.disconnect().await;
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report);
            }
            if !report.is_success() {
                return Err(MigrateError::Config(
                    "Migration finished with failures".to_string(),
                ));
            }
            Ok(())
        }

        Commands::MigrateTable { entity } => {
            let key = EntityKey::from_str(&entity)?;
            let migrator = Migrator::connect(config)
                .await?
                .with_cancellation(cancel_token);
            let result = migrator.migrate_table(key).await;
            migrator.disconnect().await;
            let progress = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!(
                    "{}: {}/{} migrated, {} failed",
                    progress.entity,
                    progress.migrated_records,
                    progress.total_records,
                    progress.failed_records
                );
            }
            Ok(())
        }

        Commands::Verify => {
            let migrator = Migrator::connect(config).await?;
            let result = migrator.verify_migration().await;
            migrator.disconnect().await;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Row counts:");
                for table in &result.tables {
                    println!(
                        "  {} {:<20} source={} target={}",
                        if table.matches { "OK  " } else { "DIFF" },
                        table.entity,
                        table.source_count,
                        table.target_count
                    );
                }
                let mismatched = result.mismatches().count();
                println!("\n  {} of {} tables differ", mismatched, result.tables.len());
            }
            Ok(())
        }

        Commands::History { limit } => {
            let migrator = Migrator::connect(config).await?;
            let result = migrator.history(limit).await;
            migrator.disconnect().await;
            let entries = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No migrations logged yet");
            } else {
                for entry in &entries {
                    println!(
                        "{}  {:<20} {:?}  {}/{} migrated, {} failed{}",
                        entry.start_time.format("%Y-%m-%d %H:%M:%S"),
                        entry.table_name,
                        entry.status,
                        entry.migrated_records,
                        entry.total_records,
                        entry.failed_records,
                        entry
                            .error_message
                            .as_deref()
                            .map(|m| format!("  ({})", m))
                            .unwrap_or_default()
                    );
                }
            }
            Ok(())
        }

        Commands::HealthCheck => {
            let migrator = Migrator::connect(config).await?;
            let result = migrator.health_check().await;
            migrator.disconnect().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MySQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
            Ok(())
        }
    }
}

fn print_plan(entities: &[String], output_json: bool) -> Result<(), MigrateError> {
    let registry = MappingRegistry::portal()?;
    let order = plan(&registry, entities)?;
    let levels = dependency_levels(&registry, &order);

    if output_json {
        let json = serde_json::json!({
            "order": order.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "levels": levels
                .iter()
                .map(|l| l.iter().map(|k| k.as_str()).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "relationships": registry
                .relationships()
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("Migration order:");
    for (i, key) in order.iter().enumerate() {
        let target = registry
            .get(*key)
            .map(|m| m.target_table.as_str())
            .unwrap_or_default();
        println!("  {:>2}. {:<20} -> {}", i + 1, key.as_str(), target);
    }
    println!("\nLevels:");
    for (depth, level) in levels.iter().enumerate() {
        let names: Vec<&str> = level.iter().map(|k| k.as_str()).collect();
        println!("  {}: {}", depth, names.join(", "));
    }
    println!("\nRelationships:");
    for relationship in registry.relationships() {
        println!(
            "  {:<20} -> {}",
            relationship.name, relationship.target_table
        );
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), MigrateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        other => {
            return Err(MigrateError::Config(format!(
                "Invalid verbosity '{}'. Valid values: debug, info, warn, error",
                other
            )))
        }
    };

    // RUST_LOG, when set, wins over --verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => {
            return Err(MigrateError::Config(format!(
                "Invalid log format '{}'. Valid values: text, json",
                other
            )))
        }
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Finishing the current batch...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Finishing the current batch...");
        token.cancel();
    });

    cancel_token
}
