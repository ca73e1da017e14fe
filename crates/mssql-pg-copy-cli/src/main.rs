//! mssql-pg-copy CLI - copy an MSSQL schema and its data into PostgreSQL.

use clap::{Parser, Subcommand};
use mssql_pg_copy::{
    Config, MigrateError, MigrationStatistics, MssqlToPostgresOrchestrator, ProgressUpdate,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mssql-pg-copy")]
#[command(about = "Copy an MSSQL schema and its data into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every table from source to target
    Run {
        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            batch_size,
            source_schema,
            target_schema,
        } => {
            // Apply overrides
            if let Some(n) = batch_size {
                config.migration.batch_size = Some(n);
            }
            if let Some(schema) = source_schema {
                config.source.schema = schema;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            config.validate()?;

            let mut orchestrator = MssqlToPostgresOrchestrator::from_config(&config);

            let printer = if cli.progress {
                let (tx, rx) = mpsc::unbounded_channel();
                orchestrator = orchestrator.with_progress(tx);
                Some(spawn_progress_printer(rx))
            } else {
                None
            };

            let outcome = orchestrator.execute().await;

            // Dropping the orchestrator closes the progress channel.
            drop(orchestrator);
            if let Some(printer) = printer {
                printer.await.ok();
            }

            let stats = outcome?;
            if cli.output_json {
                println!("{}", stats.to_json()?);
            } else {
                print_summary(&stats);
            }

            Ok(exit_status(!stats.has_failures()))
        }

        Commands::Validate => {
            let mut orchestrator = MssqlToPostgresOrchestrator::from_config(&config);
            let checks = orchestrator.validate().await?;
            let all_match = checks.iter().all(|c| c.matches);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("Row count validation:");
                for check in &checks {
                    println!(
                        "  {} {}: source={} target={}",
                        if check.matches { "✓" } else { "✗" },
                        check.table,
                        count_text(check.source_rows),
                        count_text(check.target_rows)
                    );
                    if let Some(ref err) = check.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  {}/{} tables match",
                    checks.iter().filter(|c| c.matches).count(),
                    checks.len()
                );
            }

            Ok(exit_status(all_match))
        }

        Commands::HealthCheck => {
            let mut orchestrator = MssqlToPostgresOrchestrator::from_config(&config);
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MSSQL): {} ({}ms)",
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

            Ok(exit_status(result.healthy))
        }
    }
}

fn exit_status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn count_text(count: Option<u64>) -> String {
    count.map_or_else(|| "missing".to_string(), |n| n.to_string())
}

fn print_summary(stats: &MigrationStatistics) {
    println!("\nMigration completed!");
    for result in &stats.results {
        if result.success {
            println!(
                "  ✓ {}: {} rows ({:.2}s)",
                result.table_name, result.rows_migrated, result.duration_seconds
            );
        } else {
            println!(
                "  ✗ {}: {} ({:.2}s)",
                result.table_name,
                result.error.as_deref().unwrap_or("unknown error"),
                result.duration_seconds
            );
        }
    }
    println!("\n  Tables succeeded: {}", stats.tables_processed);
    println!("  Total rows: {}", stats.total_rows);
    println!("  Tables failed: {}", stats.failed_tables.len());
    if stats.has_failures() {
        println!("  Failed tables: {:?}", stats.failed_tables);
    }
}

/// Print each progress update as one JSON line on stderr.
fn spawn_progress_printer(mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&update) {
                eprintln!("{}", line);
            }
        }
    })
}

/// Logs go to stderr so `--output-json` keeps stdout machine-readable.
/// `RUST_LOG` takes precedence over `--verbosity`.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
