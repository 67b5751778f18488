// ABOUTME: CLI entry point for snapshot-replicator
// ABOUTME: Parses commands and routes to the extract/inject/sync pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;

use snapshot_replicator::config::{self, CommonArgs};
use snapshot_replicator::store::{PostgresSource, PostgresTarget};
use snapshot_replicator::{
    ExtractConfig, Extractor, InjectConfig, Injector, Selection, SyncConfig, SyncLoop,
};

#[derive(Parser)]
#[command(name = "snapshot-replicator")]
#[command(about = "Incremental snapshot replication between disconnected data stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract changed records from the source store into timestamped snapshots
    Extract {
        #[command(flatten)]
        common: CommonArgs,
        /// Source store connection string
        #[arg(long, env = "SOURCE_DATABASE_URL")]
        source: String,
        /// Records fetched per source page
        #[arg(long, default_value_t = 100_000)]
        page_size: u64,
    },
    /// Inject previously extracted snapshots chronologically
    Inject {
        #[command(flatten)]
        common: CommonArgs,
        /// Target store connection string
        #[arg(long, env = "TARGET_DATABASE_URL")]
        target: String,
        /// Apply these models first (comma-separated)
        #[arg(long, value_delimiter = ',')]
        order: Option<Vec<String>>,
        /// Records per target transaction
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Batches kept in flight concurrently
        #[arg(long, default_value_t = 100)]
        parallel_batches: usize,
        /// Target connections backing batch transactions
        #[arg(long, default_value_t = 10)]
        connections: usize,
    },
    /// Watch the source store and continuously replicate into the target
    Sync {
        #[command(flatten)]
        common: CommonArgs,
        /// Source store connection string
        #[arg(long, env = "SOURCE_DATABASE_URL")]
        source: String,
        /// Target store connection string
        #[arg(long, env = "TARGET_DATABASE_URL")]
        target: String,
        /// Apply these models first during injection (comma-separated)
        #[arg(long, value_delimiter = ',')]
        order: Option<Vec<String>>,
        /// Seconds between sync cycles
        #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 3600)]
        interval_secs: u64,
        /// Run a single sync cycle and exit (don't run continuously)
        #[arg(long)]
        once: bool,
        /// Records fetched per source page
        #[arg(long, default_value_t = 100_000)]
        page_size: u64,
        /// Records per target transaction
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Batches kept in flight concurrently
        #[arg(long, default_value_t = 100)]
        parallel_batches: usize,
        /// Target connections backing batch transactions
        #[arg(long, default_value_t = 10)]
        connections: usize,
    },
}

const MENU_SYNC: &str = "Sync - watch for source changes and replicate them continuously";
const MENU_EXTRACT: &str = "Extract - dump source records into timestamped snapshots";
const MENU_INJECT: &str = "Inject - apply previously extracted snapshots chronologically";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(Commands::Extract {
            common,
            source,
            page_size,
        }) => run_extract(&common, &source, ExtractConfig { page_size }).await,
        Some(Commands::Inject {
            common,
            target,
            order,
            batch_size,
            parallel_batches,
            connections,
        }) => {
            let selection = common.selection().with_order(order.unwrap_or_default());
            run_inject(
                &common,
                &target,
                selection,
                InjectConfig {
                    batch_size,
                    parallel_batches,
                },
                connections,
            )
            .await
        }
        Some(Commands::Sync {
            common,
            source,
            target,
            order,
            interval_secs,
            once,
            page_size,
            batch_size,
            parallel_batches,
            connections,
        }) => {
            let selection = common.selection().with_order(order.unwrap_or_default());
            let config = SyncConfig {
                interval: Duration::from_secs(interval_secs),
                extract: ExtractConfig { page_size },
                inject: InjectConfig {
                    batch_size,
                    parallel_batches,
                },
            };
            run_sync(&common, &source, &target, selection, config, connections, once).await
        }
        None => run_menu().await,
    }
}

/// Interactive action picker, used when no subcommand is given.
///
/// Connection strings come from the environment on this path.
async fn run_menu() -> Result<()> {
    let action = inquire::Select::new(
        "What would you like to do?",
        vec![MENU_SYNC, MENU_EXTRACT, MENU_INJECT],
    )
    .prompt()
    .context("No action selected")?;

    let common = CommonArgs::from_env();
    match action {
        MENU_EXTRACT => {
            let source = config::require_env("SOURCE_DATABASE_URL")?;
            run_extract(&common, &source, ExtractConfig::default()).await
        }
        MENU_INJECT => {
            let target = config::require_env("TARGET_DATABASE_URL")?;
            run_inject(
                &common,
                &target,
                common.selection(),
                InjectConfig::default(),
                10,
            )
            .await
        }
        _ => {
            let source = config::require_env("SOURCE_DATABASE_URL")?;
            let target = config::require_env("TARGET_DATABASE_URL")?;
            let config = SyncConfig {
                interval: config::sync_interval_from_env(),
                ..SyncConfig::default()
            };
            run_sync(&common, &source, &target, common.selection(), config, 10, false).await
        }
    }
}

async fn run_extract(common: &CommonArgs, source_url: &str, config: ExtractConfig) -> Result<()> {
    let registry = common.registry()?;
    let snapshots = common.snapshot_store();
    let selection = common.selection();
    let source = PostgresSource::connect(source_url).await?;

    println!();
    println!("------------------ Extracting ------------------");
    println!();

    let extractor = Extractor::new(&source, &registry, &snapshots, config);
    let stats = extractor.run(&selection, chrono::Utc::now()).await?;

    println!();
    println!(
        "Extracted {} records across {} model(s), {} skipped as unchanged",
        stats.records_extracted, stats.models_extracted, stats.models_skipped
    );
    report_errors("Extraction", &stats.errors)
}

async fn run_inject(
    common: &CommonArgs,
    target_url: &str,
    selection: Selection,
    config: InjectConfig,
    connections: usize,
) -> Result<()> {
    let registry = common.registry()?;
    let snapshots = common.snapshot_store();
    let target = PostgresTarget::connect(target_url, connections).await?;
    for name in selection.apply(snapshots.discovered_models()?) {
        if let Some(meta) = registry.get(&name) {
            target.ensure_model_table(meta).await?;
        }
    }

    println!();
    println!("------------------ Injecting ------------------");
    println!();

    let injector = Injector::new(&target, &registry, &snapshots, config);
    let stats = injector.run(&selection).await?;

    println!();
    println!(
        "Injected {} snapshot file(s) ({} records) across {} model(s)",
        stats.files_injected, stats.records_injected, stats.models_injected
    );
    report_errors("Injection", &stats.errors)
}

async fn run_sync(
    common: &CommonArgs,
    source_url: &str,
    target_url: &str,
    selection: Selection,
    config: SyncConfig,
    connections: usize,
    once: bool,
) -> Result<()> {
    let registry = common.registry()?;
    let snapshots = common.snapshot_store();
    let source = PostgresSource::connect(source_url).await?;
    let target = PostgresTarget::connect(target_url, connections).await?;
    for name in registry.model_names() {
        if selection.allows(name) {
            if let Some(meta) = registry.get(name) {
                target.ensure_model_table(meta).await?;
            }
        }
    }

    let interval = config.interval;
    let sync = SyncLoop::new(&source, &target, &registry, &snapshots, selection, config);

    if once {
        let stats = sync.run_cycle().await?;
        println!();
        println!("========================================");
        println!("Sync cycle complete");
        println!("========================================");
        println!("  Records extracted: {}", stats.records_extracted);
        println!("  Records injected: {}", stats.records_injected);
        return report_errors("Sync", &stats.errors);
    }

    println!(
        "Will scan the source store every {} seconds",
        interval.as_secs()
    );
    println!("Press Ctrl+C to stop");

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    sync.run(shutdown_rx).await
}

fn report_errors(phase: &str, errors: &[String]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for error in errors {
        println!("  {}", error);
    }
    anyhow::bail!("{} finished with {} error(s)", phase, errors.len())
}
