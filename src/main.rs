//! cosential-sync: incremental extract of Cosential CRM entities.
//!
//! Each run resolves the records changed since the last version checkpoint,
//! fetches their full bodies and configured sub-arrays from the Compass REST
//! API, stages them as dated JSON blobs, loads them into warehouse tables
//! and finally advances the checkpoint.

#![warn(clippy::all)]

mod cli;
mod config;
mod cosential;
mod pipeline;
mod secrets;
mod shutdown;
mod storage;
mod types;
mod warehouse;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use cosential::CosentialClient;
use pipeline::{Pipeline, RunReport, Staging};
use storage::{LocalObjectStore, Partition};
use warehouse::{SqliteWarehouse, Warehouse};

/// Which part of the pipeline a run command executes.
#[derive(Debug, Clone, Copy)]
enum RunKind {
    Sync,
    Extract,
    RefreshVersions,
}

/// Turn a finished run into the process outcome: failed entities and
/// interrupted runs exit non-zero so the scheduler notices.
fn finish(report: &RunReport) -> anyhow::Result<()> {
    if report.has_failures() {
        anyhow::bail!(
            "{} entities failed: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    if report.interrupted {
        anyhow::bail!("Run interrupted before all entities were processed");
    }
    Ok(())
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let db_path = config::expand_tilde(&args.warehouse.warehouse);

    if !db_path.exists() {
        println!("No warehouse found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let db = SqliteWarehouse::open(&db_path).await?;
    let summary = db.get_summary().await?;

    println!("Warehouse: {}", db.path().display());
    println!();
    println!("Runs:");
    println!("  Total:       {}", summary.total_runs);
    println!("  Interrupted: {}", summary.interrupted_runs);
    println!();

    if let Some(started) = &summary.last_started {
        println!(
            "Last run started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    match &summary.last_completed {
        Some(completed) => println!(
            "Last run completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None if summary.last_started.is_some() => println!("Last run completed: never"),
        None => {}
    }

    if let Some(stats) = &summary.last_stats {
        println!();
        println!("Last run:");
        println!("  Entities synced:   {}", stats.entities_synced);
        println!("  Entities deferred: {}", stats.entities_deferred);
        println!("  Records written:   {}", stats.records_written);
        println!("  Rows loaded:       {}", stats.rows_loaded);
        if stats.interrupted {
            println!("  (interrupted)");
        }
    }

    Ok(())
}

/// Run the load command. Needs no API access.
async fn run_load(args: cli::LoadArgs) -> anyhow::Result<()> {
    let storage = config::StorageConfig::from_args(args.storage)?;
    let store = LocalObjectStore::new(&storage.root, &storage.container)?;
    let warehouse = SqliteWarehouse::open(&config::expand_tilde(&args.warehouse.warehouse)).await?;
    let partition = args
        .date
        .map(Partition::for_date)
        .unwrap_or_else(Partition::today);
    tracing::info!(
        container = store.container(),
        partition = %partition,
        warehouse = %warehouse.path().display(),
        "Loading staged records"
    );

    let shutdown = shutdown::install_signal_handler()?;
    let staging = Staging {
        store: &store,
        partition,
        run_tag: &storage.run_tag,
    };
    let report = pipeline::run_load(staging, &warehouse, args.on_error, &shutdown).await?;
    finish(&report)
}

/// Run one of the commands that talk to the API.
async fn run_pipeline(kind: RunKind, args: cli::RunArgs) -> anyhow::Result<()> {
    let config = config::Config::from_cli(args)?;
    tracing::debug!(?config, "Resolved configuration");

    let secrets = config.api.secret_store();
    let credentials = config
        .api
        .resolve_credentials(secrets.as_ref())
        .await
        .context("Failed to resolve API credentials")?;
    let client = CosentialClient::new(
        &config.api.base_url,
        credentials,
        config.api.request_timeout,
    )?;
    let store = LocalObjectStore::new(&config.storage.root, &config.storage.container)?;
    let warehouse = SqliteWarehouse::open(&config.warehouse).await?;
    let partition = Partition::today();

    tracing::info!(
        command = ?kind,
        api = client.base_url(),
        container = store.container(),
        partition = %partition,
        policy = ?config.policy,
        "Starting cosential-sync"
    );

    let shutdown = shutdown::install_signal_handler()?;
    let pipeline = Pipeline {
        session: &client,
        staging: Staging {
            store: &store,
            partition,
            run_tag: &config.storage.run_tag,
        },
        warehouse: &warehouse,
        policy: config.policy,
        shutdown,
    };

    match kind {
        RunKind::Sync => finish(&pipeline.sync().await?),
        RunKind::Extract => finish(&pipeline.extract().await?),
        RunKind::RefreshVersions => {
            let checkpoint = pipeline.refresh_versions().await?;
            println!("Version checkpoint:");
            for (entity, version) in checkpoint.iter() {
                println!("  {entity}: {version}");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_pipeline(RunKind::Sync, args).await,
        Command::Extract(args) => run_pipeline(RunKind::Extract, args).await,
        Command::RefreshVersions(args) => run_pipeline(RunKind::RefreshVersions, args).await,
        Command::Load(args) => run_load(args).await,
        Command::Status(args) => run_status(args).await,
    }
}
