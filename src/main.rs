mod config;
mod health;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::health::{HealthProbe, HealthState};
use crate::pipeline::Scheduler;
use crate::scraper::GroundwaterScraper;
use crate::storage::Repository;
use crate::storage::queries::QueryStore;
use crate::storage::writer::ReconcilingWriter;

#[derive(Parser)]
#[command(
    name = "groundwater-crawler",
    about = "Groundwater level crawler for the NLWKN measurement page",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the measurement page until interrupted (default)
    Run,

    /// Crawl once, ignoring the minimum interval, and wait for the writes
    CrawlOnce,

    /// Show database statistics
    Stats,

    /// Apply schema migrations without crawling
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "groundwater_crawler=info,warn",
        1 => "groundwater_crawler=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("starting groundwater crawler");
            let health = Arc::new(HealthState::default());
            let (scheduler, repo) = build_scheduler(&config, Arc::clone(&health))?;

            if config.health.enabled {
                let server = HealthProbe::bind(config.health.bind_addr)?;
                HealthProbe::new(health, repo).spawn(server)?;
            }

            scheduler.run(shutdown_signal()).await;

            // Background writes are not awaited.
            info!("shutting down gracefully");
            std::process::exit(0);
        }

        Command::CrawlOnce => {
            let _t = utils::Timer::start("Single crawl");
            let (mut scheduler, repo) =
                build_scheduler(&config, Arc::new(HealthState::default()))?;
            scheduler.crawl_once().await?;
            info!(
                "Done: {} stations, {} measurements ({} incomplete)",
                repo.station_count()?,
                repo.measurement_count()?,
                repo.incomplete_count()?
            );
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let stations = repo.station_count()?;
            let measurements = repo.measurement_count()?;
            let incomplete = repo.incomplete_count()?;
            let (min, max) = repo.date_range()?;
            println!("─────────────────────────────────");
            println!("  Groundwater crawler — Database Stats");
            println!("─────────────────────────────────");
            println!("  Stations     : {}", utils::fmt_number(stations));
            println!("  Measurements : {}", utils::fmt_number(measurements));
            println!("  Incomplete   : {}", utils::fmt_number(incomplete));
            println!("  From         : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To           : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

/// Open the store, load the named queries and wire scraper → writer.
fn build_scheduler(
    config: &AppConfig,
    health: Arc<HealthState>,
) -> Result<(Scheduler, Arc<Repository>)> {
    let repo = Arc::new(Repository::open(&config.storage.db_path)?);
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }

    let queries = match &config.storage.queries_path {
        Some(path) => QueryStore::load(path),
        None => QueryStore::embedded(),
    }
    .context("Failed to load named queries")?;
    info!("loaded {} named queries", queries.len());

    let writer = ReconcilingWriter::new(Arc::clone(&repo), Arc::new(queries))?;
    let scraper = GroundwaterScraper::new(&config.source).context("Failed to build scraper")?;

    let scheduler = Scheduler::new(
        Arc::new(scraper),
        Arc::new(writer),
        config.schedule.min_interval(),
        config.schedule.tick_interval(),
        health,
    );
    Ok((scheduler, repo))
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("unable to listen for the interrupt signal: {}", e);
        std::future::pending::<()>().await;
    }
}
