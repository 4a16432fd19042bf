use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use statline_cache::{CacheInvalidator, CacheStore, MemoryCache};
use statline_store::{PgStore, Store};
use statline_sync::{
    ArchiveSource, Importer, LiveOptions, LiveSource, RangeReport, SeasonReport, SeasonSync,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

use config::Config;

const FULL_IMPORT_START: i32 = 1999;
const FULL_IMPORT_END: i32 = 2025;

#[derive(Debug, Parser)]
#[command(name = "statline")]
#[command(about = "Sports statistics import and sync pipeline")]
struct Cli {
    /// Default the log filter to debug instead of info.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Backfill seasons from the stats archive.
    Historical {
        #[arg(long, value_enum, default_value_t = HistoricalMode::Year)]
        mode: HistoricalMode,
        /// Season to import (mode year).
        #[arg(long)]
        year: Option<i32>,
        /// First season of the range (modes range and validate).
        #[arg(long, default_value_t = FULL_IMPORT_START)]
        start: i32,
        /// Last season of the range, inclusive.
        #[arg(long, default_value_t = FULL_IMPORT_END)]
        end: i32,
        /// Fetch and count without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Keep the current season fresh from the live scoreboard API.
    Season {
        #[command(subcommand)]
        command: SeasonCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HistoricalMode {
    Year,
    Range,
    Full,
    /// Report per-season game coverage without importing.
    Validate,
    /// Print entity counts and exit.
    Stats,
}

#[derive(Debug, Subcommand)]
enum SeasonCommand {
    /// Teams, rosters, full schedule, stats, injuries.
    Full {
        #[arg(long)]
        season: i32,
    },
    /// Rosters plus one week of games, stats, injuries.
    Update {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
    },
    /// Poll the given week until Ctrl-C.
    Live {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
    },
    StatsOnly {
        #[arg(long)]
        season: i32,
    },
    InjuriesOnly {
        #[arg(long)]
        season: i32,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::from_env()?;

    let pg = PgStore::connect(&config.database_url, config.db_max_conns)
        .await
        .context("connecting to the database")?;
    pg.init_schema().await.context("initializing schema")?;
    let store: Arc<dyn Store> = Arc::new(pg);
    store
        .health_check()
        .await
        .context("database health check failed")?;

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let invalidator = CacheInvalidator::new(cache);

    match cli.command {
        Commands::Historical {
            mode,
            year,
            start,
            end,
            dry_run,
        } => run_historical(&config, store, invalidator, mode, year, start, end, dry_run).await,
        Commands::Season { command } => run_season(&config, store, invalidator, command).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_historical(
    config: &Config,
    store: Arc<dyn Store>,
    invalidator: CacheInvalidator,
    mode: HistoricalMode,
    year: Option<i32>,
    start: i32,
    end: i32,
    dry_run: bool,
) -> Result<()> {
    // Validate and stats only read the store; no source needed.
    match mode {
        HistoricalMode::Validate => {
            let coverage = store.season_coverage(start, end).await?;
            for entry in coverage {
                println!(
                    "{}: {} games [{}]",
                    entry.season,
                    entry.games,
                    entry.status.as_str()
                );
            }
            return Ok(());
        }
        HistoricalMode::Stats => {
            let counts = store.entity_counts().await?;
            println!(
                "teams={} players={} games={} stats={} advanced={} injuries={} total={}",
                counts.teams,
                counts.players,
                counts.games,
                counts.game_stats,
                counts.advanced_stats,
                counts.injuries,
                counts.total()
            );
            return Ok(());
        }
        _ => {}
    }

    let source = Arc::new(ArchiveSource::new(
        &config.archive_base_url,
        &config.user_agent,
    )?);
    let importer = Importer::new(source, store)
        .with_invalidator(invalidator)
        .dry_run(dry_run);

    importer.import_teams().await?;

    match mode {
        HistoricalMode::Year => {
            let year = year.context("--year is required for mode year")?;
            let report = importer.import_season(year).await;
            finish_season(report)
        }
        HistoricalMode::Range => {
            anyhow::ensure!(start <= end, "--start must not exceed --end");
            finish_range(importer.import_range(start, end).await)
        }
        HistoricalMode::Full => {
            finish_range(importer.import_range(FULL_IMPORT_START, FULL_IMPORT_END).await)
        }
        HistoricalMode::Validate | HistoricalMode::Stats => unreachable!(),
    }
}

// Data-level failures are already in the summary; only pre-flight errors
// (config, connectivity) exit non-zero.
fn finish_season(report: SeasonReport) -> Result<()> {
    println!("{}", report.summary());
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    Ok(())
}

fn finish_range(report: RangeReport) -> Result<()> {
    for season in &report.seasons {
        println!("{}", season.summary());
    }
    println!("{}", report.summary());
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    Ok(())
}

async fn run_season(
    config: &Config,
    store: Arc<dyn Store>,
    invalidator: CacheInvalidator,
    command: SeasonCommand,
) -> Result<()> {
    let season = match &command {
        SeasonCommand::Full { season }
        | SeasonCommand::Update { season, .. }
        | SeasonCommand::Live { season, .. }
        | SeasonCommand::StatsOnly { season }
        | SeasonCommand::InjuriesOnly { season } => *season,
    };

    let live = Arc::new(LiveSource::new(
        &config.scoreboard_base_url,
        &config.user_agent,
    )?);
    let archive = Arc::new(ArchiveSource::new(
        &config.archive_base_url,
        &config.user_agent,
    )?);
    let sync = SeasonSync::new(live, archive, store, season).with_invalidator(invalidator.clone());

    let report = match command {
        SeasonCommand::Full { .. } => sync.full().await,
        SeasonCommand::Update { week, .. } => sync.update(week).await,
        SeasonCommand::StatsOnly { .. } => sync.stats_only().await,
        SeasonCommand::InjuriesOnly { .. } => sync.injuries_only().await,
        SeasonCommand::Live { week, .. } => {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    let _ = cancel_tx.send(true);
                }
            });
            let iterations = sync
                .live(
                    LiveOptions {
                        week,
                        interval: config.live_interval,
                    },
                    cancel_rx,
                )
                .await;
            println!("live sync finished after {iterations} iterations");
            return Ok(());
        }
    };

    println!("{}", report.summary());
    if let Ok(usage) = invalidator.usage().await {
        info!(entries = usage.entries, "cache entries after sync");
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_with_errors_still_finish_cleanly() {
        let season = SeasonReport {
            season: 2022,
            errors: vec!["season 2022: schedule: archive returned status 503".into()],
            ..Default::default()
        };
        assert!(finish_season(season).is_ok());

        let range = RangeReport {
            start: 2021,
            end: 2023,
            errors: vec!["season 2022: schedule: archive returned status 503".into()],
            ..Default::default()
        };
        assert!(finish_range(range).is_ok());
    }
}
