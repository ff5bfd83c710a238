//! Pitchcache CLI - cached predictions and backtest reports from the terminal.
//!
//! Every command reads from the local cache first and only goes to the
//! backend when the cache policy says so, so it keeps working offline.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pitchcache_core::cache::format_age;
use pitchcache_core::{
    ApiClient, Config, ConnectivityTracker, FetchOutcome, FileStorage, Persistence, Reconciler,
    StaleSweeper, SuggestionCache, TracingNotifier, TrainingCache,
};

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "\
Usage: pitchcache <command> [options]

Commands:
  status [--json]                 Show cached report and suggestion count
  train [--force] [--days N] [--start YYYY-MM-DD]
                                  Load the training report, recomputing if needed
  picks <match_id>...             Show suggested picks for matches
  predictions <league_id>         Fetch predictions and cache their picks
  watch                           Keep caches in sync until Ctrl-C
  clear                           Drop all cached data

Set RUST_LOG (e.g. RUST_LOG=debug) to control logging.";

/// Log file prefix under the cache directory in watch mode
const LOG_FILE_PREFIX: &str = "pitchcache.log";

// ============================================================================
// Argument parsing
// ============================================================================

#[derive(Debug, PartialEq)]
enum Command {
    Status { json: bool },
    Train {
        force: bool,
        days: Option<u32>,
        start: Option<NaiveDate>,
    },
    Picks(Vec<String>),
    Predictions(String),
    Watch,
    Clear,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    match command.as_str() {
        "status" => Ok(Command::Status {
            json: rest.iter().any(|a| a == "--json"),
        }),
        "train" => {
            let mut force = false;
            let mut days = None;
            let mut start = None;
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--force" => force = true,
                    "--days" => {
                        let value = iter.next().context("--days needs a value")?;
                        days = Some(value.parse().with_context(|| format!("Invalid --days: {}", value))?);
                    }
                    "--start" => {
                        let value = iter.next().context("--start needs a date")?;
                        start = Some(
                            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                                .with_context(|| format!("Invalid --start date: {}", value))?,
                        );
                    }
                    other => bail!("Unknown option for train: {}", other),
                }
            }
            Ok(Command::Train { force, days, start })
        }
        "picks" => {
            if rest.is_empty() {
                bail!("picks needs at least one match id");
            }
            Ok(Command::Picks(rest.to_vec()))
        }
        "predictions" => match rest {
            [league] => Ok(Command::Predictions(league.clone())),
            _ => bail!("predictions needs exactly one league id"),
        },
        "watch" => Ok(Command::Watch),
        "clear" => Ok(Command::Clear),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the tracing subscriber. With `log_dir`, events also go to a
/// daily-rotated file; keep the returned guard alive until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Watch mode keeps a log file next to the cache.
fn log_dir_for(command: &Command) -> Result<Option<PathBuf>> {
    match command {
        Command::Watch => Ok(Some(Config::cache_dir()?)),
        _ => Ok(None),
    }
}

/// Everything a command needs, wired together once.
struct Services {
    config: Config,
    client: ApiClient,
    persistence: Persistence,
    connectivity: Arc<ConnectivityTracker>,
    suggestions: Arc<SuggestionCache>,
    training: Arc<TrainingCache>,
}

impl Services {
    fn build(config: Config) -> Result<Self> {
        let cache_dir = Config::cache_dir()?;
        let storage = FileStorage::new(cache_dir.join("store"))
            .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;
        let persistence = Persistence::new(Arc::new(storage), config.persist_debounce());

        let client = ApiClient::from_config(&config)?;
        let backend = Arc::new(client.clone());
        let connectivity = Arc::new(ConnectivityTracker::new());

        let suggestions = Arc::new(SuggestionCache::new(
            backend.clone(),
            connectivity.clone(),
            persistence.clone(),
        ));
        let training = Arc::new(TrainingCache::new(
            backend,
            connectivity.clone(),
            persistence.clone(),
            Arc::new(TracingNotifier::new(config.notifications)),
            config.league_ids.clone(),
        ));

        Ok(Self {
            config,
            client,
            persistence,
            connectivity,
            suggestions,
            training,
        })
    }
}

// ============================================================================
// Commands
// ============================================================================

fn print_status(services: &Services, json: bool) -> Result<()> {
    let entry = services.training.entry();

    if json {
        println!("{}", serde_json::to_string_pretty(&entry.report)?);
        return Ok(());
    }

    println!("Backend: {}", services.client.base_url());
    match &entry.report {
        Some(report) => {
            let age = entry.fetched_at.map(format_age).unwrap_or_else(|| "unknown".to_string());
            println!("Training report ({}): {}", age, report.summary());
        }
        None => println!("Training report: none cached"),
    }
    if let Some(error) = services.training.error() {
        println!("Last error: {}", error);
    }
    println!("Cached suggestions: {}", services.suggestions.len());
    Ok(())
}

async fn run_train(services: &Services, force: bool, days: Option<u32>, start: Option<NaiveDate>) {
    let days_back = days.unwrap_or(services.config.days_back);
    let outcome = services.training.fetch_training_data(force, days_back, start).await;

    let source = match outcome {
        FetchOutcome::Fresh => "cached (fresh)",
        FetchOutcome::Snapshot => "server snapshot",
        FetchOutcome::Throttled => "cached (recompute requested recently)",
        FetchOutcome::Stale => "cached (stale)",
        FetchOutcome::Recomputed => "new training run",
        FetchOutcome::Failed => "cached (refresh failed)",
    };

    match services.training.report() {
        Some(report) => println!("{}: {}", source, report.summary()),
        None => println!("No training report available"),
    }
    if let Some(error) = services.training.error() {
        eprintln!("{}", error);
    }
}

async fn run_picks(services: &Services, match_ids: &[String]) {
    services.suggestions.prefetch_many(match_ids).await;

    for match_id in match_ids {
        match services.suggestions.get_picks(match_id) {
            Some(picks) if !picks.is_empty() => {
                let age = services
                    .suggestions
                    .cached_at(match_id)
                    .map(format_age)
                    .unwrap_or_default();
                println!("{} ({}):", match_id, age);
                for pick in picks {
                    println!("  {}", pick.label());
                }
            }
            _ => println!("{}: no suggestions", match_id),
        }
    }
}

async fn run_predictions(services: &Services, league_id: &str) -> Result<()> {
    let predictions = match services.client.fetch_predictions(league_id).await {
        Ok(predictions) => {
            services.connectivity.record_success();
            predictions
        }
        Err(e) => {
            services.connectivity.record_failure(&e);
            return Err(e).with_context(|| format!("Failed to fetch predictions for league {}", league_id));
        }
    };

    let ingested = services.suggestions.ingest_predictions(&predictions);
    for prediction in &predictions {
        println!(
            "{}  {} vs {}  ({} picks)",
            prediction.match_id,
            prediction.home_team.as_deref().unwrap_or("?"),
            prediction.away_team.as_deref().unwrap_or("?"),
            prediction.suggested_picks.len()
        );
    }
    info!(ingested, league_id, "Cached picks from predictions");
    Ok(())
}

async fn run_watch(services: &Services) -> Result<()> {
    let reconciler = Arc::new(Reconciler::new(
        services.training.clone(),
        services.config.reconcile_interval(),
    ));
    let reconcile_handle = reconciler.spawn();
    let sweep_handle =
        StaleSweeper::new(services.suggestions.clone(), services.config.stale_sweep_interval()).spawn();

    let mut availability = services.connectivity.subscribe();
    eprintln!("Watching for updates, press Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = availability.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *availability.borrow_and_update();
                eprintln!("{}", if online { "Backend online" } else { "Backend offline, serving cached data" });
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    reconcile_handle.stop().await;
    sweep_handle.stop().await;
    Ok(())
}

fn clear_all(services: &Services) {
    services.training.clear_cache();
    services.suggestions.clear();
    println!("Cache cleared");
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    // Tracing first so warnings from loading the config are visible
    let log_dir = log_dir_for(&command)?;
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(command = ?command, "Pitchcache starting");

    let config = Config::load()?;

    let services = Services::build(config)?;

    let result = match command {
        Command::Status { json } => print_status(&services, json),
        Command::Train { force, days, start } => {
            run_train(&services, force, days, start).await;
            Ok(())
        }
        Command::Picks(match_ids) => {
            run_picks(&services, &match_ids).await;
            Ok(())
        }
        Command::Predictions(league_id) => run_predictions(&services, &league_id).await,
        Command::Watch => run_watch(&services).await,
        Command::Clear => {
            clear_all(&services);
            Ok(())
        }
        Command::Help => Ok(()),
    };

    // Debounced writes would otherwise be lost at exit
    services.persistence.flush();
    info!("Pitchcache shutting down");
    result
}
