//! Resync CLI
//!
//! Inspect and repair sync job state from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resync::error::Result;
use resync::storage::Storage;
use resync::sync::SyncTracker;
use resync::types::*;

#[derive(Parser)]
#[command(name = "resync-cli")]
#[command(about = "Resumable sync job tracker CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "RESYNC_DB_PATH",
        default_value = "~/.local/share/resync/sync.db"
    )]
    db_path: String,

    /// Storage mode (local, cloud-safe)
    #[arg(long, env = "RESYNC_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Heartbeat age (ms) after which a running job counts as stale
    #[arg(long, env = "RESYNC_STALE_THRESHOLD_MS", default_value = "60000")]
    stale_threshold_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known scopes and their committed watermarks
    Scopes,
    /// Show the overview of a scope
    Status {
        /// Scope name
        scope: String,
    },
    /// List jobs of a scope, newest first
    Jobs {
        /// Scope name
        scope: String,
        /// Maximum number to return
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List lifecycle events of a scope, newest first
    Events {
        /// Scope name
        scope: String,
        /// Maximum number to return
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Fail the running job of a scope if its heartbeat is stale
    Reclaim {
        /// Scope name
        scope: String,
        /// Override the stale threshold for this call
        #[arg(long)]
        threshold_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode: StorageMode = cli
        .storage_mode
        .parse()
        .map_err(resync::ResyncError::Config)?;

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;

    if let Some(warning) = storage.storage_mode_warning() {
        eprintln!("{}", warning);
    }

    let mut config = TrackerConfig {
        stale_threshold_ms: cli.stale_threshold_ms,
        ..Default::default()
    };
    if let Commands::Reclaim {
        threshold_ms: Some(ms),
        ..
    } = &cli.command
    {
        config.stale_threshold_ms = *ms;
    }

    let tracker = SyncTracker::with_config(storage, config);

    match cli.command {
        Commands::Scopes => {
            for state in tracker.scopes()? {
                println!(
                    "{} - {}",
                    state.scope,
                    describe_watermark(state.last_committed_watermark.as_ref())
                );
            }
        }

        Commands::Status { scope } => {
            let overview = tracker.get_overview(&scope)?;
            let activity = tracker.activity(&overview);
            println!("{}", serde_json::to_string_pretty(&overview)?);
            println!("Activity: {}", activity);
        }

        Commands::Jobs { scope, limit } => {
            for job in tracker.job_history(&scope, limit)? {
                println!(
                    "{} [{}] started {} - {}{}",
                    job.run_id,
                    job.status,
                    job.started_at.format("%Y-%m-%d %H:%M:%S"),
                    describe_watermark(job.progress_watermark.as_ref()),
                    job.error
                        .as_deref()
                        .map(|e| format!(" ({})", e))
                        .unwrap_or_default()
                );
            }
        }

        Commands::Events { scope, limit } => {
            for event in tracker.events(&scope, limit)? {
                println!(
                    "{} {} {}{}",
                    event.at.format("%Y-%m-%d %H:%M:%S"),
                    event.kind.as_str(),
                    event.run_id,
                    event
                        .detail
                        .map(|d| format!(" {}", d))
                        .unwrap_or_default()
                );
            }
        }

        Commands::Reclaim { scope, .. } => match tracker.reclaim_if_stale(&scope)? {
            Some(job) => {
                println!("Reclaimed {}", job.run_id);
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            None => println!("Nothing to reclaim for {}", scope),
        },
    }

    Ok(())
}

fn describe_watermark(watermark: Option<&Watermark>) -> String {
    match watermark {
        None => "no watermark".to_string(),
        Some(wm) => match (&wm.timestamp, &wm.cursor) {
            (Some(ts), Some(cursor)) => format!("{} @ {}", ts.to_rfc3339(), cursor),
            (Some(ts), None) => ts.to_rfc3339(),
            (None, Some(cursor)) => format!("cursor {}", cursor),
            (None, None) => "no watermark".to_string(),
        },
    }
}
