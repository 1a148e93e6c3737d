//! # cf-runner
//!
//! Entry point for the case feed refresher.
//!
//! Loads a JSON configuration file, wires the websocket case source, the
//! SQLite store and the snapshot cache into a [`Pipeline`](pipeline::Pipeline),
//! and drives it on a fixed interval until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cf-runner config.json --log-level info          # scheduled refresh
//! cf-runner config.json --once                     # one run, then exit
//! cf-runner config.json history <case_id> -n 20    # print change history
//! kill -USR1 <pid>                                 # manual refresh
//! ```

mod pipeline;
mod scheduler;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use cf_core::config::AppConfig;
use cf_core::logging::LogFormat;
use cf_feed::source::DdpCaseSource;
use cf_store::cache::build_cache;
use cf_store::publish::CachePublisher;
use cf_store::sqlite::SqliteStore;
use cf_store::store::CaseStore;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::pipeline::{Pipeline, PipelineSettings};
use crate::scheduler::Scheduler;

/// Case feed refresher: collect, score, publish and persist.
#[derive(Parser)]
#[command(name = "cf-runner", about = "Case feed refresher")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Log output format (pretty or json).
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Run one refresh (with retries) and exit.
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the change history of one case, newest first.
    History {
        case_id: String,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = cf_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let module_name = config.app.module_name();
    let log_dir = cli.log_dir.as_deref().or(config.app.log_path.as_deref());
    cf_core::logging::init_logging(&cli.log_level, log_dir, &module_name, cli.log_format);

    info!("{module_name} starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    let store = SqliteStore::open(config.store.effective_path())?;

    if let Some(Command::History { case_id, limit }) = cli.command {
        return print_history(&store, &case_id, limit);
    }

    // 3. Wire the pipeline
    let mut pipeline = build_pipeline(&config, store)?;

    if cli.once {
        let report = pipeline.run_with_retry().await?;
        info!("single run finished: {}", serde_json::to_string(&report)?);
        return Ok(());
    }

    // 4. Schedule until Ctrl+C
    let scheduler = Scheduler::new(pipeline, config.schedule.effective_interval());

    #[cfg(unix)]
    spawn_manual_trigger(scheduler.trigger_handle())?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
        }
        info!("shutdown signal received, finishing in-flight run");
    };
    let summary = scheduler.run(shutdown).await;

    info!("{module_name} stopped after {} run(s), goodbye", summary.runs);
    Ok(())
}

fn build_pipeline(config: &AppConfig, store: SqliteStore) -> Result<Pipeline> {
    let source = DdpCaseSource::from_config(&config.feed);
    let cache = build_cache(&config.cache)?;
    let publisher = CachePublisher::new(cache, config.cache.effective_key(), config.cache.effective_ttl());
    let store: Arc<Mutex<dyn CaseStore>> = Arc::new(Mutex::new(store));

    info!(
        "pipeline ready: feed={}, cache key={}, store={}",
        config.feed.url,
        publisher.key(),
        config.store.effective_path()
    );
    Ok(Pipeline::new(Box::new(source), store, publisher, PipelineSettings::from_config(config)))
}

fn print_history(store: &SqliteStore, case_id: &str, limit: usize) -> Result<()> {
    let entries = store.history(case_id, limit)?;
    if entries.is_empty() {
        info!("no history for case {case_id}");
    }
    for entry in &entries {
        println!("{}", serde_json::to_string(entry)?);
    }
    Ok(())
}

#[cfg(unix)]
fn spawn_manual_trigger(trigger: scheduler::TriggerHandle) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            if trigger.fire() {
                info!("[scheduler] manual refresh requested (SIGUSR1)");
            } else {
                info!("[scheduler] manual refresh already queued");
            }
        }
    });
    Ok(())
}
