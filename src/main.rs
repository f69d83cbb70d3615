use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};

use step_tracker_rs::sensors::{SimulatedGaitSource, TermuxAccelSource};
use step_tracker_rs::storage::JsonFileHealthStore;
use step_tracker_rs::{SensorSource, SessionManager, TrackerConfig};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Synthetic walking signal
    Sim,
    /// termux-sensor accelerometer (Android + Termux:API)
    Termux,
}

#[derive(Parser, Debug)]
#[command(name = "step_tracker")]
#[command(about = "Count steps from the accelerometer and save them as a steps record", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Accelerometer source
    #[arg(long, value_enum, default_value = "sim")]
    source: Source,

    /// JSON config file (detector tunables, data origin)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Health store file (JSON lines)
    #[arg(long, default_value = "step_tracker_sessions/steps.jsonl")]
    store: PathBuf,

    /// Override peak threshold above rolling average (m/s²)
    #[arg(long)]
    peak_threshold: Option<f64>,

    /// Override minimum interval between steps
    #[arg(long)]
    min_step_interval_ms: Option<i64>,

    /// Override accelerometer rate
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Track without writing a record at the end
    #[arg(long)]
    no_save: bool,
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(v) = args.peak_threshold {
        config.detector.peak_threshold = v;
    }
    if let Some(v) = args.min_step_interval_ms {
        config.detector.min_step_interval_ms = v;
    }
    if let Some(v) = args.sample_rate {
        config.detector.sample_rate_hz = v;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Step Tracker starting");
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Source: {:?}", args.source);
    info!("  Store: {}", args.store.display());

    let source: Box<dyn SensorSource> = match args.source {
        Source::Sim => Box::new(SimulatedGaitSource::new()),
        Source::Termux => Box::new(TermuxAccelSource::new()),
    };
    let store = JsonFileHealthStore::new(&args.store);
    let mut manager = SessionManager::new(config, source)?.with_store(store);

    manager.subscribe_steps(|event| {
        if event.total % 10 == 0 {
            info!("{} steps", event.total);
        }
    });

    manager.start()?;

    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            processed = manager.next_sample() => {
                if processed.is_none() {
                    info!("Sensor source closed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping...");
                break;
            }
            _ = &mut deadline, if args.duration > 0 => {
                info!("Duration reached, stopping...");
                break;
            }
        }
    }

    manager.stop();
    let session = manager.session().clone();
    println!(
        "Session from {}: {} steps",
        session.start_time_iso().unwrap_or_default(),
        session.delta()
    );

    if args.no_save {
        return Ok(());
    }

    let record = manager.flush().await.context("saving steps")?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    let now = Utc::now();
    let today = manager
        .steps_in_range(now - ChronoDuration::hours(24), now)
        .await?;
    println!("Steps in the last 24h: {}", today.steps);

    Ok(())
}
