use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use clap::Parser;
use flate2::read::GzDecoder;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use step_tracker_rs::sensors::ReplaySource;
use step_tracker_rs::storage::{JsonFileHealthStore, MemoryHealthStore};
use step_tracker_rs::{AccelSample, HealthStore, SessionManager, TrackerConfig};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded log (.json or .json.gz)
    #[arg(long, conflicts_with = "dir")]
    log: Option<PathBuf>,

    /// Directory of recorded logs to batch replay
    #[arg(long)]
    dir: Option<PathBuf>,

    /// JSON config file (detector tunables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peak threshold above rolling average (m/s²)
    #[arg(long)]
    peak_threshold: Option<f64>,

    /// Minimum change from previous magnitude (m/s²)
    #[arg(long)]
    change_threshold: Option<f64>,

    /// Minimum interval between steps
    #[arg(long)]
    min_step_interval_ms: Option<i64>,

    /// Save each replayed session to this health store file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Pace samples by their recorded timestamps
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

/// Accel entry from a motion-tracker comparison log (timestamp in seconds)
#[derive(Deserialize)]
struct LoggedAccel {
    timestamp: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    accel: Option<LoggedAccel>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogFile {
    Samples(Vec<AccelSample>),
    Readings { readings: Vec<Reading> },
}

impl LogFile {
    fn into_samples(self) -> Vec<AccelSample> {
        match self {
            LogFile::Samples(samples) => samples,
            LogFile::Readings { readings } => readings
                .into_iter()
                .filter_map(|r| r.accel)
                .map(|a| AccelSample::new(a.x, a.y, a.z, (a.timestamp * 1000.0).round() as i64))
                .collect(),
        }
    }
}

fn load_log(path: &Path) -> Result<Vec<AccelSample>> {
    let file = File::open(path)?;
    let log: LogFile = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    Ok(log.into_samples())
}

fn is_log_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(v) = args.peak_threshold {
        config.detector.peak_threshold = v;
    }
    if let Some(v) = args.change_threshold {
        config.detector.change_threshold = v;
    }
    if let Some(v) = args.min_step_interval_ms {
        config.detector.min_step_interval_ms = v;
    }
    config.validate()?;
    Ok(config)
}

async fn replay_one<H: HealthStore>(
    path: &Path,
    config: &TrackerConfig,
    store: H,
    realtime: bool,
    save: bool,
) -> Result<serde_json::Value> {
    let samples = load_log(path)?;
    let (first_ms, last_ms) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first.timestamp_ms, last.timestamp_ms),
        _ => bail!("{}: no accelerometer samples", path.display()),
    };
    let sample_count = samples.len();

    let source = ReplaySource::new(samples).realtime(realtime);
    let mut manager = SessionManager::new(config.clone(), source)?.with_store(store);

    let steps_seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&steps_seen);
    manager.subscribe_steps(move |event| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(event.timestamp_ms);
        }
    });

    manager.start()?;
    while manager.next_sample().await.is_some() {}
    manager.stop();

    let step_times: Vec<i64> = steps_seen.lock().map(|s| s.clone()).unwrap_or_default();
    let intervals: Vec<f64> = step_times.windows(2).map(|w| (w[1] - w[0]) as f64).collect();

    let steps = manager.session().delta();
    let minutes = (last_ms - first_ms) as f64 / 60_000.0;
    let cadence = if minutes > 0.0 { steps as f64 / minutes } else { 0.0 };
    let mean_interval = if intervals.is_empty() {
        0.0
    } else {
        intervals.iter().sum::<f64>() / intervals.len() as f64
    };

    if save {
        let record = manager.flush().await?;
        info!("Saved {} steps from {}", record.count, path.display());
    }

    Ok(json!({
        "log": path.display().to_string(),
        "samples": sample_count,
        "duration_s": (last_ms - first_ms) as f64 / 1000.0,
        "steps": steps,
        "cadence_spm": cadence,
        "mean_step_interval_ms": mean_interval,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let logs: Vec<PathBuf> = match (&args.log, &args.dir) {
        (Some(log), None) => vec![log.clone()],
        (None, Some(dir)) => {
            let mut logs: Vec<PathBuf> = fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_log_file(p))
                .collect();
            logs.sort();
            logs
        }
        _ => bail!("pass either --log or --dir"),
    };

    let mut results = Vec::new();
    for path in &logs {
        let outcome = match &args.store {
            Some(store) => {
                replay_one(path, &config, JsonFileHealthStore::new(store), args.realtime, true).await
            }
            None => {
                replay_one(path, &config, MemoryHealthStore::new(), args.realtime, false).await
            }
        };
        match outcome {
            Ok(summary) => results.push(summary),
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }

    let total_steps: i64 = results
        .iter()
        .filter_map(|r| r["steps"].as_i64())
        .sum();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "results": results,
            "total_steps": total_steps,
        }))?
    );
    Ok(())
}
