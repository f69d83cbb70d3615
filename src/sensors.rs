use crate::error::{StepTrackerError, TrackerResult};
use crate::sensor_receiver::{AccelSample, SampleSink, SensorSource, SubscriptionHandle};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

const GRAVITY: f64 = 9.81;

/// Feed tasks keyed by subscription id
#[derive(Default)]
struct FeedTasks {
    next_id: u64,
    tasks: HashMap<u64, JoinHandle<()>>,
}

impl FeedTasks {
    fn spawn<F>(&mut self, feed: F) -> TrackerResult<SubscriptionHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StepTrackerError::SensorFailed(format!("no async runtime: {}", e)))?;

        self.next_id += 1;
        let id = self.next_id;
        self.tasks.insert(id, runtime.spawn(feed));
        Ok(SubscriptionHandle::new(id))
    }

    fn abort(&mut self, handle: SubscriptionHandle) -> bool {
        match self.tasks.remove(&handle.id()) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for FeedTasks {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Push a sample without blocking the sensor loop; full channel drops it.
/// Returns false once the receiver is gone.
fn offer(tx: &SampleSink, sample: AccelSample, name: &str, sent: &mut u64) -> bool {
    match tx.try_send(sample) {
        Ok(_) => {
            *sent += 1;
            if *sent % 100 == 0 {
                debug!("[{}] {} samples", name, sent);
            }
            true
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[{}] Channel closed after {} samples", name, sent);
            false
        }
        Err(TrySendError::Full(_)) => true,
    }
}

fn interval_from_hz(hz: f64) -> Duration {
    Duration::from_millis((1000.0 / hz).round().max(1.0) as u64)
}

/// Synthetic walking signal: gravity plus a slow sway, with a heel-strike
/// spike once per step period.
pub struct SimulatedGaitSource {
    sample_interval: Duration,
    step_period: Duration,
    strike_magnitude: f64,
    feeds: FeedTasks,
}

impl SimulatedGaitSource {
    pub fn new() -> Self {
        Self {
            sample_interval: interval_from_hz(20.0),
            step_period: Duration::from_millis(550),
            strike_magnitude: 9.0,
            feeds: FeedTasks::default(),
        }
    }

    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = period;
        self
    }

    pub fn with_strike_magnitude(mut self, magnitude: f64) -> Self {
        self.strike_magnitude = magnitude;
        self
    }

    /// Sample `tick` of the synthetic signal
    pub fn sample_at(&self, tick: u64, timestamp_ms: i64) -> AccelSample {
        gait_sample(
            tick,
            timestamp_ms,
            self.sample_interval,
            self.step_period,
            self.strike_magnitude,
        )
    }
}

impl Default for SimulatedGaitSource {
    fn default() -> Self {
        Self::new()
    }
}

fn samples_per_step(sample_interval: Duration, step_period: Duration) -> u64 {
    let per = step_period.as_millis() / sample_interval.as_millis().max(1);
    (per as u64).max(1)
}

fn gait_sample(
    tick: u64,
    timestamp_ms: i64,
    sample_interval: Duration,
    step_period: Duration,
    strike_magnitude: f64,
) -> AccelSample {
    use std::f64::consts::PI;
    let t = tick as f64 * sample_interval.as_secs_f64();
    let strike = if tick > 0 && tick % samples_per_step(sample_interval, step_period) == 0 {
        strike_magnitude
    } else {
        0.0
    };

    AccelSample {
        x: (t * 2.0 * PI).sin() * 0.3,
        y: (t * 2.0 * PI).cos() * 0.2,
        z: GRAVITY + (t * PI).sin() * 0.1 + strike,
        timestamp_ms,
    }
}

impl SensorSource for SimulatedGaitSource {
    fn subscribe(&mut self, sink: SampleSink) -> TrackerResult<SubscriptionHandle> {
        let sample_interval = self.sample_interval;
        let step_period = self.step_period;
        let strike = self.strike_magnitude;

        let handle = self.feeds.spawn(async move {
            let mut ticker = interval(sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick = 0u64;
            let mut sent = 0u64;
            loop {
                ticker.tick().await;
                let sample = gait_sample(
                    tick,
                    Utc::now().timestamp_millis(),
                    sample_interval,
                    step_period,
                    strike,
                );
                tick += 1;
                if !offer(&sink, sample, "gait", &mut sent) {
                    break;
                }
            }
        })?;

        info!(
            "Simulated gait started (every {:?}, step period {:?})",
            sample_interval, step_period
        );
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        if !self.feeds.abort(handle) {
            warn!("Unknown gait subscription {}", handle.id());
        }
    }

    fn set_sample_rate(&mut self, hz: f64) {
        self.sample_interval = interval_from_hz(hz);
    }
}

/// Polls `termux-sensor` for accelerometer readings (Android + Termux:API)
pub struct TermuxAccelSource {
    sample_interval: Duration,
    feeds: FeedTasks,
}

impl TermuxAccelSource {
    pub fn new() -> Self {
        Self {
            sample_interval: interval_from_hz(20.0),
            feeds: FeedTasks::default(),
        }
    }
}

impl Default for TermuxAccelSource {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_termux_accelerometer() -> Option<AccelSample> {
    let output = Command::new("termux-sensor")
        .args(["-n", "1", "-s", "accelerometer"])
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    parse_accel_output(&text, Utc::now().timestamp_millis())
}

/// Parse `Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0, ...`
pub fn parse_accel_output(output: &str, timestamp_ms: i64) -> Option<AccelSample> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for part in output.split(|c| c == ',' || c == ':') {
        let part = part.trim();
        if let Some(val_str) = part.strip_prefix("x=") {
            x = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("y=") {
            y = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("z=") {
            z = Some(val_str.trim().parse().ok()?);
        }
    }

    Some(AccelSample::new(x?, y?, z?, timestamp_ms))
}

impl SensorSource for TermuxAccelSource {
    fn subscribe(&mut self, sink: SampleSink) -> TrackerResult<SubscriptionHandle> {
        let sample_interval = self.sample_interval;
        let handle = self.feeds.spawn(async move {
            let mut ticker = interval(sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sent = 0u64;
            let mut misses = 0u64;
            loop {
                ticker.tick().await;
                let Some(sample) = read_termux_accelerometer().await else {
                    misses += 1;
                    if misses % 100 == 1 {
                        warn!("[termux] No accelerometer reading ({} misses)", misses);
                    }
                    continue;
                };
                if !offer(&sink, sample, "termux", &mut sent) {
                    break;
                }
            }
        })?;

        info!("termux-sensor polling every {:?}", sample_interval);
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        if !self.feeds.abort(handle) {
            warn!("Unknown termux subscription {}", handle.id());
        }
    }

    fn set_sample_rate(&mut self, hz: f64) {
        self.sample_interval = interval_from_hz(hz);
    }
}

/// Replays a recorded sample sequence.
///
/// Unlike the live sources, replay waits for channel space instead of
/// dropping samples, so every recorded sample is delivered in order.
pub struct ReplaySource {
    samples: Vec<AccelSample>,
    realtime: bool,
    feeds: FeedTasks,
}

impl ReplaySource {
    pub fn new(samples: Vec<AccelSample>) -> Self {
        Self {
            samples,
            realtime: false,
            feeds: FeedTasks::default(),
        }
    }

    /// Sleep between samples according to their recorded timestamps
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SensorSource for ReplaySource {
    fn subscribe(&mut self, sink: SampleSink) -> TrackerResult<SubscriptionHandle> {
        let samples = self.samples.clone();
        let realtime = self.realtime;

        self.feeds.spawn(async move {
            let mut previous: Option<i64> = None;
            for sample in samples {
                if realtime {
                    if let Some(prev) = previous {
                        let gap = (sample.timestamp_ms - prev).max(0) as u64;
                        sleep(Duration::from_millis(gap)).await;
                    }
                    previous = Some(sample.timestamp_ms);
                }
                if sink.send(sample).await.is_err() {
                    break;
                }
            }
        })
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.feeds.abort(handle);
    }

    fn set_sample_rate(&mut self, hz: f64) {
        debug!("Replay ignores sample rate {} Hz (recorded timing is used)", hz);
    }
}
