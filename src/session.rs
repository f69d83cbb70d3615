use crate::config::TrackerConfig;
use crate::detector::StepDetector;
use crate::error::{StepTrackerError, TrackerResult};
use crate::health::{HealthRecord, HealthStore, StepsAggregate};
use crate::sensor_receiver::{AccelSample, SensorSource, SubscriptionHandle};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No sensor subscription
    Idle,
    /// Subscribed and counting steps
    Tracking,
}

/// Step bookkeeping for the current (or last stopped) tracking session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSession {
    pub start_time: Option<DateTime<Utc>>,
    pub baseline_step_count: i64,
    pub current_step_count: i64,
    pub is_active: bool,
}

impl StepSession {
    /// Steps counted since the session started, not yet saved
    pub fn delta(&self) -> i64 {
        self.current_step_count - self.baseline_step_count
    }

    pub fn start_time_iso(&self) -> Option<String> {
        self.start_time.map(|t| t.to_rfc3339())
    }

    fn clear_counts(&mut self) {
        self.current_step_count = 0;
        self.baseline_step_count = 0;
        self.start_time = None;
    }
}

/// Emitted to observers once per detected step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub delta: i64,
    pub total: i64,
    pub timestamp_ms: i64,
}

pub type StepObserver = Box<dyn FnMut(&StepEvent) + Send>;

struct Subscription {
    handle: SubscriptionHandle,
    samples: Receiver<AccelSample>,
}

/// Owns one detector, one session, and at most one sensor subscription.
///
/// Samples arrive through the subscription channel and are processed with
/// [`pump`](Self::pump) or [`next_sample`](Self::next_sample), or pushed
/// directly with [`on_sample`](Self::on_sample).
pub struct SessionManager<S: SensorSource, H: HealthStore> {
    config: TrackerConfig,
    detector: StepDetector,
    session: StepSession,
    source: S,
    store: Option<H>,
    subscription: Option<Subscription>,
    observers: Vec<StepObserver>,
}

impl<S: SensorSource, H: HealthStore> SessionManager<S, H> {
    pub fn new(config: TrackerConfig, source: S) -> TrackerResult<Self> {
        config.validate()?;
        Ok(SessionManager {
            detector: StepDetector::new(config.detector.clone()),
            config,
            session: StepSession::default(),
            source,
            store: None,
            subscription: None,
            observers: Vec::new(),
        })
    }

    pub fn with_store(mut self, store: H) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_store(&mut self, store: H) {
        self.store = Some(store);
    }

    pub fn clear_store(&mut self) -> Option<H> {
        self.store.take()
    }

    pub fn store(&self) -> Option<&H> {
        self.store.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn detector(&self) -> &StepDetector {
        &self.detector
    }

    pub fn session(&self) -> &StepSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        if self.subscription.is_some() {
            SessionState::Tracking
        } else {
            SessionState::Idle
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.state() == SessionState::Tracking
    }

    pub fn total_steps(&self) -> i64 {
        self.session.current_step_count
    }

    /// True when a store handle is attached and reports ready
    pub fn store_ready(&self) -> bool {
        self.store.as_ref().map(|s| s.is_ready()).unwrap_or(false)
    }

    /// Register a callback invoked for every detected step
    pub fn subscribe_steps<F>(&mut self, observer: F)
    where
        F: FnMut(&StepEvent) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Transition Idle → Tracking. No-op while already tracking.
    pub fn start(&mut self) -> TrackerResult<()> {
        if self.is_tracking() {
            debug!("start() while tracking; keeping current session");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.source.set_sample_rate(self.config.detector.sample_rate_hz);
        let handle = self.source.subscribe(tx)?;

        if self.session.delta() != 0 {
            warn!(
                "Discarding {} unsaved steps from previous session",
                self.session.delta()
            );
        }

        self.detector.reset();
        let total = self.session.current_step_count;
        self.session = StepSession {
            start_time: Some(Utc::now()),
            baseline_step_count: total,
            current_step_count: total,
            is_active: true,
        };
        self.subscription = Some(Subscription {
            handle,
            samples: rx,
        });

        info!(
            "Step tracking started (baseline {}, {} Hz)",
            total, self.config.detector.sample_rate_hz
        );
        Ok(())
    }

    /// Process one sample; returns true if it was counted as a step.
    /// Ignored while idle.
    pub fn on_sample(&mut self, sample: &AccelSample) -> bool {
        if !self.is_tracking() {
            return false;
        }
        if !self.detector.ingest(sample) {
            return false;
        }

        self.session.current_step_count += 1;
        let event = StepEvent {
            delta: 1,
            total: self.session.current_step_count,
            timestamp_ms: sample.timestamp_ms,
        };
        for observer in self.observers.iter_mut() {
            observer(&event);
        }
        true
    }

    /// Drain samples already delivered by the subscription.
    /// Returns the number of steps detected.
    pub fn pump(&mut self) -> usize {
        let mut steps = 0;
        loop {
            let sample = match self.subscription.as_mut() {
                Some(sub) => match sub.samples.try_recv() {
                    Ok(sample) => sample,
                    Err(_) => break,
                },
                None => break,
            };
            if self.on_sample(&sample) {
                steps += 1;
            }
        }
        steps
    }

    /// Wait for the next delivered sample and process it.
    /// `None` when idle or when the source has finished.
    pub async fn next_sample(&mut self) -> Option<bool> {
        let sub = self.subscription.as_mut()?;
        let sample = sub.samples.recv().await?;
        Some(self.on_sample(&sample))
    }

    /// Transition Tracking → Idle. Session counts are kept for `flush`.
    pub fn stop(&mut self) {
        let Some(sub) = self.subscription.take() else {
            return;
        };
        self.source.unsubscribe(sub.handle);
        // Undelivered samples go with the receiver
        drop(sub.samples);
        self.session.is_active = false;

        info!(
            "Step tracking stopped ({} unsaved steps)",
            self.session.delta()
        );
    }

    /// Write the session delta to the health store as one record.
    ///
    /// The delta is captured before the write starts. On failure the session
    /// is left untouched so the same call can be retried.
    pub async fn flush(&mut self) -> TrackerResult<HealthRecord> {
        let store = match self.store.as_ref() {
            Some(store) if store.is_ready() => store,
            _ => return Err(StepTrackerError::NotReady),
        };
        let start_time = self
            .session
            .start_time
            .ok_or(StepTrackerError::NoSession)?;

        let count = self.session.delta();
        if count < 0 {
            return Err(StepTrackerError::InvalidState(format!(
                "negative step delta {}",
                count
            )));
        }

        let end_time = Utc::now();
        let record = HealthRecord::steps(count, start_time, end_time, &self.config.data_origin);

        match store.write_steps_record(&record).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Health store declined {} steps", count);
                return Err(StepTrackerError::StoreWriteFailed(
                    "store declined record".to_string(),
                ));
            }
            Err(e) => {
                warn!("Failed to save {} steps: {:#}", count, e);
                return Err(StepTrackerError::StoreWriteFailed(format!("{:#}", e)));
            }
        }

        self.session.clear_counts();
        // Still tracking: later steps belong to a window starting now
        if self.session.is_active {
            self.session.start_time = Some(end_time);
        }

        info!("Saved {} steps ({})", count, record.metadata.id);
        Ok(record)
    }

    /// Stop tracking if needed and discard any unsaved steps
    pub fn reset(&mut self) {
        self.stop();
        let discarded = self.session.delta();
        self.session.clear_counts();
        self.session.is_active = false;
        info!("Step counter reset ({} unsaved steps discarded)", discarded);
    }

    /// Total steps the store holds for `[start, end]`
    pub async fn steps_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TrackerResult<StepsAggregate> {
        let store = match self.store.as_ref() {
            Some(store) if store.is_ready() => store,
            _ => return Err(StepTrackerError::NotReady),
        };
        let records = store
            .read_steps_records(start, end)
            .await
            .map_err(|e| StepTrackerError::StorageError(format!("{:#}", e)))?;
        Ok(StepsAggregate::from_records(&records, start, end))
    }
}

impl<S: SensorSource, H: HealthStore> Drop for SessionManager<S, H> {
    fn drop(&mut self) {
        self.stop();
    }
}
