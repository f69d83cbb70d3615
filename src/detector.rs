//! Peak-based step detection over accelerometer magnitudes.
//!
//! A step fires only when all four gates agree:
//! - amplitude: magnitude exceeds the rolling average by `peak_threshold`
//! - shape: magnitude is not exceeded by the trailing `peak_window` samples
//! - change: magnitude moved more than `change_threshold` since the last sample
//! - debounce: more than `min_step_interval_ms` since the last accepted step
//!
//! There is no calibration phase; the rolling buffer is the only history.

use crate::config::DetectorConfig;
use crate::sensor_receiver::AccelSample;
use log::{debug, warn};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of recent magnitudes
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    window: VecDeque<f64>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        SampleBuffer {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, magnitude: f64) {
        self.window.push_back(magnitude);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Last `n` magnitudes, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &f64> {
        self.window.iter().skip(self.window.len().saturating_sub(n))
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

/// Mutable detector state, reset on every tracking start
#[derive(Debug, Clone)]
pub struct DetectorState {
    pub buffer: SampleBuffer,
    pub last_magnitude: f64,
    /// `None` until the first step of the session
    pub last_step_time_ms: Option<i64>,
    last_sample_time_ms: Option<i64>,
}

impl DetectorState {
    fn new(capacity: usize) -> Self {
        DetectorState {
            buffer: SampleBuffer::new(capacity),
            last_magnitude: 0.0,
            last_step_time_ms: None,
            last_sample_time_ms: None,
        }
    }
}

pub struct StepDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl StepDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let state = DetectorState::new(config.buffer_capacity);
        StepDetector { config, state }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Clear history: empty buffer, zero last magnitude, no previous step
    pub fn reset(&mut self) {
        self.state = DetectorState::new(self.config.buffer_capacity);
    }

    /// Feed one sample; returns true when it completes a step.
    pub fn ingest(&mut self, sample: &AccelSample) -> bool {
        let now = sample.timestamp_ms;
        if let Some(prev) = self.state.last_sample_time_ms {
            if now < prev {
                warn!(
                    "Dropping out-of-order accel sample ({} ms < {} ms)",
                    now, prev
                );
                return false;
            }
        }
        self.state.last_sample_time_ms = Some(now);

        let magnitude = sample.magnitude();
        let is_step = self.evaluate(magnitude, now);
        self.state.last_magnitude = magnitude;

        if is_step {
            self.state.last_step_time_ms = Some(now);
            debug!("Step at {} ms (magnitude {:.2})", now, magnitude);
        }
        is_step
    }

    fn evaluate(&mut self, magnitude: f64, now: i64) -> bool {
        let buffer = &mut self.state.buffer;
        buffer.push(magnitude);

        if buffer.len() < self.config.min_window {
            return false;
        }

        let average = buffer.mean();
        // Window includes the sample just pushed; ties count as a peak
        let is_local_peak = buffer
            .tail(self.config.peak_window)
            .all(|&value| value <= magnitude);
        let significant_change =
            (magnitude - self.state.last_magnitude).abs() > self.config.change_threshold;
        let debounced = match self.state.last_step_time_ms {
            Some(last) => now - last > self.config.min_step_interval_ms,
            None => true,
        };

        magnitude > average + self.config.peak_threshold
            && is_local_peak
            && significant_change
            && debounced
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn feed(detector: &mut StepDetector, magnitudes: &[f64], step_ms: i64) -> Vec<bool> {
        magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| detector.ingest(&AccelSample::from_magnitude(m, i as i64 * step_ms)))
            .collect()
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buffer = SampleBuffer::new(3);
        for m in [1.0, 2.0, 3.0, 4.0] {
            buffer.push(m);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.tail(3).copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_relative_eq!(buffer.mean(), 3.0);
    }

    #[test]
    fn test_buffer_tail_shorter_than_requested() {
        let mut buffer = SampleBuffer::new(5);
        buffer.push(7.0);
        assert_eq!(buffer.tail(3).count(), 1);
    }

    #[test]
    fn test_warmup_never_fires() {
        let mut detector = StepDetector::default();
        let results = feed(&mut detector, &[0.0, 50.0, 0.0, 80.0], 500);
        assert!(results.iter().all(|&r| !r));
    }

    #[test]
    fn test_constant_signal_never_fires() {
        let mut detector = StepDetector::default();
        let flat = vec![9.81; 200];
        assert!(feed(&mut detector, &flat, 50).iter().all(|&r| !r));

        let mut detector = StepDetector::default();
        let zeros = vec![0.0; 200];
        assert!(feed(&mut detector, &zeros, 50).iter().all(|&r| !r));
    }

    #[test]
    fn test_two_spikes_far_apart() {
        let mut detector = StepDetector::default();
        let magnitudes = [
            1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 9.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 9.0,
        ];
        let results = feed(&mut detector, &magnitudes, 50);

        let fired: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, &r)| r)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![7, 14]);
    }

    #[test]
    fn test_spikes_inside_debounce_count_once() {
        let mut detector = StepDetector::default();
        // Second spike 100 ms after the first
        let magnitudes = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 12.0, 1.0, 12.0, 1.0];
        let results = feed(&mut detector, &magnitudes, 50);
        assert_eq!(results.iter().filter(|&&r| r).count(), 1);
        assert!(results[7]);
        assert!(!results[9]);
    }

    #[test]
    fn test_rising_edge_is_not_peak_until_top() {
        let mut detector = StepDetector::default();
        let magnitudes = [1.0, 1.0, 1.0, 1.0, 1.0, 8.0, 7.5, 1.0];
        let results = feed(&mut detector, &magnitudes, 50);
        // 7.5 is below the preceding 8.0, so only the top counts
        assert!(results[5]);
        assert!(!results[6]);
    }

    #[test]
    fn test_small_change_rejected() {
        let mut detector = StepDetector::new(DetectorConfig {
            peak_threshold: 0.5,
            change_threshold: 1.0,
            ..DetectorConfig::default()
        });
        // Plateau at 3.0: above average but each move from last is tiny
        let magnitudes = [1.0, 1.0, 1.0, 1.0, 1.0, 2.5, 3.0, 3.4];
        let results = feed(&mut detector, &magnitudes, 300);
        assert!(results[5]);
        assert!(!results[6]);
        assert!(!results[7]);
    }

    #[test]
    fn test_last_magnitude_updated_every_sample() {
        let mut detector = StepDetector::default();
        detector.ingest(&AccelSample::from_magnitude(4.0, 0));
        assert_relative_eq!(detector.state().last_magnitude, 4.0);
        detector.ingest(&AccelSample::new(3.0, 4.0, 0.0, 10));
        assert_relative_eq!(detector.state().last_magnitude, 5.0);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut detector = StepDetector::default();
        feed(&mut detector, &[1.0; 6], 50);
        let before = detector.state().buffer.len();

        assert!(!detector.ingest(&AccelSample::from_magnitude(20.0, 10)));
        assert_eq!(detector.state().buffer.len(), before);
        assert_eq!(detector.state().last_step_time_ms, None);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut detector = StepDetector::default();
        let magnitudes = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 9.0];
        feed(&mut detector, &magnitudes, 50);
        assert_eq!(detector.state().last_step_time_ms, Some(350));

        detector.reset();
        assert!(detector.state().buffer.is_empty());
        assert_eq!(detector.state().last_magnitude, 0.0);
        assert_eq!(detector.state().last_step_time_ms, None);
    }
}
