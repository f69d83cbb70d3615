use crate::error::TrackerResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

/// Accelerometer sample as delivered by the platform sensor API
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Milliseconds since the Unix epoch (or any monotonic origin per stream)
    pub timestamp_ms: i64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self { x, y, z, timestamp_ms }
    }

    /// Sample with the whole magnitude on the z axis
    pub fn from_magnitude(magnitude: f64, timestamp_ms: i64) -> Self {
        Self::new(0.0, 0.0, magnitude, timestamp_ms)
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Where a subscribed source pushes its samples
pub type SampleSink = Sender<AccelSample>;

/// Opaque token returned by [`SensorSource::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Accelerometer capability required by the session manager.
///
/// `unsubscribe` must guarantee that no further samples reach the sink
/// once it returns; the manager additionally drops its receiver.
pub trait SensorSource {
    fn subscribe(&mut self, sink: SampleSink) -> TrackerResult<SubscriptionHandle>;
    fn unsubscribe(&mut self, handle: SubscriptionHandle);
    fn set_sample_rate(&mut self, hz: f64);
}

impl<T: SensorSource + ?Sized> SensorSource for Box<T> {
    fn subscribe(&mut self, sink: SampleSink) -> TrackerResult<SubscriptionHandle> {
        (**self).subscribe(sink)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        (**self).unsubscribe(handle)
    }

    fn set_sample_rate(&mut self, hz: f64) {
        (**self).set_sample_rate(hz)
    }
}
