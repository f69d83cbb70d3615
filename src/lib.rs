// Step Tracker
// Peak-based step detection over accelerometer magnitudes, with tracking
// sessions flushed to a health store as aggregated steps records

pub mod config;
pub mod detector;
pub mod error;
pub mod health;
pub mod sensor_receiver;
pub mod sensors;
pub mod session;
pub mod storage;

pub use config::{DetectorConfig, TrackerConfig};
pub use detector::{DetectorState, SampleBuffer, StepDetector};
pub use error::{StepTrackerError, TrackerResult};
pub use health::{HealthRecord, HealthStore, RecordMetadata, StepsAggregate};
pub use sensor_receiver::{AccelSample, SensorSource, SubscriptionHandle};
pub use session::{SessionManager, SessionState, StepEvent, StepSession};
