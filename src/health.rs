use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Record type tag understood by the health store
pub const STEPS_RECORD_KIND: &str = "Steps";

/// Bookkeeping fields attached to every written record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub id: String,
    #[serde(rename = "clientRecordId")]
    pub client_id: String,
    #[serde(rename = "dataOrigin")]
    pub origin: String,
    #[serde(rename = "lastModifiedTime")]
    pub last_modified: DateTime<Utc>,
}

/// Aggregated steps record, shaped like a Health Connect `Steps` insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    #[serde(rename = "recordType")]
    pub record_kind: String,
    pub count: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metadata: RecordMetadata,
}

impl HealthRecord {
    /// Build a steps record for `[start_time, end_time]`
    pub fn steps(
        count: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        origin: &str,
    ) -> Self {
        let stamp = end_time.timestamp_millis();
        HealthRecord {
            record_kind: STEPS_RECORD_KIND.to_string(),
            count,
            start_time,
            end_time,
            metadata: RecordMetadata {
                id: format!("step_tracking_{}", stamp),
                client_id: format!("client_{}", stamp),
                origin: origin.to_string(),
                last_modified: end_time,
            },
        }
    }

    /// True if the record's interval intersects `[start, end]`
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time <= end && self.end_time >= start
    }
}

/// Step total over a queried window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsAggregate {
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub steps: i64,
}

impl StepsAggregate {
    /// Sum steps records overlapping `[start, end]`
    pub fn from_records(
        records: &[HealthRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let steps = records
            .iter()
            .filter(|r| r.record_kind == STEPS_RECORD_KIND && r.overlaps(start, end))
            .map(|r| r.count)
            .sum();

        StepsAggregate {
            start_time_ms: start.timestamp_millis(),
            end_time_ms: end.timestamp_millis(),
            steps,
        }
    }
}

/// Persistent health-record store (Health Connect, Google Fit, a file...).
///
/// `write_steps_record` returns `Ok(false)` when the store declined the
/// record without raising; both that and `Err` count as a failed write.
#[async_trait]
pub trait HealthStore: Send + Sync {
    fn is_ready(&self) -> bool {
        true
    }

    async fn write_steps_record(&self, record: &HealthRecord) -> anyhow::Result<bool>;

    async fn read_steps_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthRecord>>;
}

#[async_trait]
impl<T: HealthStore + ?Sized> HealthStore for Arc<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn write_steps_record(&self, record: &HealthRecord) -> anyhow::Result<bool> {
        (**self).write_steps_record(record).await
    }

    async fn read_steps_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthRecord>> {
        (**self).read_steps_records(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_758_868_282 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_wire_names() {
        let record = HealthRecord::steps(100, at(0), at(165), "com.coffeeApp.package");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["recordType"], "Steps");
        assert_eq!(json["count"], 100);
        assert!(json["startTime"].is_string());
        assert!(json["endTime"].is_string());
        assert_eq!(json["metadata"]["dataOrigin"], "com.coffeeApp.package");
        assert!(json["metadata"]["clientRecordId"]
            .as_str()
            .unwrap()
            .starts_with("client_"));
        assert_eq!(json["metadata"]["lastModifiedTime"], json["endTime"]);
    }

    #[test]
    fn test_record_ids_from_end_time() {
        let end = at(10);
        let record = HealthRecord::steps(3, at(0), end, "origin");
        assert_eq!(
            record.metadata.id,
            format!("step_tracking_{}", end.timestamp_millis())
        );
    }

    #[test]
    fn test_aggregate_filters_by_overlap() {
        let records = vec![
            HealthRecord::steps(10, at(0), at(60), "o"),
            HealthRecord::steps(20, at(120), at(180), "o"),
            HealthRecord::steps(40, at(-7200), at(-3600), "o"),
        ];

        let agg = StepsAggregate::from_records(&records, at(30), at(150));
        assert_eq!(agg.steps, 30);
        assert_eq!(agg.end_time_ms - agg.start_time_ms, Duration::seconds(120).num_milliseconds());
    }
}
