use crate::health::{HealthRecord, HealthStore};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Health store backed by a JSON-lines file (one record per line)
pub struct JsonFileHealthStore {
    path: PathBuf,
}

impl JsonFileHealthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, in write order
    pub async fn load_all(&self) -> anyhow::Result<Vec<HealthRecord>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: malformed record", self.path.display(), n + 1))
            })
            .collect()
    }
}

#[async_trait]
impl HealthStore for JsonFileHealthStore {
    async fn write_steps_record(&self, record: &HealthRecord) -> anyhow::Result<bool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(
            "Wrote {} steps ({}) to {}",
            record.count,
            record.metadata.id,
            self.path.display()
        );
        Ok(true)
    }

    async fn read_steps_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthRecord>> {
        let records: Vec<HealthRecord> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.overlaps(start, end))
            .collect();
        debug!("Read {} records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

/// In-process store; can be toggled unavailable or rejecting
#[derive(Default)]
pub struct MemoryHealthStore {
    records: Mutex<Vec<HealthRecord>>,
    rejecting: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail as if permission was revoked
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<HealthRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    fn is_ready(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn write_steps_record(&self, record: &HealthRecord) -> anyhow::Result<bool> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(anyhow!("permission revoked"));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("Failed to acquire records lock"))?;
        records.push(record.clone());
        Ok(true)
    }

    async fn read_steps_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("Failed to acquire records lock"))?;
        Ok(records
            .iter()
            .filter(|r| r.overlaps(start, end))
            .cloned()
            .collect())
    }
}
