//! Downstream sinks for exported records.

use crate::error::AppError;
use crate::models::{Record, RecordKind};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Hands a record downstream.
///
/// Called concurrently from one forwarder task per record kind.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, record: Record) -> Result<(), AppError>;

    /// Make every record written so far durable. Called once per successful
    /// run, before the watermark is committed.
    async fn flush(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Writes one JSON object per line to an async writer.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Flush and return the underlying writer.
    pub async fn into_inner(self) -> Result<W, AppError> {
        let mut writer = self.writer.into_inner();
        writer
            .flush()
            .await
            .map_err(|e| AppError::sink(format!("Failed to flush output: {}", e)))?;
        Ok(writer)
    }
}

#[async_trait]
impl<W> Sink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&self, record: Record) -> Result<(), AppError> {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| AppError::sink(format!("Failed to encode {}: {}", record.id(), e)))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| AppError::sink(format!("Failed to write {}: {}", record.id(), e)))
    }

    async fn flush(&self) -> Result<(), AppError> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| AppError::sink(format!("Failed to flush output: {}", e)))
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    pub async fn of_kind(&self, kind: RecordKind) -> Vec<Record> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, record: Record) -> Result<(), AppError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
