// src/sink.rs
//
// Persistence sink: one insert per decoded record.
//
// The pipeline only depends on the TelemetrySink trait; the PostgreSQL
// implementation stores every record in a single generic table keyed by
// kind. Insert failures are reported to the caller and never retried.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;

use crate::error::TelemError;
use crate::records::Record;
use crate::settings::DatabaseSettings;
use crate::tlog;

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Persist one record. Success or failure, nothing in between.
    async fn insert(&self, record: &Record) -> Result<(), TelemError>;
}

// ============================================================================
// PostgreSQL Sink
// ============================================================================

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS telemetry (
    id BIGSERIAL PRIMARY KEY,
    kind TEXT NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL,
    payload JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_telemetry_kind_time ON telemetry (kind, recorded_at);
";

pub struct PostgresSink {
    client: tokio_postgres::Client,
}

impl PostgresSink {
    /// Connect and spawn the background connection task.
    pub async fn connect(
        settings: &DatabaseSettings,
    ) -> Result<(Self, JoinHandle<()>), TelemError> {
        let (client, connection) =
            tokio_postgres::connect(&settings.to_connection_string(), NoTls)
                .await
                .map_err(|e| TelemError::connection(&settings.host, e.to_string()))?;

        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tlog!("[sink] postgres connection error: {}", e);
            }
        });

        let sink = Self { client };
        sink.ensure_schema().await?;
        Ok((sink, task))
    }

    async fn ensure_schema(&self) -> Result<(), TelemError> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| TelemError::sink(format!("create schema: {}", e)))
    }
}

#[async_trait]
impl TelemetrySink for PostgresSink {
    async fn insert(&self, record: &Record) -> Result<(), TelemError> {
        let payload = record.payload();
        self.client
            .execute(
                "INSERT INTO telemetry (kind, recorded_at, payload) VALUES ($1, $2, $3)",
                &[&record.kind(), &record.timestamp(), &payload],
            )
            .await
            .map(|_| ())
            .map_err(|e| TelemError::sink(format!("insert {}: {}", record.kind(), e)))
    }
}

// ============================================================================
// In-Memory Sink (test double)
// ============================================================================

/// Sink that records inserts in memory, with a switchable failure mode.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kinds of every record inserted so far, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().unwrap().iter().map(|r| r.kind()).collect()
    }

    pub fn last(&self) -> Option<Record> {
        self.records.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn insert(&self, record: &Record) -> Result<(), TelemError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TelemError::sink("memory sink set to fail"));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PackCurrent;
    use chrono::Local;

    fn record() -> Record {
        Record::PackCurrent(PackCurrent {
            timestamp: Local::now(),
            current: -12.5,
        })
    }

    #[tokio::test]
    async fn test_memory_sink_records_inserts() {
        let sink = MemorySink::new();
        sink.insert(&record()).await.unwrap();
        sink.insert(&record()).await.unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.kinds(), vec!["pack_current", "pack_current"]);
    }

    #[tokio::test]
    async fn test_memory_sink_failure_mode() {
        let sink = MemorySink::new();
        sink.set_fail(true);
        assert!(sink.insert(&record()).await.is_err());
        assert!(sink.is_empty());

        sink.set_fail(false);
        assert!(sink.insert(&record()).await.is_ok());
        assert_eq!(sink.len(), 1);
    }
}
