//! Buffered, idempotent graph ingest.
//!
//! Records stage into a batch window after a composite-key existence check;
//! the window commits as one atomic transaction when full, at the end of
//! every seed, and at shutdown. A failed commit discards the window from
//! memory and appends every dropped record to the dead-letter log, so the
//! drop is durable and replayable out-of-band, never silent. Failed batches
//! are not re-queued automatically: a poison batch must not wedge the run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use tripatlas_common::ItemRecord;

use crate::traits::RecordStore;

pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    capacity: usize,
    staged: Mutex<Vec<ItemRecord>>,
    dead_letter: Option<DeadLetterLog>,
    duplicates: AtomicU64,
    committed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        capacity: usize,
        dead_letter: Option<DeadLetterLog>,
    ) -> Self {
        Self {
            store,
            capacity,
            staged: Mutex::new(Vec::new()),
            dead_letter,
            duplicates: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Stage one record. An already-present composite key is dropped here:
    /// re-extraction of a known item is a no-op. `Ok(true)` = staged.
    pub async fn stage(&self, record: ItemRecord) -> Result<bool> {
        if self
            .store
            .item_exists(record.label, &record.city_uid)
            .await
            .context("existence lookup")?
        {
            info!(uid = %record.city_uid, "Skipping existing item");
            self.duplicates.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }

        let should_flush = {
            let mut staged = self.staged.lock().await;
            // A retried seed re-reads pages whose items may already sit in
            // the window; a duplicate key inside one transaction would fail
            // the whole batch against the uniqueness constraint.
            if staged.iter().any(|r| r.city_uid == record.city_uid) {
                self.duplicates.fetch_add(1, Ordering::SeqCst);
                return Ok(false);
            }
            staged.push(record);
            staged.len() >= self.capacity
        };
        if should_flush {
            self.flush().await;
        }
        Ok(true)
    }

    /// Commit the current window in one transaction. Returns how many records
    /// were committed; a failed transaction commits nothing and dead-letters
    /// the whole window.
    pub async fn flush(&self) -> usize {
        let batch: Vec<ItemRecord> = {
            let mut staged = self.staged.lock().await;
            std::mem::take(&mut *staged)
        };
        if batch.is_empty() {
            return 0;
        }

        match self.store.commit_items(&batch).await {
            Ok(()) => {
                self.committed.fetch_add(batch.len() as u64, Ordering::SeqCst);
                batch.len()
            }
            Err(e) => {
                error!(count = batch.len(), "Batch commit failed, dropping batch: {e:#}");
                self.dead_lettered
                    .fetch_add(batch.len() as u64, Ordering::SeqCst);
                if let Some(log) = &self.dead_letter {
                    if let Err(le) = log.append(&batch, &format!("{e:#}")) {
                        error!("Dead-letter append failed: {le:#}");
                    }
                }
                0
            }
        }
    }

    pub async fn staged_len(&self) -> usize {
        self.staged.lock().await.len()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::SeqCst)
    }
}

/// Append-only JSONL record of batches a failed transaction dropped.
pub struct DeadLetterLog {
    path: PathBuf,
}

#[derive(Serialize)]
struct DeadLetterEntry<'a> {
    dropped_at: String,
    error: &'a str,
    record: &'a ItemRecord,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, records: &[ItemRecord], error: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dead-letter dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening dead-letter log {}", self.path.display()))?;

        let dropped_at = Utc::now().to_rfc3339();
        for record in records {
            let entry = DeadLetterEntry {
                dropped_at: dropped_at.clone(),
                error,
                record,
            };
            serde_json::to_writer(&mut file, &entry).context("serializing dead-letter entry")?;
            file.write_all(b"\n").context("writing dead-letter entry")?;
        }
        Ok(())
    }
}
