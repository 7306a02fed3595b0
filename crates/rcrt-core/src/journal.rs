/*!
 * Dedup journal.
 *
 * The only state the runners keep outside the breadcrumb store: an
 * append-only JSONL file of already-served keys, bounded by a retention
 * window. Tool runners key entries by requestId; agent runners key them by
 * schema + breadcrumb id + event timestamp. The journal is authoritative
 * only for the current process.
 */

use crate::error::RcrtError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    key: String,
    recorded_at: DateTime<Utc>,
}

struct Inner {
    file: File,
    entries: HashMap<String, DateTime<Utc>>,
}

pub struct DedupJournal {
    path: PathBuf,
    retention: Duration,
    inner: Mutex<Inner>,
}

impl DedupJournal {
    /// Open (or create) the journal, drop expired entries and compact the
    /// file so it never grows past one retention window of traffic.
    pub fn open(path: impl AsRef<Path>, retention_hours: i64) -> Result<Self, RcrtError> {
        let path = path.as_ref().to_path_buf();
        let retention = Duration::hours(retention_hours.max(1));
        let cutoff = Utc::now() - retention;

        let mut entries = HashMap::new();
        if path.exists() {
            let file = File::open(&path)
                .map_err(|e| RcrtError::Fatal(format!("journal unreadable at {:?}: {}", path, e)))?;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line
                    .map_err(|e| RcrtError::Fatal(format!("journal read failed: {}", e)))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Entry>(&line) {
                    Ok(entry) if entry.recorded_at >= cutoff => {
                        entries.insert(entry.key, entry.recorded_at);
                    }
                    Ok(_) => {} // expired
                    Err(e) => {
                        warn!("journal line {} corrupted, skipping: {}", lineno + 1, e);
                    }
                }
            }
        }

        // Rewrite with only the retained entries, then reopen for append.
        let mut tmp = path.clone();
        tmp.set_extension("jsonl.tmp");
        {
            let mut out = File::create(&tmp)
                .map_err(|e| RcrtError::Fatal(format!("journal compact failed: {}", e)))?;
            for (key, recorded_at) in &entries {
                let entry = Entry {
                    key: key.clone(),
                    recorded_at: *recorded_at,
                };
                writeln!(out, "{}", serde_json::to_string(&entry).expect("journal entry serializes"))
                    .map_err(|e| RcrtError::Fatal(format!("journal compact failed: {}", e)))?;
            }
        }
        std::fs::rename(&tmp, &path)
            .map_err(|e| RcrtError::Fatal(format!("journal compact failed: {}", e)))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| RcrtError::Fatal(format!("journal open failed: {}", e)))?;

        debug!("journal loaded from {:?}: {} live entries", path, entries.len());

        Ok(DedupJournal {
            path,
            retention,
            inner: Mutex::new(Inner { file, entries }),
        })
    }

    pub fn seen(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("journal lock");
        match inner.entries.get(key) {
            Some(recorded_at) => *recorded_at >= Utc::now() - self.retention,
            None => false,
        }
    }

    pub fn record(&self, key: &str) -> Result<(), RcrtError> {
        let now = Utc::now();
        let entry = Entry {
            key: key.to_string(),
            recorded_at: now,
        };
        let line = serde_json::to_string(&entry).expect("journal entry serializes");
        let mut inner = self.inner.lock().expect("journal lock");
        writeln!(inner.file, "{}", line)
            .map_err(|e| RcrtError::Fatal(format!("journal append failed: {}", e)))?;
        inner.entries.insert(entry.key, now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("journal lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Journal key for agent-side event idempotency.
pub fn event_key(schema_name: &str, breadcrumb_id: Uuid, timestamp: &str) -> String {
    format!("{}:{}:{}", schema_name, breadcrumb_id, timestamp)
}
