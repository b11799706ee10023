//! Append-only record of executed actions.
//!
//! The on-disk format is JSON lines, one `AuditRecord` per line, in append
//! order. Each `record` call is flushed and synced before it returns.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action_id: String,
}

pub trait AuditSink: Send {
    /// Durably append one entry, or fail with `Error::Sink`.
    fn record(&mut self, action_id: &str, timestamp: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JsonlAuditLog
// ---------------------------------------------------------------------------

pub struct JsonlAuditLog {
    path: PathBuf,
    file: File,
}

impl JsonlAuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        let sink_err = |e: std::io::Error| Error::Sink(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sink_err)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(sink_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&mut self, action_id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let entry = AuditRecord {
            timestamp,
            action_id: action_id.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let sink_err = |e: std::io::Error| Error::Sink(format!("{}: {e}", self.path.display()));
        self.file.write_all(line.as_bytes()).map_err(sink_err)?;
        self.file.flush().map_err(sink_err)?;
        self.file.sync_data().map_err(sink_err)?;
        Ok(())
    }
}

/// Read every record from `path` in append order. A missing file has no
/// records.
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(&line)
            .map_err(|e| Error::Sink(format!("{} line {}: {e}", path.display(), n + 1)))?;
        out.push(record);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// MemoryAuditSink
// ---------------------------------------------------------------------------

/// Keeps records in a Vec. Useful for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    pub records: Vec<AuditRecord>,
}

impl AuditSink for MemoryAuditSink {
    fn record(&mut self, action_id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        self.records.push(AuditRecord {
            timestamp,
            action_id: action_id.to_string(),
        });
        Ok(())
    }
}
