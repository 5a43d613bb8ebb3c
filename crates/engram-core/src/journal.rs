//! Transaction journal
//!
//! Each collection keeps a `journal.log` of unified-transaction records.
//! A record is appended and fsynced *before* either store is touched; the
//! durable append is the commit point. Recovery on open replays records
//! (redoing whichever side is missing), and a compensating `Abort` record
//! marks transactions that were rolled back after their commit record was
//! already durable. The journal is truncated once the vector index has been
//! durably flushed, so a clean close leaves no journal behind.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};
use crate::graph::Properties;
use crate::vector::ItemMetadata;

/// One journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum JournalRecord {
    /// A document add: carries everything needed to redo both sides
    #[serde(rename_all = "camelCase")]
    AddDocument {
        /// Transaction id
        txn: String,
        /// Namespaced document id
        ns_id: String,
        /// The embedding
        vector: Vec<f32>,
        /// Vector-item metadata
        metadata: ItemMetadata,
        /// Graph node properties
        node_properties: Properties,
    },
    /// A document delete: redo removes both sides
    #[serde(rename_all = "camelCase")]
    DeleteDocument {
        /// Transaction id
        txn: String,
        /// Namespaced document id
        ns_id: String,
    },
    /// Compensation: the named transaction was rolled back
    #[serde(rename_all = "camelCase")]
    Abort {
        /// Transaction id being compensated
        txn: String,
    },
}

impl JournalRecord {
    /// The transaction id of this record
    pub fn txn(&self) -> &str {
        match self {
            JournalRecord::AddDocument { txn, .. }
            | JournalRecord::DeleteDocument { txn, .. }
            | JournalRecord::Abort { txn } => txn,
        }
    }
}

/// Append-only journal for one collection
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Handle to the journal at `path` (the file is created on first append)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and make it durable
    ///
    /// Returns only after the line has been flushed and fsynced; from then
    /// on the transaction is committed and recovery will redo it.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read back every committed record, oldest first
    ///
    /// Transactions compensated by an `Abort` are dropped. A torn trailing
    /// line (crash mid-append) is discarded: its transaction never reached
    /// the commit point.
    pub fn replay(&self) -> Result<Vec<JournalRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records: Vec<JournalRecord> = Vec::new();
        let mut aborted: Vec<String> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(JournalRecord::Abort { txn }) => aborted.push(txn),
                Ok(record) => records.push(record),
                Err(e) => {
                    // Only a torn tail is tolerable; anything else in the
                    // middle of the file would mean silent data loss.
                    tracing::warn!(error = %e, "dropping unparseable journal tail");
                    break;
                }
            }
        }

        records.retain(|record| !aborted.iter().any(|txn| txn == record.txn()));
        Ok(records)
    }

    /// True when the journal file exists and is non-empty
    pub fn is_dirty(&self) -> bool {
        self.path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Drop all records after a durable flush of the stores
    pub fn truncate(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(EngramError::from)?;
        }
        Ok(())
    }
}
