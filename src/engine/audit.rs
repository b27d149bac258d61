//! Termination audit trail.
//!
//! One JSON line per killed agent, appended to a file, plus the most
//! recent records in memory for the operator surface. The file is the
//! full history. Write failures are logged and never block a kill.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

use super::health::HealthMetrics;
use crate::execution::service::Withdrawal;

#[derive(Debug, Clone, Serialize)]
pub struct TerminationRecord {
    pub agent_id: String,
    pub token: String,
    pub reason: String,
    pub deployed_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    /// `terminated_at - deployed_at`
    pub lifetime_ms: i64,
    pub final_metrics: HealthMetrics,
    /// `None` when the withdrawal failed and funds may be stranded.
    pub withdrawal: Option<Withdrawal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawal_error: Option<String>,
}

/// Records kept in memory unless configured otherwise.
pub const DEFAULT_RETAINED: usize = 500;

pub struct AuditLog {
    path: Option<PathBuf>,
    records: VecDeque<TerminationRecord>,
    retain: usize,
    written: u64,
}

impl AuditLog {
    /// `path == None` keeps records in memory only.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            records: VecDeque::new(),
            retain: DEFAULT_RETAINED,
            written: 0,
        }
    }

    /// Cap the in-memory copy at the last `n` records.
    pub fn with_retention(mut self, n: usize) -> Self {
        self.retain = n.max(1);
        self
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    fn append(&self, record: &TerminationRecord) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    pub fn write(&mut self, record: TerminationRecord) {
        if let Err(e) = self.append(&record) {
            warn!(agent_id = %record.agent_id, error = %e, "Failed to write audit record");
        }
        if self.records.len() == self.retain {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.written += 1;
    }

    /// Most recent records, oldest first.
    pub fn records(&self) -> &VecDeque<TerminationRecord> {
        &self.records
    }

    /// Every record written since startup, including those no longer held.
    pub fn total(&self) -> u64 {
        self.written
    }
}
