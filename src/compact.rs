//! Compaction of bookkeeping rows that no longer affect behavior.
//!
//! Resolved follow intents and dead-lettered tasks are kept for a while as
//! an audit trail; compaction removes the ones older than a threshold.

use crate::store::Store;
use chrono::{Duration, Utc};
use eyre::{Context, Result};

/// Configuration for compaction.
#[derive(Debug, Clone)]
pub struct CompactConfig {
    /// Rows settled longer ago than this are removed.
    pub older_than_days: u32,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self { older_than_days: 30 }
    }
}

impl CompactConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the age threshold in days.
    pub fn older_than_days(mut self, days: u32) -> Self {
        self.older_than_days = days;
        self
    }
}

/// Result of a compaction operation.
#[derive(Debug, Default, PartialEq)]
pub struct CompactResult {
    pub intents_pruned: usize,
    pub tasks_pruned: usize,
}

/// Extension trait for compaction operations on Store.
pub trait StoreCompactExt {
    /// Run compaction with the given configuration.
    fn compact(&mut self, config: &CompactConfig) -> Result<CompactResult>;
}

impl StoreCompactExt for Store {
    fn compact(&mut self, config: &CompactConfig) -> Result<CompactResult> {
        let cutoff = Utc::now() - Duration::days(config.older_than_days as i64);

        let result = self
            .storage
            .transaction("compact", |db| {
                Ok(CompactResult {
                    intents_pruned: db.delete_resolved_intents_before(cutoff)?,
                    tasks_pruned: db.delete_failed_tasks_before(cutoff.timestamp_millis())?,
                })
            })
            .context("Failed to compact store")?;

        log::info!(
            "Compacted: {} intents, {} failed tasks older than {} days",
            result.intents_pruned,
            result.tasks_pruned,
            config.older_than_days
        );
        Ok(result)
    }
}
