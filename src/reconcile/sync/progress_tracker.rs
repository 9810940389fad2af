//! Progress tracking for ledger reconciliation.
//!
//! This module provides the `SyncProgressTracker`, which records every block range the
//! coordinator advanced the checkpoint over, counts delivered events and skipped logs, and
//! checks that the advanced ranges form one contiguous prefix with no skipped blocks.

use crate::ledger::BlockRange;
use tracing::{info, warn};

/// Blocks advanced between two periodic progress lines.
const LOG_EVERY_BLOCKS: u64 = 1000;

/// Service for tracking synchronization progress
///
/// The progress tracker records which block ranges have been reconciled, counts events and
/// failed cycles, and provides statistics and validation methods for contiguity.
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Checkpoint the session started from
    start_height: u64,
    /// Highest block the checkpoint was advanced to
    highest_processed: u64,
    /// Every range the checkpoint advanced over, in order
    advanced: Vec<BlockRange>,
    /// Total events delivered downstream
    events_delivered: usize,
    /// Total logs dropped by the decoder
    logs_skipped: usize,
    /// Chunks that ended with at least one failed notification
    incomplete_chunks: usize,
    /// Last height at which we logged progress
    last_logged_height: u64,
}

impl SyncProgressTracker {
    /// Create a new progress tracker starting from the given checkpoint.
    pub fn new(start_height: u64) -> Self {
        Self {
            start_height,
            highest_processed: start_height,
            advanced: Vec::new(),
            events_delivered: 0,
            logs_skipped: 0,
            incomplete_chunks: 0,
            last_logged_height: start_height,
        }
    }

    /// Record that the checkpoint advanced over `range`
    pub fn record_advanced(&mut self, range: BlockRange, events: usize, skipped: usize) {
        self.highest_processed = self.highest_processed.max(range.to_block);
        self.advanced.push(range);
        self.events_delivered += events;
        self.logs_skipped += skipped;
    }

    /// Record a chunk that has to be retried
    pub fn record_incomplete(&mut self) {
        self.incomplete_chunks += 1;
    }

    /// Check for gaps between advanced ranges
    ///
    /// Returns a list of (start, end) pairs for missing block ranges.
    pub fn check_for_gaps(&self) -> Vec<(u64, u64)> {
        let mut ranges = self.advanced.clone();
        ranges.sort_by_key(|r| r.from_block);

        ranges
            .windows(2)
            .filter(|w| w[1].from_block > w[0].to_block + 1)
            .map(|w| (w[0].to_block + 1, w[1].from_block - 1))
            .collect()
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let blocks_since_last_log = self
            .highest_processed
            .saturating_sub(self.last_logged_height);
        let should_log = force || blocks_since_last_log >= LOG_EVERY_BLOCKS;

        if should_log && !self.advanced.is_empty() {
            info!(
                "Reconciliation progress: {} events delivered, {} logs skipped, checkpoint at block {}",
                self.events_delivered, self.logs_skipped, self.highest_processed
            );
            self.last_logged_height = self.highest_processed;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            highest_processed: self.highest_processed,
            chunks_advanced: self.advanced.len(),
            events_delivered: self.events_delivered,
            logs_skipped: self.logs_skipped,
            incomplete_chunks: self.incomplete_chunks,
            gaps: self.check_for_gaps(),
        }
    }

    /// Warn about any gaps between advanced ranges; returns whether the prefix is contiguous.
    pub fn validate_contiguity(&self) -> bool {
        let gaps = self.check_for_gaps();
        for (start, end) in &gaps {
            warn!("Gap detected: blocks {} to {} were never reconciled", start, end);
        }
        gaps.is_empty()
    }
}

/// Statistics about the sync progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_height: u64,
    pub highest_processed: u64,
    pub chunks_advanced: usize,
    pub events_delivered: usize,
    pub logs_skipped: usize,
    pub incomplete_chunks: usize,
    pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Reconciled blocks {} to {}: {} chunks, {} events, {} skipped logs, {} retried chunks{}",
            self.start_height + 1,
            self.highest_processed,
            self.chunks_advanced,
            self.events_delivered,
            self.logs_skipped,
            self.incomplete_chunks,
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", self.gaps.len())
            }
        )
    }
}
