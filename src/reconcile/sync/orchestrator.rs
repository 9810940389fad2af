//! Reconciliation coordinator and integration point for all sync services.
//!
//! This module defines the `SyncCoordinator`, which drives the engine from the persisted
//! checkpoint to the ledger head and then keeps polling for new blocks. Each cycle it:
//! - Queries the head height and derives the target, staying `confirmations` blocks behind
//! - Walks the ranges between the checkpoint and the target in chunks
//! - Fetches raw logs, halving any range the node rejects as too wide
//! - Decodes the logs and hands the events to the `ReconciliationDispatcher`
//! - Persists the chunk's upper bound only when every notification succeeded
//!
//! A chunk with a failed notification leaves the checkpoint untouched, so the identical range is
//! fetched and dispatched again on the next cycle. Cancellation is observed between chunks and
//! during the poll sleep, never in the middle of a chunk.

use crate::ledger::{BlockRange, ChainReader, RawLogEntry};
use crate::reconcile::ReconcileError;
use crate::reconcile::sync::{
    decoder::EventDecoder,
    dispatcher::ReconciliationDispatcher,
    progress_tracker::{SyncProgressTracker, SyncStats},
    ranges::ChunkPlan,
    repositories::CheckpointRepository,
    state_persistence::CheckpointStore,
};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not running, or stopped after cancellation.
    Idle,
    /// Working through ranges behind the target height.
    CatchingUp,
    /// Caught up; waiting for the next poll.
    Polling,
}

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Contract whose logs are reconciled
    pub contract_address: String,
    /// Maximum number of blocks per chunk
    pub chunk_size: u64,
    /// Sleep between polls once caught up
    pub poll_interval: Duration,
    /// Blocks to stay behind the ledger head
    pub confirmations: u64,
    /// Lower bound for the first range of a fresh checkpoint
    pub start_block: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            chunk_size: 1000,
            poll_interval: Duration::from_secs(2),
            confirmations: 0,
            start_block: 0,
        }
    }
}

/// Result of processing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Every event was delivered and the checkpoint now covers the chunk.
    Advanced { events: usize },
    /// At least one notification failed; the range is retried next cycle.
    Incomplete { failed: usize },
}

/// Drives the catch-up and polling loop for one checkpoint.
pub struct SyncCoordinator {
    reader: Arc<dyn ChainReader>,
    decoder: EventDecoder,
    dispatcher: ReconciliationDispatcher,
    checkpoint: CheckpointStore,
    progress: SyncProgressTracker,
    config: SyncConfig,
    /// Height of the durable checkpoint; `None` until `start` ran.
    height: Option<u64>,
    state: SyncState,
}

impl SyncCoordinator {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        dispatcher: ReconciliationDispatcher,
        repository: Box<dyn CheckpointRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            reader,
            decoder: EventDecoder::new(&config.contract_address),
            dispatcher,
            checkpoint: CheckpointStore::new(repository),
            progress: SyncProgressTracker::new(0),
            config,
            height: None,
            state: SyncState::Idle,
        }
    }

    /// Load the checkpoint. Must be called once before `tick`.
    pub async fn start(&mut self) -> Result<u64, ReconcileError> {
        let height = self.checkpoint.load().await?;
        self.height = Some(height);
        self.progress = SyncProgressTracker::new(height);

        info!(
            "Reconciling {} from checkpoint {} (chunk size {}, {} confirmations)",
            self.config.contract_address, height, self.config.chunk_size, self.config.confirmations
        );
        Ok(height)
    }

    /// Run until `cancel` fires. Only startup errors are returned.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<SyncStats, ReconcileError> {
        if self.height.is_none() {
            self.start().await?;
        }
        info!(
            "Downstream lags the ledger by at most {:?} plus node latency once caught up",
            self.config.poll_interval
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.tick(&cancel).await {
                error!(
                    "Reconciliation cycle failed: {}; retrying in {:?}",
                    e, self.config.poll_interval
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.state = SyncState::Idle;
        self.progress.validate_contiguity();
        self.progress.log_progress(true);

        let stats = self.progress.get_stats();
        info!("Reconciliation stopped. {}", stats.summary());
        Ok(stats)
    }

    /// One cycle: reconcile chunk by chunk up to the current target height.
    ///
    /// Returns early on cancellation or after the first incomplete chunk.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let target = self.target_height().await?;
        let checkpoint = self.height.ok_or(ReconcileError::NotStarted)?;

        let plan = ChunkPlan::new(
            checkpoint,
            self.config.start_block,
            target,
            self.config.chunk_size,
        );
        let behind = plan.remaining();
        if behind > 1 {
            info!("{} chunks behind target block {}", behind, target);
        }

        for range in plan {
            if cancel.is_cancelled() {
                debug!("Cancellation requested, leaving cycle");
                return Ok(());
            }

            self.state = SyncState::CatchingUp;
            if let ChunkOutcome::Incomplete { .. } = self.process_chunk(range).await? {
                return Ok(());
            }
        }

        if self.state != SyncState::Polling {
            info!("Caught up at block {}", self.height.unwrap_or(checkpoint));
        }
        self.state = SyncState::Polling;
        Ok(())
    }

    /// Fetch, decode and dispatch one range, then advance the checkpoint if it completed.
    pub async fn process_chunk(&mut self, range: BlockRange) -> Result<ChunkOutcome, ReconcileError> {
        let logs = self.fetch_logs(range).await?;
        let (events, skipped) = self.decoder.decode_batch(&logs);
        let count = events.len();

        let report = self.dispatcher.dispatch_all(events).await;
        if !report.is_complete() {
            let failed = report.failures.len();
            warn!(
                from = range.from_block,
                to = range.to_block,
                events = count,
                failed,
                "Chunk incomplete, checkpoint held at {:?}",
                self.height
            );
            self.progress.record_incomplete();
            return Ok(ChunkOutcome::Incomplete { failed });
        }

        self.checkpoint.save(range.to_block).await?;
        self.height = Some(range.to_block);
        self.progress.record_advanced(range, count, skipped);
        self.progress.log_progress(false);

        debug!(
            from = range.from_block,
            to = range.to_block,
            events = count,
            failed = 0,
            "Chunk reconciled"
        );
        Ok(ChunkOutcome::Advanced { events: count })
    }

    /// Logs for `range`, splitting it while the node reports it as too wide.
    async fn fetch_logs(&self, range: BlockRange) -> Result<Vec<RawLogEntry>, ReconcileError> {
        let mut pending = vec![range];
        let mut logs = Vec::new();

        while let Some(next) = pending.pop() {
            match self
                .reader
                .logs_in_range(&self.config.contract_address, next.from_block, next.to_block)
                .await
            {
                Ok(mut batch) => logs.append(&mut batch),
                Err(e) if e.is_range_too_wide() => {
                    let (lower, upper) = next
                        .split()
                        .ok_or(ReconcileError::UnsplittableRange(next))?;
                    debug!("Range {} too wide, retrying as {} and {}", next, lower, upper);
                    pending.push(upper);
                    pending.push(lower);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(logs)
    }

    async fn target_height(&self) -> Result<u64, ReconcileError> {
        let head = self.reader.current_height().await?;
        Ok(head.saturating_sub(self.config.confirmations))
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Height of the durable checkpoint.
    pub fn checkpoint(&self) -> Option<u64> {
        self.height
    }

    pub fn stats(&self) -> SyncStats {
        self.progress.get_stats()
    }
}
