//! Ledger Reconciliation Module
//!
//! This module provides the core logic for keeping a downstream store consistent with the campus
//! token contract's event log. It is composed of several submodules, each responsible for one
//! step of the cycle:
//!
//! - `orchestrator`: The `SyncCoordinator`, which drives the catch-up and polling loop.
//! - `ranges`: Plans the block ranges between the checkpoint and the target height.
//! - `decoder`: Turns raw log entries into typed domain events.
//! - `events`: Domain event types and their idempotency keys.
//! - `dispatcher`: Delivers events downstream, serialized per subject group.
//! - `state_persistence` and `repositories`: The durable, monotonic checkpoint.
//! - `progress_tracker`: Tracks advanced ranges, statistics and contiguity.
//!
//! A range's checkpoint is written only after every event in it was delivered, so a crash or a
//! failed notification replays the range instead of skipping it.

/// Log entry decoding
pub mod decoder;
/// Downstream notification fan-out
pub mod dispatcher;
/// Domain event types
pub mod events;
/// Main coordinator for the reconciliation loop
pub mod orchestrator;
/// Tracks reconciliation progress and statistics
pub mod progress_tracker;
/// Block range planning
pub mod ranges;
/// Checkpoint repositories
pub mod repositories;
/// Monotonic checkpoint store
pub mod state_persistence;

pub use orchestrator::*;
