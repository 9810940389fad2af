//! Downstream notification integration module
//!
//! This module defines the contract between the reconciliation engine and the off-chain
//! balance store: one idempotent call per domain event, keyed on the event's transaction hash
//! and kind. It provides the HTTP client used in production and an in-memory store that
//! implements the same idempotent merge semantics.

/// HTTP client for the balance store's ledger-event endpoint
mod client;
/// In-memory balance store with idempotent, order-independent merges
mod memory;

pub use client::HttpNotifier;
pub use memory::{InMemoryBalanceStore, LedgerRecord, RecordEffect};

use crate::reconcile::sync::events::DomainEvent;

/// Result of delivering one domain event downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
	Success,
	/// Worth retrying with the next pass over the range.
	TransientFailure(String),
	/// Rejected by the store; retrying alone will not fix it.
	PermanentFailure(String),
}

impl NotificationOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, NotificationOutcome::Success)
	}
}

/// Sink for domain events. Implementations must be idempotent on the event's key.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, event: &DomainEvent) -> NotificationOutcome;

	/// Get the name of this notifier for logging and diagnostics.
	fn name(&self) -> &'static str;
}

/// Error types for the downstream transport
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
	#[error("Invalid downstream endpoint: {0}")]
	InvalidEndpoint(String),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),
}
