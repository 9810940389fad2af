use crate::ledger::{BlockRange, LedgerError};
use crate::reconcile::sync::repositories::CheckpointError;

/// Error types for the reconciliation loop
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Checkpoint error: {0}")]
	CheckpointError(#[from] CheckpointError),

	#[error("Node rejected single-block range {0} as too wide")]
	UnsplittableRange(BlockRange),

	#[error("Coordinator not started; call start() before processing chunks")]
	NotStarted,
}
