//! Types shared by the chain reader and its callers.

use serde::Deserialize;
use std::fmt;

/// An inclusive block range `from_block..=to_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
	pub from_block: u64,
	pub to_block: u64,
}

impl BlockRange {
	pub fn new(from_block: u64, to_block: u64) -> Self {
		debug_assert!(from_block <= to_block, "empty block range");
		Self {
			from_block,
			to_block,
		}
	}

	/// Number of blocks covered by the range.
	pub fn width(&self) -> u64 {
		self.to_block - self.from_block + 1
	}

	/// Split the range into two halves, lower half first.
	///
	/// Returns `None` for a single-block range, which cannot be narrowed further.
	pub fn split(&self) -> Option<(BlockRange, BlockRange)> {
		if self.from_block == self.to_block {
			return None;
		}
		let mid = self.from_block + (self.to_block - self.from_block) / 2;
		Some((
			BlockRange::new(self.from_block, mid),
			BlockRange::new(mid + 1, self.to_block),
		))
	}
}

impl fmt::Display for BlockRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}, {}]", self.from_block, self.to_block)
	}
}

/// A log entry as emitted by the ledger, opaque until decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
	pub block_number: u64,
	/// Position of the log within its block.
	pub log_index: u64,
	pub transaction_hash: String,
	pub emitter_address: String,
	/// Hex encoded 32-byte topics, signature topic first.
	pub topics: Vec<String>,
	/// Hex encoded ABI data.
	pub data: String,
}

/// Log object as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcLog {
	pub address: String,
	#[serde(default)]
	pub topics: Vec<String>,
	#[serde(default)]
	pub data: String,
	pub block_number: Option<String>,
	pub transaction_hash: Option<String>,
	pub log_index: Option<String>,
	/// Set by the node when the log was dropped by a reorg.
	#[serde(default)]
	pub removed: bool,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcErrorObject {
	pub code: i64,
	pub message: String,
}

/// Error types for ledger node queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Ledger node unavailable: {0}")]
	NodeUnavailable(String),

	#[error("Block range {range} too wide for node: {reason}")]
	RangeTooWide { range: BlockRange, reason: String },

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("Invalid node response: {0}")]
	InvalidResponse(String),
}

impl LedgerError {
	/// Whether the caller should narrow the queried range and retry right away.
	pub fn is_range_too_wide(&self) -> bool {
		matches!(self, LedgerError::RangeTooWide { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn width_is_inclusive() {
		assert_eq!(BlockRange::new(101, 1100).width(), 1000);
		assert_eq!(BlockRange::new(7, 7).width(), 1);
	}

	#[test]
	fn split_covers_range_without_overlap() {
		let (lo, hi) = BlockRange::new(2101, 2500).split().unwrap();
		assert_eq!(lo, BlockRange::new(2101, 2300));
		assert_eq!(hi, BlockRange::new(2301, 2500));

		let (lo, hi) = BlockRange::new(10, 11).split().unwrap();
		assert_eq!(lo, BlockRange::new(10, 10));
		assert_eq!(hi, BlockRange::new(11, 11));
	}

	#[test]
	fn single_block_cannot_split() {
		assert!(BlockRange::new(42, 42).split().is_none());
	}
}
