//! Block range planning for the catch-up loop.

use crate::ledger::BlockRange;

/// First block the next chunk may start at.
///
/// Block 0 is never reconciled, and `start_block` bounds the first range of a fresh checkpoint.
pub fn first_unprocessed(checkpoint: u64, start_block: u64) -> u64 {
	checkpoint.saturating_add(1).max(start_block).max(1)
}

/// The next chunk after `checkpoint`, or `None` when caught up with `target`.
pub fn next_range(checkpoint: u64, start_block: u64, target: u64, chunk_size: u64) -> Option<BlockRange> {
	let from = first_unprocessed(checkpoint, start_block);
	if from > target {
		return None;
	}
	let to = from.saturating_add(chunk_size.max(1) - 1).min(target);
	Some(BlockRange::new(from, to))
}

/// Iterator over the chunks between a checkpoint and a target height.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
	checkpoint: u64,
	start_block: u64,
	target: u64,
	chunk_size: u64,
}

impl ChunkPlan {
	pub fn new(checkpoint: u64, start_block: u64, target: u64, chunk_size: u64) -> Self {
		Self {
			checkpoint,
			start_block,
			target,
			chunk_size,
		}
	}

	/// Number of chunks left to process.
	pub fn remaining(&self) -> u64 {
		let from = first_unprocessed(self.checkpoint, self.start_block);
		if from > self.target {
			0
		} else {
			(self.target - from) / self.chunk_size.max(1) + 1
		}
	}
}

impl Iterator for ChunkPlan {
	type Item = BlockRange;

	fn next(&mut self) -> Option<Self::Item> {
		let range = next_range(self.checkpoint, self.start_block, self.target, self.chunk_size)?;
		self.checkpoint = range.to_block;
		Some(range)
	}
}
