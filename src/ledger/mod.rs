//! Ledger node integration module
//!
//! This module provides the read-only client for the distributed ledger that is the source of
//! truth for campus balances. The ledger is treated as an opaque, append-only log producer that
//! exposes its current height and the logs emitted within a block range.

/// JSON-RPC client and the `ChainReader` seam
mod client;
/// Type definitions for ledger data structures
mod types;

pub use client::{ChainReader, JsonRpcChainReader, wait_for_node};
pub use types::*;
