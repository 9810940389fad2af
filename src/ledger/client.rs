//!
//! JSON-RPC client for the ledger node.
//!
//! This module provides the `ChainReader` seam used by the sync coordinator and an HTTP
//! implementation speaking the `eth_blockNumber` / `eth_getLogs` dialect. All reads are pure
//! and safe to repeat with identical arguments.

use super::types::*;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// JSON-RPC error code used by several node implementations for "limit exceeded".
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Message fragments nodes use when a log query spans too many blocks or results.
const RANGE_TOO_WIDE_HINTS: &[&str] = &[
	"block range",
	"range too large",
	"range too wide",
	"query returned more than",
	"too many results",
	"exceed maximum block range",
	"response size exceeded",
];

/// Read-only view of the ledger node.
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
	/// Current head height of the ledger.
	async fn current_height(&self) -> Result<u64, LedgerError>;

	/// Raw logs emitted by `address` within `from_block..=to_block`.
	async fn logs_in_range(
		&self,
		address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLogEntry>, LedgerError>;
}

/// HTTP JSON-RPC ledger client
pub struct JsonRpcChainReader {
	/// The underlying HTTP client for RPC calls.
	http_client: Client,
	/// The node's JSON-RPC endpoint.
	node_url: String,
	request_id: AtomicU64,
}

impl JsonRpcChainReader {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `node_url` - The HTTP JSON-RPC endpoint of the ledger node.
	/// * `timeout` - Per-request timeout.
	pub fn new(node_url: String, timeout: Duration) -> Result<Self, LedgerError> {
		let http_client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| LedgerError::NodeUnavailable(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			http_client,
			node_url,
			request_id: AtomicU64::new(1),
		})
	}

	/// Execute a JSON-RPC call and return its `result` member.
	async fn execute_rpc(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, LedgerError> {
		let id = self.request_id.fetch_add(1, Ordering::Relaxed);
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.node_url)
			.json(&request_body)
			.send()
			.await
			.map_err(|e| LedgerError::NodeUnavailable(format!("{} request failed: {}", method, e)))?;

		let status = response.status();
		if !status.is_success() {
			return Err(LedgerError::NodeUnavailable(format!(
				"{} returned HTTP {}",
				method, status
			)));
		}

		let mut response_json: serde_json::Value = response
			.json()
			.await
			.map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))?;

		if let Some(error) = response_json.get("error").filter(|e| !e.is_null()) {
			let error: RpcErrorObject = serde_json::from_value(error.clone())
				.map_err(|e| LedgerError::InvalidResponse(format!("{}: bad error object: {}", method, e)))?;
			return Err(LedgerError::Rpc {
				code: error.code,
				message: error.message,
			});
		}

		response_json
			.get_mut("result")
			.map(serde_json::Value::take)
			.ok_or_else(|| LedgerError::InvalidResponse(format!("{}: missing result", method)))
	}
}

#[async_trait::async_trait]
impl ChainReader for JsonRpcChainReader {
	async fn current_height(&self) -> Result<u64, LedgerError> {
		let result = self.execute_rpc("eth_blockNumber", json!([])).await?;
		let quantity = result
			.as_str()
			.ok_or_else(|| LedgerError::InvalidResponse("eth_blockNumber: not a string".to_string()))?;
		parse_quantity(quantity)
	}

	async fn logs_in_range(
		&self,
		address: &str,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLogEntry>, LedgerError> {
		let range = BlockRange::new(from_block, to_block);
		debug!("Fetching logs for {} in {}", address, range);

		let filter = json!([{
			"address": address,
			"fromBlock": format!("{:#x}", from_block),
			"toBlock": format!("{:#x}", to_block),
		}]);

		let result = match self.execute_rpc("eth_getLogs", filter).await {
			Ok(result) => result,
			Err(LedgerError::Rpc { code, message }) if is_range_too_wide(code, &message) => {
				return Err(LedgerError::RangeTooWide {
					range,
					reason: message,
				});
			}
			Err(e) => return Err(e),
		};

		let logs: Vec<RpcLog> = serde_json::from_value(result)
			.map_err(|e| LedgerError::InvalidResponse(format!("eth_getLogs: {}", e)))?;

		let mut entries = Vec::with_capacity(logs.len());
		for log in logs {
			if log.removed {
				debug!("Skipping removed log in {}", range);
				continue;
			}
			entries.push(raw_entry_from_rpc(log)?);
		}
		Ok(entries)
	}
}

/// Wait until the node answers a height query, backing off exponentially.
///
/// Used once at startup; gives up after `max_elapsed` and returns the last error.
pub async fn wait_for_node(
	reader: &dyn ChainReader,
	max_elapsed: Duration,
) -> Result<u64, LedgerError> {
	let policy = ExponentialBackoff {
		initial_interval: Duration::from_millis(200),
		max_interval: Duration::from_secs(5),
		max_elapsed_time: Some(max_elapsed),
		..ExponentialBackoff::default()
	};

	let height = retry(policy, || async {
		reader.current_height().await.map_err(|e| match e {
			LedgerError::InvalidResponse(_) => backoff::Error::permanent(e),
			e => {
				warn!("Ledger node not reachable yet: {}", e);
				backoff::Error::transient(e)
			}
		})
	})
	.await?;

	info!("Ledger node reachable at height {}", height);
	Ok(height)
}

fn is_range_too_wide(code: i64, message: &str) -> bool {
	let message = message.to_ascii_lowercase();
	code == LIMIT_EXCEEDED_CODE || RANGE_TOO_WIDE_HINTS.iter().any(|hint| message.contains(hint))
}

/// Parse a hex quantity such as `0x1b4`.
pub(crate) fn parse_quantity(quantity: &str) -> Result<u64, LedgerError> {
	let digits = quantity
		.strip_prefix("0x")
		.or_else(|| quantity.strip_prefix("0X"))
		.ok_or_else(|| LedgerError::InvalidResponse(format!("quantity without 0x prefix: {}", quantity)))?;
	u64::from_str_radix(digits, 16)
		.map_err(|e| LedgerError::InvalidResponse(format!("bad quantity {}: {}", quantity, e)))
}

fn raw_entry_from_rpc(log: RpcLog) -> Result<RawLogEntry, LedgerError> {
	let block_number = log
		.block_number
		.as_deref()
		.ok_or_else(|| LedgerError::InvalidResponse("pending log without blockNumber".to_string()))
		.and_then(parse_quantity)?;
	let log_index = match log.log_index.as_deref() {
		Some(index) => parse_quantity(index)?,
		None => 0,
	};
	let transaction_hash = log
		.transaction_hash
		.ok_or_else(|| LedgerError::InvalidResponse("log without transactionHash".to_string()))?;

	Ok(RawLogEntry {
		block_number,
		log_index,
		transaction_hash: transaction_hash.to_ascii_lowercase(),
		emitter_address: log.address.to_ascii_lowercase(),
		topics: log.topics.into_iter().map(|t| t.to_ascii_lowercase()).collect(),
		data: log.data,
	})
}
