//! Command line and environment configuration.
//!
//! Every flag can also be supplied through the environment variable named next to it, so the
//! binary runs unchanged under a process supervisor or in a container.

use crate::reconcile::sync::SyncConfig;

use clap::{Parser, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid {flag} {value:?}: {reason}")]
	InvalidUrl {
		flag: &'static str,
		value: String,
		reason: String,
	},

	#[error("Invalid contract address {0:?}: expected 0x followed by 40 hex digits")]
	InvalidAddress(String),

	#[error("--{0} must be at least 1")]
	Zero(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	Pretty,
	Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "campus-ledger-sync")]
#[command(about = "Reconciles campus token ledger events into the downstream store")]
pub struct Cli {
	/// JSON-RPC endpoint of the ledger node
	#[arg(long, env = "LEDGER_NODE_URL")]
	pub node_url: String,

	/// Address of the campus token contract
	#[arg(long, env = "LEDGER_CONTRACT_ADDRESS")]
	pub contract_address: String,

	/// Base URL of the downstream service
	#[arg(long, env = "DOWNSTREAM_URL")]
	pub downstream_url: String,

	/// Maximum number of blocks per chunk
	#[arg(long, env = "SYNC_CHUNK_SIZE", default_value_t = 1000)]
	pub chunk_size: u64,

	/// Milliseconds to wait between polls once caught up
	#[arg(long, env = "SYNC_POLL_INTERVAL_MS", default_value_t = 2000)]
	pub poll_interval_ms: u64,

	/// Checkpoint file
	#[arg(long, env = "CHECKPOINT_PATH", default_value = "./data/checkpoint.json")]
	pub checkpoint_path: PathBuf,

	/// First block to reconcile when no checkpoint exists
	#[arg(long, env = "SYNC_START_BLOCK", default_value_t = 0)]
	pub start_block: u64,

	/// Blocks to stay behind the ledger head
	#[arg(long, env = "SYNC_CONFIRMATIONS", default_value_t = 0)]
	pub confirmations: u64,

	/// Subject groups notified concurrently within a chunk
	#[arg(long, env = "SYNC_MAX_CONCURRENT_NOTIFICATIONS", default_value_t = 8)]
	pub max_concurrent_notifications: usize,

	/// Timeout for node and downstream requests, in seconds
	#[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
	pub request_timeout_secs: u64,

	#[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
	pub log_format: LogFormat,

	/// Dry run mode (validate config, check the node and exit)
	#[arg(long)]
	pub dry_run: bool,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
	pub node_url: Url,
	pub downstream_url: Url,
	pub checkpoint_path: PathBuf,
	pub sync: SyncConfig,
	pub max_concurrent_notifications: usize,
	pub request_timeout: Duration,
	pub log_format: LogFormat,
	pub dry_run: bool,
}

impl Cli {
	pub fn validate(self) -> Result<Settings, ConfigError> {
		let node_url = parse_http_url("--node-url", &self.node_url)?;
		let downstream_url = parse_http_url("--downstream-url", &self.downstream_url)?;
		let contract_address = parse_address(&self.contract_address)?;

		if self.chunk_size == 0 {
			return Err(ConfigError::Zero("chunk-size"));
		}
		if self.max_concurrent_notifications == 0 {
			return Err(ConfigError::Zero("max-concurrent-notifications"));
		}
		if self.request_timeout_secs == 0 {
			return Err(ConfigError::Zero("request-timeout-secs"));
		}

		Ok(Settings {
			node_url,
			downstream_url,
			checkpoint_path: self.checkpoint_path,
			sync: SyncConfig {
				contract_address,
				chunk_size: self.chunk_size,
				poll_interval: Duration::from_millis(self.poll_interval_ms),
				confirmations: self.confirmations,
				start_block: self.start_block,
			},
			max_concurrent_notifications: self.max_concurrent_notifications,
			request_timeout: Duration::from_secs(self.request_timeout_secs),
			log_format: self.log_format,
			dry_run: self.dry_run,
		})
	}
}

fn parse_http_url(flag: &'static str, value: &str) -> Result<Url, ConfigError> {
	let invalid = |reason: String| ConfigError::InvalidUrl {
		flag,
		value: value.to_string(),
		reason,
	};

	let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
	match url.scheme() {
		"http" | "https" => Ok(url),
		other => Err(invalid(format!("unsupported scheme {}", other))),
	}
}

/// Normalize a 20-byte hex address to lowercase.
fn parse_address(value: &str) -> Result<String, ConfigError> {
	let digits = value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
		.ok_or_else(|| ConfigError::InvalidAddress(value.to_string()))?;

	if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
		return Err(ConfigError::InvalidAddress(value.to_string()));
	}
	Ok(format!("0x{}", digits.to_ascii_lowercase()))
}
