use anyhow::{Context, Result};
use campus_ledger_sync::config::{Cli, LogFormat};
use campus_ledger_sync::ledger::{JsonRpcChainReader, wait_for_node};
use campus_ledger_sync::notify::HttpNotifier;
use campus_ledger_sync::reconcile::sync::{
	SyncCoordinator, dispatcher::ReconciliationDispatcher, repositories::FileCheckpointRepository,
};
use campus_ledger_sync::shutdown::ShutdownSignal;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long to wait for the ledger node before giving up at startup.
const NODE_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.log_format);

	let settings = cli.validate()?;
	info!("Starting campus ledger reconciliation");
	info!("Ledger node: {}", settings.node_url);
	info!("Contract: {}", settings.sync.contract_address);
	info!("Downstream: {}", settings.downstream_url);

	let reader = Arc::new(
		JsonRpcChainReader::new(settings.node_url.to_string(), settings.request_timeout)
			.context("Failed to create ledger client")?,
	);
	let notifier = Arc::new(
		HttpNotifier::new(settings.downstream_url.as_str(), settings.request_timeout)
			.context("Failed to create downstream client")?,
	);
	info!("Notifications go to {}", notifier.events_url());

	let head = wait_for_node(reader.as_ref(), NODE_STARTUP_TIMEOUT)
		.await
		.context("Ledger node did not become reachable")?;

	if settings.dry_run {
		info!("Dry run mode - configuration is valid and node is at block {}, exiting", head);
		return Ok(());
	}

	let repository = FileCheckpointRepository::open(settings.checkpoint_path.clone())
		.with_context(|| format!("Failed to open checkpoint {:?}", settings.checkpoint_path))?;

	let dispatcher = ReconciliationDispatcher::new(notifier, settings.max_concurrent_notifications);
	let mut coordinator =
		SyncCoordinator::new(reader, dispatcher, Box::new(repository), settings.sync.clone());
	coordinator.start().await.context("Failed to load checkpoint")?;

	let mut shutdown = ShutdownSignal::register().context("Failed to install signal handlers")?;
	let cancel = CancellationToken::new();
	tokio::spawn({
		let cancel = cancel.clone();
		async move {
			match shutdown.recv().await {
				Ok(name) => info!("Received {}, shutting down", name),
				Err(e) => {
					error!("Failed to listen for shutdown signal: {}", e);
					return;
				}
			}
			cancel.cancel();
		}
	});

	info!("Reconciliation started. Press Ctrl+C or send SIGTERM to shutdown.");
	coordinator.run(cancel).await?;

	info!("Shutting down");
	Ok(())
}

fn init_logging(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	match format {
		LogFormat::Pretty => tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_target(false)
			.with_thread_ids(false)
			.with_thread_names(false)
			.with_file(false)
			.with_line_number(false)
			.with_timer(tracing_subscriber::fmt::time::time())
			.init(),
		LogFormat::Json => tracing_subscriber::fmt()
			.json()
			.with_env_filter(filter)
			.with_current_span(false)
			.init(),
	}
}
