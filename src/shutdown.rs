//! Process shutdown signals.
//!
//! Interactive runs stop on Ctrl+C. Service managers and container runtimes stop the process with
//! SIGTERM, so on unix both are observed.

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Listener for the signals that end a reconciliation run.
pub struct ShutdownSignal {
	#[cfg(unix)]
	terminate: Signal,
}

impl ShutdownSignal {
	/// Install the handlers. Must be called inside a tokio runtime.
	pub fn register() -> std::io::Result<Self> {
		Ok(Self {
			#[cfg(unix)]
			terminate: signal(SignalKind::terminate())?,
		})
	}

	/// Wait for the first shutdown signal and return its name.
	#[cfg(unix)]
	pub async fn recv(&mut self) -> std::io::Result<&'static str> {
		tokio::select! {
			result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
			_ = self.terminate.recv() => Ok("SIGTERM"),
		}
	}

	#[cfg(not(unix))]
	pub async fn recv(&mut self) -> std::io::Result<&'static str> {
		tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
	}
}
