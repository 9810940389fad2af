//!
//! HTTP notifier for the off-chain balance store.
//!
//! Each domain event is POSTed as JSON to `{downstream}/ledger-events` with an
//! `Idempotency-Key` header. The store is expected to treat a repeated key as already applied.

use super::{NotificationOutcome, Notifier, NotifyError};
use crate::reconcile::sync::events::DomainEvent;

use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const EVENTS_PATH: &str = "ledger-events";

/// Balance store client
#[derive(Clone)]
pub struct HttpNotifier {
	http_client: Client,
	events_url: Url,
}

impl HttpNotifier {
	/// Create a new notifier.
	///
	/// # Arguments
	/// * `downstream_url` - Base URL of the balance store API.
	/// * `timeout` - Per-request timeout.
	pub fn new(downstream_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
		let mut base = Url::parse(downstream_url)
			.map_err(|e| NotifyError::InvalidEndpoint(format!("{}: {}", downstream_url, e)))?;
		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());
			base.set_path(&path);
		}
		let events_url = base
			.join(EVENTS_PATH)
			.map_err(|e| NotifyError::InvalidEndpoint(e.to_string()))?;

		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			events_url,
		})
	}

	pub fn events_url(&self) -> &Url {
		&self.events_url
	}
}

#[async_trait::async_trait]
impl Notifier for HttpNotifier {
	async fn notify(&self, event: &DomainEvent) -> NotificationOutcome {
		let key = event.idempotency_key();

		let response = match self
			.http_client
			.post(self.events_url.clone())
			.header("Idempotency-Key", key.to_string())
			.json(event)
			.send()
			.await
		{
			Ok(response) => response,
			Err(e) => return NotificationOutcome::TransientFailure(format!("request failed: {}", e)),
		};

		let status = response.status();
		debug!("Downstream answered {} for {}", status, key);
		classify_status(status)
	}

	fn name(&self) -> &'static str {
		"HttpNotifier"
	}
}

/// Map the store's HTTP status to a notification outcome.
///
/// `409 Conflict` means the key was already applied, which is success for an idempotent write.
fn classify_status(status: StatusCode) -> NotificationOutcome {
	if status.is_success() || status == StatusCode::CONFLICT {
		NotificationOutcome::Success
	} else if status.is_server_error()
		|| status == StatusCode::REQUEST_TIMEOUT
		|| status == StatusCode::TOO_MANY_REQUESTS
	{
		NotificationOutcome::TransientFailure(format!("HTTP {}", status))
	} else {
		NotificationOutcome::PermanentFailure(format!("HTTP {}", status))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_events_url() {
		let notifier = HttpNotifier::new("http://cache.internal:8080/api", Duration::from_secs(1)).unwrap();
		assert_eq!(notifier.events_url().as_str(), "http://cache.internal:8080/api/ledger-events");

		let notifier = HttpNotifier::new("http://cache.internal:8080/", Duration::from_secs(1)).unwrap();
		assert_eq!(notifier.events_url().as_str(), "http://cache.internal:8080/ledger-events");
	}

	#[test]
	fn rejects_bad_url() {
		assert!(matches!(
			HttpNotifier::new("not a url", Duration::from_secs(1)),
			Err(NotifyError::InvalidEndpoint(_))
		));
	}

	#[test]
	fn classifies_statuses() {
		assert!(classify_status(StatusCode::OK).is_success());
		assert!(classify_status(StatusCode::CREATED).is_success());
		assert!(classify_status(StatusCode::CONFLICT).is_success());
		assert!(matches!(
			classify_status(StatusCode::SERVICE_UNAVAILABLE),
			NotificationOutcome::TransientFailure(_)
		));
		assert!(matches!(
			classify_status(StatusCode::TOO_MANY_REQUESTS),
			NotificationOutcome::TransientFailure(_)
		));
		assert!(matches!(
			classify_status(StatusCode::UNPROCESSABLE_ENTITY),
			NotificationOutcome::PermanentFailure(_)
		));
	}
}
