//! In-memory balance store.
//!
//! Balances are never adjusted by deltas. The store keeps one completed record per idempotency
//! key and derives each subject's balance from the set of records, so applying an event twice,
//! or applying two events in either order, converges to the same state. Wallet mappings are
//! derived the same way: a subject's wallet is set by its link with the highest
//! `(block, log_index)`, falling back to its earliest registration, and an address belongs to
//! the subject whose deciding record is the most recent.

use super::{NotificationOutcome, Notifier};
use crate::reconcile::sync::events::{DomainEvent, EventPayload, IdempotencyKey};

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Balance movement recorded for one applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEffect {
	Transfer { from: String, to: String, amount: u128 },
	Credit { subject: String, amount: u128 },
	Debit { subject: String, amount: u128 },
	/// Subject repointed to a new wallet.
	Link { subject: String, address: String },
	/// Subject's first wallet; ignored once any link exists.
	Registration { subject: String, address: String },
}

/// A completed downstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
	pub position: (u64, u64),
	pub effect: RecordEffect,
}

#[derive(Debug, Default)]
struct StoreState {
	records: HashMap<IdempotencyKey, LedgerRecord>,
	/// Number of notify calls, including replays.
	calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryBalanceStore {
	state: Mutex<StoreState>,
	/// Keys that fail with a transient error until cleared.
	failing: Mutex<HashSet<IdempotencyKey>>,
}

impl InMemoryBalanceStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make notifications for `key` fail transiently until [`Self::heal`] is called.
	pub fn fail_on(&self, key: IdempotencyKey) {
		self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(key);
	}

	pub fn heal(&self) {
		self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}

	/// Cached balance of `subject`, derived from completed records.
	pub fn balance(&self, subject: &str) -> i128 {
		let state = self.lock_state();
		state
			.records
			.values()
			.map(|record| match &record.effect {
				RecordEffect::Transfer { from, to, amount } => {
					let amount = *amount as i128;
					let mut delta = 0;
					if to == subject {
						delta += amount;
					}
					if from == subject {
						delta -= amount;
					}
					delta
				}
				RecordEffect::Credit { subject: s, amount } if s == subject => *amount as i128,
				RecordEffect::Debit { subject: s, amount } if s == subject => -(*amount as i128),
				_ => 0,
			})
			.sum()
	}

	pub fn wallet_of(&self, subject: &str) -> Option<String> {
		let state = self.lock_state();
		Self::wallets(&state)
			.get(subject)
			.map(|(address, _)| address.to_string())
	}

	/// Subject currently holding `address`; the most recent claim wins.
	pub fn owner_of(&self, address: &str) -> Option<String> {
		let state = self.lock_state();
		Self::wallets(&state)
			.into_iter()
			.filter(|(_, (wallet, _))| *wallet == address)
			.max_by_key(|(_, (_, position))| *position)
			.map(|(subject, _)| subject.to_string())
	}

	pub fn record_count(&self) -> usize {
		self.lock_state().records.len()
	}

	pub fn call_count(&self) -> usize {
		self.lock_state().calls
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, StoreState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// subject -> (wallet, position of the record deciding it)
	fn wallets(state: &StoreState) -> HashMap<&str, (&str, (u64, u64))> {
		let mut links: HashMap<&str, (&str, (u64, u64))> = HashMap::new();
		let mut registrations: HashMap<&str, (&str, (u64, u64))> = HashMap::new();

		for record in state.records.values() {
			let (table, subject, address, later_wins) = match &record.effect {
				RecordEffect::Link { subject, address } => (&mut links, subject, address, true),
				RecordEffect::Registration { subject, address } => {
					(&mut registrations, subject, address, false)
				}
				_ => continue,
			};
			let entry = table
				.entry(subject.as_str())
				.or_insert((address.as_str(), record.position));
			let replaces = if later_wins {
				record.position > entry.1
			} else {
				record.position < entry.1
			};
			if replaces {
				*entry = (address.as_str(), record.position);
			}
		}

		for (subject, registration) in registrations {
			links.entry(subject).or_insert(registration);
		}
		links
	}

	fn apply(state: &mut StoreState, event: &DomainEvent) {
		let key = event.idempotency_key();
		if state.records.contains_key(&key) {
			debug!("Record {} already applied", key);
			return;
		}

		let effect = match &event.payload {
			EventPayload::Transfer {
				from_subject,
				to_subject,
				amount,
				..
			} => RecordEffect::Transfer {
				from: from_subject.clone(),
				to: to_subject.clone(),
				amount: *amount,
			},
			EventPayload::Mint { subject, amount } => RecordEffect::Credit {
				subject: subject.clone(),
				amount: *amount,
			},
			EventPayload::Burn { subject, amount } => RecordEffect::Debit {
				subject: subject.clone(),
				amount: *amount,
			},
			EventPayload::WalletLinked {
				subject,
				new_address,
				..
			} => RecordEffect::Link {
				subject: subject.clone(),
				address: new_address.clone(),
			},
			EventPayload::SubjectRegistered { subject, address } => RecordEffect::Registration {
				subject: subject.clone(),
				address: address.clone(),
			},
		};

		state.records.insert(
			key,
			LedgerRecord {
				position: event.position(),
				effect,
			},
		);
	}
}

#[async_trait::async_trait]
impl Notifier for InMemoryBalanceStore {
	async fn notify(&self, event: &DomainEvent) -> NotificationOutcome {
		let key = event.idempotency_key();
		let mut state = self.lock_state();
		state.calls += 1;

		if self
			.failing
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.contains(&key)
		{
			return NotificationOutcome::TransientFailure(format!("injected failure for {}", key));
		}

		Self::apply(&mut state, event);
		NotificationOutcome::Success
	}

	fn name(&self) -> &'static str {
		"InMemoryBalanceStore"
	}
}
