//! Reconciliation dispatcher.
//!
//! This module turns the domain events of one chunk into downstream notifications. Events are
//! partitioned into subject groups: two events land in the same group when they write a common
//! subject or wallet address, directly or through other events. Groups are dispatched
//! concurrently, up to a configured limit, while the events inside a group are sent one at a
//! time in ledger order so no subject or address sees a later write race ahead of an earlier one.
//!
//! A failed notification never stops its siblings. It is collected into the `DispatchReport`,
//! and any failure makes the chunk incomplete.

use crate::notify::{NotificationOutcome, Notifier};
use crate::reconcile::sync::events::{
    CAMPUS_TOKEN_DECIMALS, DomainEvent, EventPayload, IdempotencyKey,
};
use crate::utils::format_token_amount;

use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A notification that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNotification {
    pub key: IdempotencyKey,
    pub outcome: NotificationOutcome,
}

/// Outcome of dispatching every event of one chunk.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<FailedNotification>,
}

impl DispatchReport {
    /// True when every event was delivered; vacuously true for an empty chunk.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ReconciliationDispatcher {
    notifier: Arc<dyn Notifier>,
    max_concurrency: usize,
}

impl ReconciliationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, max_concurrency: usize) -> Self {
        Self {
            notifier,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Deliver one event downstream.
    pub async fn notify(&self, event: &DomainEvent) -> NotificationOutcome {
        let key = event.idempotency_key();
        let outcome = self.notifier.notify(event).await;

        match &outcome {
            NotificationOutcome::Success => {
                debug!("{} delivered {} ({})", self.notifier.name(), key, describe(event));
            }
            NotificationOutcome::TransientFailure(reason) => {
                warn!(block = event.block_number, "Notification {} failed transiently: {}", key, reason);
            }
            NotificationOutcome::PermanentFailure(reason) => {
                error!(block = event.block_number, "Notification {} rejected: {}", key, reason);
            }
        }
        outcome
    }

    /// Deliver every event, isolating failures per event.
    pub async fn dispatch_all(&self, events: Vec<DomainEvent>) -> DispatchReport {
        let groups = group_by_ordering_key(events);

        let results: Vec<Vec<(IdempotencyKey, NotificationOutcome)>> = stream::iter(groups)
            .map(|group| async move {
                let mut outcomes = Vec::with_capacity(group.len());
                for event in &group {
                    outcomes.push((event.idempotency_key(), self.notify(event).await));
                }
                outcomes
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        for (key, outcome) in results.into_iter().flatten() {
            if outcome.is_success() {
                report.delivered += 1;
            } else {
                report.failures.push(FailedNotification { key, outcome });
            }
        }
        report.failures.sort_by(|a, b| a.key.cmp(&b.key));
        report
    }
}

/// Partition events into groups connected through shared ordering keys, keeping input order.
fn group_by_ordering_key(events: Vec<DomainEvent>) -> Vec<Vec<DomainEvent>> {
    let roots: Vec<usize> = {
        let mut parent: Vec<usize> = (0..events.len()).collect();
        let mut owner: HashMap<&str, usize> = HashMap::new();

        for (index, event) in events.iter().enumerate() {
            for key in event.ordering_keys() {
                match owner.get(key) {
                    Some(&other) => union(&mut parent, index, other),
                    None => {
                        owner.insert(key, index);
                    }
                }
            }
        }
        (0..events.len()).map(|i| find(&mut parent, i)).collect()
    };

    let mut groups: BTreeMap<usize, Vec<DomainEvent>> = BTreeMap::new();
    for (event, root) in events.into_iter().zip(roots) {
        groups.entry(root).or_default().push(event);
    }
    groups.into_values().collect()
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        // Lower index becomes the root so groups keep the position of their first event.
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[child] = root;
    }
}

fn describe(event: &DomainEvent) -> String {
    let amount = |a: &u128| format_token_amount(*a, CAMPUS_TOKEN_DECIMALS);
    match &event.payload {
        EventPayload::Transfer {
            from_subject,
            to_subject,
            amount: a,
            ..
        } => format!("{} -> {}: {}", from_subject, to_subject, amount(a)),
        EventPayload::Mint { subject, amount: a } => format!("mint {} to {}", amount(a), subject),
        EventPayload::Burn { subject, amount: a } => format!("burn {} from {}", amount(a), subject),
        EventPayload::WalletLinked {
            subject,
            new_address,
            ..
        } => format!("{} linked to {}", subject, new_address),
        EventPayload::SubjectRegistered { subject, address } => {
            format!("{} registered with {}", subject, address)
        }
    }
}
