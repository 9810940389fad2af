//! Domain events decoded from the ledger's log.
//!
//! Every event carries the hash of the transaction that emitted it. Together with the event kind
//! (and the log index, for transactions emitting the same kind twice) it forms the idempotency key
//! the downstream balance store deduplicates on.

use serde::Serialize;
use std::fmt;

/// Decimal places of the campus credit token.
pub const CAMPUS_TOKEN_DECIMALS: u32 = 18;

/// Kinds of events in the contract's catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
    Transfer,
    Mint,
    Burn,
    WalletLinked,
    SubjectRegistered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transfer => "Transfer",
            EventKind::Mint => "Mint",
            EventKind::Burn => "Burn",
            EventKind::WalletLinked => "WalletLinked",
            EventKind::SubjectRegistered => "SubjectRegistered",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields of a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    Transfer {
        from_subject: String,
        to_subject: String,
        #[serde(serialize_with = "amount_as_string")]
        amount: u128,
        memo: String,
    },
    #[serde(rename_all = "camelCase")]
    Mint {
        subject: String,
        #[serde(serialize_with = "amount_as_string")]
        amount: u128,
    },
    #[serde(rename_all = "camelCase")]
    Burn {
        subject: String,
        #[serde(serialize_with = "amount_as_string")]
        amount: u128,
    },
    #[serde(rename_all = "camelCase")]
    WalletLinked {
        subject: String,
        old_address: String,
        new_address: String,
    },
    #[serde(rename_all = "camelCase")]
    SubjectRegistered { subject: String, address: String },
}

/// A decoded, typed ledger occurrence relevant to balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Transfer { .. } => EventKind::Transfer,
            EventPayload::Mint { .. } => EventKind::Mint,
            EventPayload::Burn { .. } => EventKind::Burn,
            EventPayload::WalletLinked { .. } => EventKind::WalletLinked,
            EventPayload::SubjectRegistered { .. } => EventKind::SubjectRegistered,
        }
    }

    /// Subjects and wallet addresses whose downstream state this event writes.
    ///
    /// Events sharing any key must reach the store in ledger order.
    pub fn ordering_keys(&self) -> Vec<&str> {
        match &self.payload {
            EventPayload::Transfer {
                from_subject,
                to_subject,
                ..
            } => vec![from_subject.as_str(), to_subject.as_str()],
            EventPayload::Mint { subject, .. } | EventPayload::Burn { subject, .. } => {
                vec![subject.as_str()]
            }
            EventPayload::WalletLinked {
                subject,
                old_address,
                new_address,
            } => vec![subject.as_str(), old_address.as_str(), new_address.as_str()],
            EventPayload::SubjectRegistered { subject, address } => {
                vec![subject.as_str(), address.as_str()]
            }
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            transaction_hash: self.transaction_hash.clone(),
            kind: self.kind(),
            log_index: self.log_index,
        }
    }

    /// Position of the event in ledger order.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Deduplication key for downstream writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey {
    pub transaction_hash: String,
    pub kind: EventKind,
    pub log_index: u64,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.transaction_hash, self.kind, self.log_index)
    }
}

// Amounts exceed what JSON consumers can hold as numbers.
fn amount_as_string<S: serde::Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> DomainEvent {
        DomainEvent {
            transaction_hash: "0xabc".to_string(),
            block_number: 2101,
            log_index: 3,
            payload: EventPayload::Transfer {
                from_subject: "A".to_string(),
                to_subject: "B".to_string(),
                amount: 500,
                memo: "coffee".to_string(),
            },
        }
    }

    #[test]
    fn key_includes_kind_and_log_index() {
        let event = transfer();
        assert_eq!(event.idempotency_key().to_string(), "0xabc:Transfer:3");
        assert_eq!(event.ordering_keys(), vec!["A", "B"]);
    }

    #[test]
    fn wallet_events_order_on_addresses_too() {
        let event = DomainEvent {
            transaction_hash: "0xdef".to_string(),
            block_number: 7,
            log_index: 0,
            payload: EventPayload::WalletLinked {
                subject: "A".to_string(),
                old_address: "0xaa".to_string(),
                new_address: "0xbb".to_string(),
            },
        };
        assert_eq!(event.ordering_keys(), vec!["A", "0xaa", "0xbb"]);
    }

    #[test]
    fn serializes_flat_camel_case_payload() {
        let value = serde_json::to_value(transfer()).unwrap();
        assert_eq!(value["transactionHash"], "0xabc");
        assert_eq!(value["blockNumber"], 2101);
        assert_eq!(value["logIndex"], 3);
        assert_eq!(value["kind"], "Transfer");
        assert_eq!(value["fromSubject"], "A");
        assert_eq!(value["toSubject"], "B");
        assert_eq!(value["amount"], "500");
        assert_eq!(value["memo"], "coffee");
    }
}
