//! Event decoding against the contract's static catalogue.
//!
//! Each catalogue entry maps the keccak hash of a Solidity event signature (the log's first
//! topic) to the layout of its indexed topics and ABI data. Decoding is a pure function; logs
//! that match nothing in the catalogue, or do not fit the layout they claim, are skipped with a
//! warning so a contract upgrade that adds events cannot halt the pipeline.

use crate::ledger::RawLogEntry;
use crate::reconcile::sync::events::{DomainEvent, EventKind, EventPayload};

use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const WORD: usize = 32;

/// Event signatures emitted by the campus payment contract.
pub const EVENT_CATALOGUE: &[(EventKind, &str)] = &[
	(EventKind::Transfer, "Transfer(bytes32,bytes32,uint256,string)"),
	(EventKind::Mint, "Mint(bytes32,uint256)"),
	(EventKind::Burn, "Burn(bytes32,uint256)"),
	(EventKind::WalletLinked, "WalletLinked(bytes32,address,address)"),
	(EventKind::SubjectRegistered, "SubjectRegistered(bytes32,address)"),
];

/// Result of decoding one raw log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
	Event(DomainEvent),
	Unrecognized(DecodeSkip),
}

/// Why a log entry was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeSkip {
	#[error("log has no topics")]
	NoTopics,

	#[error("unknown event signature {0}")]
	UnknownSignature(String),

	#[error("log emitted by {0}, not the tracked contract")]
	ForeignEmitter(String),

	#[error("malformed {kind} log: {reason}")]
	Malformed { kind: EventKind, reason: String },
}

/// Keccak topic of an event signature, `0x`-prefixed lowercase hex.
pub fn signature_topic(signature: &str) -> String {
	format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

#[derive(Clone)]
pub struct EventDecoder {
	contract_address: String,
	catalogue: Arc<HashMap<String, EventKind>>,
}

impl EventDecoder {
	pub fn new(contract_address: &str) -> Self {
		let catalogue = EVENT_CATALOGUE
			.iter()
			.map(|(kind, signature)| (signature_topic(signature), *kind))
			.collect();

		Self {
			contract_address: contract_address.to_ascii_lowercase(),
			catalogue: Arc::new(catalogue),
		}
	}

	/// Decode a single raw log entry.
	pub fn decode(&self, entry: &RawLogEntry) -> Decoded {
		if !entry.emitter_address.eq_ignore_ascii_case(&self.contract_address) {
			return Decoded::Unrecognized(DecodeSkip::ForeignEmitter(entry.emitter_address.clone()));
		}

		let Some(signature) = entry.topics.first() else {
			return Decoded::Unrecognized(DecodeSkip::NoTopics);
		};

		let Some(kind) = self.catalogue.get(&signature.to_ascii_lowercase()).copied() else {
			return Decoded::Unrecognized(DecodeSkip::UnknownSignature(signature.clone()));
		};

		match decode_payload(kind, &entry.topics[1..], &entry.data) {
			Ok(payload) => Decoded::Event(DomainEvent {
				transaction_hash: entry.transaction_hash.clone(),
				block_number: entry.block_number,
				log_index: entry.log_index,
				payload,
			}),
			Err(reason) => Decoded::Unrecognized(DecodeSkip::Malformed { kind, reason }),
		}
	}

	/// Decode a batch, dropping (and logging) entries that are not recognized.
	///
	/// Returns the decoded events in ledger order and the number of skipped entries.
	pub fn decode_batch(&self, entries: &[RawLogEntry]) -> (Vec<DomainEvent>, usize) {
		let mut events = Vec::with_capacity(entries.len());
		let mut skipped = 0;

		for entry in entries {
			match self.decode(entry) {
				Decoded::Event(event) => {
					debug!(
						"Decoded {} at block {} (tx {})",
						event.kind(),
						event.block_number,
						event.transaction_hash
					);
					events.push(event);
				}
				Decoded::Unrecognized(skip) => {
					warn!(
						block = entry.block_number,
						tx = %entry.transaction_hash,
						"Skipping log: {}",
						skip
					);
					skipped += 1;
				}
			}
		}

		events.sort_by_key(DomainEvent::position);
		(events, skipped)
	}
}

fn decode_payload(kind: EventKind, topics: &[String], data: &str) -> Result<EventPayload, String> {
	let data = decode_hex(data)?;

	match kind {
		EventKind::Transfer => {
			expect_topics(topics, 2)?;
			Ok(EventPayload::Transfer {
				from_subject: subject_from_word(&topic_word(&topics[0])?),
				to_subject: subject_from_word(&topic_word(&topics[1])?),
				amount: uint_from_word(data_word(&data, 0)?)?,
				memo: dynamic_string(&data, 1)?,
			})
		}
		EventKind::Mint | EventKind::Burn => {
			expect_topics(topics, 1)?;
			let subject = subject_from_word(&topic_word(&topics[0])?);
			let amount = uint_from_word(data_word(&data, 0)?)?;
			Ok(if kind == EventKind::Mint {
				EventPayload::Mint { subject, amount }
			} else {
				EventPayload::Burn { subject, amount }
			})
		}
		EventKind::WalletLinked => {
			expect_topics(topics, 3)?;
			Ok(EventPayload::WalletLinked {
				subject: subject_from_word(&topic_word(&topics[0])?),
				old_address: address_from_word(&topic_word(&topics[1])?)?,
				new_address: address_from_word(&topic_word(&topics[2])?)?,
			})
		}
		EventKind::SubjectRegistered => {
			expect_topics(topics, 2)?;
			Ok(EventPayload::SubjectRegistered {
				subject: subject_from_word(&topic_word(&topics[0])?),
				address: address_from_word(&topic_word(&topics[1])?)?,
			})
		}
	}
}

fn expect_topics(topics: &[String], count: usize) -> Result<(), String> {
	if topics.len() != count {
		return Err(format!("expected {} indexed topics, found {}", count, topics.len()));
	}
	Ok(())
}

fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
	let digits = value.strip_prefix("0x").unwrap_or(value);
	hex::decode(digits).map_err(|e| format!("invalid hex: {}", e))
}

fn topic_word(topic: &str) -> Result<[u8; WORD], String> {
	let bytes = decode_hex(topic)?;
	<[u8; WORD]>::try_from(bytes.as_slice()).map_err(|_| format!("topic is {} bytes", bytes.len()))
}

fn data_word(data: &[u8], index: usize) -> Result<&[u8], String> {
	index
		.checked_mul(WORD)
		.and_then(|start| start.checked_add(WORD).map(|end| (start, end)))
		.and_then(|(start, end)| data.get(start..end))
		.ok_or_else(|| format!("data too short for word {}", index))
}

fn uint_from_word(word: &[u8]) -> Result<u128, String> {
	let (high, low) = word.split_at(WORD - 16);
	if high.iter().any(|b| *b != 0) {
		return Err("uint256 value does not fit in u128".to_string());
	}
	let mut buf = [0u8; 16];
	buf.copy_from_slice(low);
	Ok(u128::from_be_bytes(buf))
}

fn usize_from_word(word: &[u8]) -> Result<usize, String> {
	usize::try_from(uint_from_word(word)?).map_err(|_| "offset out of range".to_string())
}

/// ABI `string` whose head sits at data word `index`.
fn dynamic_string(data: &[u8], index: usize) -> Result<String, String> {
	let offset = usize_from_word(data_word(data, index)?)?;
	if offset % WORD != 0 {
		return Err(format!("unaligned string offset {}", offset));
	}
	let len = usize_from_word(data_word(data, offset / WORD)?)?;
	let bytes = offset
		.checked_add(WORD)
		.and_then(|start| start.checked_add(len).map(|end| (start, end)))
		.and_then(|(start, end)| data.get(start..end))
		.ok_or_else(|| "string extends past data".to_string())?;
	Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn address_from_word(word: &[u8; WORD]) -> Result<String, String> {
	let (padding, address) = word.split_at(WORD - 20);
	if padding.iter().any(|b| *b != 0) {
		return Err("address topic has non-zero padding".to_string());
	}
	Ok(format!("0x{}", hex::encode(address)))
}

/// Subjects are right-padded identifiers; fall back to hex for anything unprintable.
fn subject_from_word(word: &[u8; WORD]) -> String {
	let end = word.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
	let trimmed = &word[..end];
	match std::str::from_utf8(trimmed) {
		Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control()) => text.to_string(),
		_ => format!("0x{}", hex::encode(word)),
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	//! ABI encoders for building raw logs in tests.

	use super::*;

	pub const CONTRACT: &str = "0x00000000000000000000000000000000000c0ffe";

	pub fn subject_topic(subject: &str) -> String {
		let mut word = [0u8; WORD];
		word[..subject.len()].copy_from_slice(subject.as_bytes());
		format!("0x{}", hex::encode(word))
	}

	pub fn address_topic(address: &str) -> String {
		format!("0x{:0>64}", address.trim_start_matches("0x"))
	}

	pub fn uint_word(value: u128) -> String {
		format!("{:064x}", value)
	}

	pub fn log(block: u64, log_index: u64, tx: &str, topics: Vec<String>, data: String) -> RawLogEntry {
		RawLogEntry {
			block_number: block,
			log_index,
			transaction_hash: tx.to_string(),
			emitter_address: CONTRACT.to_string(),
			topics,
			data,
		}
	}

	pub fn transfer_log(block: u64, tx: &str, from: &str, to: &str, amount: u128, memo: &str) -> RawLogEntry {
		let mut memo_bytes = memo.as_bytes().to_vec();
		let padded = memo_bytes.len().div_ceil(WORD) * WORD;
		memo_bytes.resize(padded, 0);
		let data = format!(
			"0x{}{}{}{}",
			uint_word(amount),
			uint_word(0x40),
			uint_word(memo.len() as u128),
			hex::encode(memo_bytes)
		);
		log(
			block,
			0,
			tx,
			vec![
				signature_topic("Transfer(bytes32,bytes32,uint256,string)"),
				subject_topic(from),
				subject_topic(to),
			],
			data,
		)
	}

	pub fn mint_log(block: u64, tx: &str, subject: &str, amount: u128) -> RawLogEntry {
		log(
			block,
			0,
			tx,
			vec![signature_topic("Mint(bytes32,uint256)"), subject_topic(subject)],
			format!("0x{}", uint_word(amount)),
		)
	}

	pub fn burn_log(block: u64, tx: &str, subject: &str, amount: u128) -> RawLogEntry {
		log(
			block,
			0,
			tx,
			vec![signature_topic("Burn(bytes32,uint256)"), subject_topic(subject)],
			format!("0x{}", uint_word(amount)),
		)
	}
}
