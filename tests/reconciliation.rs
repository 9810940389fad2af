//! Interrupt and resume tests against the on-disk checkpoint

use campus_ledger_sync::ledger::{ChainReader, LedgerError, RawLogEntry};
use campus_ledger_sync::notify::InMemoryBalanceStore;
use campus_ledger_sync::reconcile::sync::{
    SyncConfig, SyncCoordinator,
    decoder::signature_topic,
    dispatcher::ReconciliationDispatcher,
    events::{EventKind, IdempotencyKey},
    repositories::FileCheckpointRepository,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONTRACT: &str = "0x00000000000000000000000000000000000c0ffe";

struct StaticChain {
    head: u64,
    logs: Vec<RawLogEntry>,
}

#[async_trait::async_trait]
impl ChainReader for StaticChain {
    async fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(self.head)
    }

    async fn logs_in_range(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLogEntry>, LedgerError> {
        Ok(self
            .logs
            .iter()
            .filter(|log| log.emitter_address == address)
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .cloned()
            .collect())
    }
}

fn word(value: u128) -> String {
    format!("{:064x}", value)
}

fn subject(name: &str) -> String {
    format!("0x{}{}", hex::encode(name), "0".repeat(64 - name.len() * 2))
}

fn tx_hash(block: u64) -> String {
    format!("0x{:064x}", block)
}

fn entry(block: u64, topics: Vec<String>, data: String) -> RawLogEntry {
    RawLogEntry {
        block_number: block,
        log_index: 0,
        transaction_hash: tx_hash(block),
        emitter_address: CONTRACT.to_string(),
        topics,
        data,
    }
}

fn mint(block: u64, to: &str, amount: u128) -> RawLogEntry {
    entry(
        block,
        vec![signature_topic("Mint(bytes32,uint256)"), subject(to)],
        format!("0x{}", word(amount)),
    )
}

fn transfer(block: u64, from: &str, to: &str, amount: u128) -> RawLogEntry {
    entry(
        block,
        vec![
            signature_topic("Transfer(bytes32,bytes32,uint256,string)"),
            subject(from),
            subject(to),
        ],
        format!("0x{}{}{}", word(amount), word(0x40), word(0)),
    )
}

fn coordinator(
    chain: &Arc<StaticChain>,
    store: &Arc<InMemoryBalanceStore>,
    checkpoint: &Path,
) -> SyncCoordinator {
    let repository = FileCheckpointRepository::open(checkpoint.to_path_buf()).unwrap();
    SyncCoordinator::new(
        chain.clone(),
        ReconciliationDispatcher::new(store.clone(), 4),
        Box::new(repository),
        SyncConfig {
            contract_address: CONTRACT.to_string(),
            chunk_size: 1000,
            ..SyncConfig::default()
        },
    )
}

fn persisted_height(checkpoint: &Path) -> u64 {
    let content = std::fs::read_to_string(checkpoint).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    value["height"].as_u64().unwrap()
}

#[tokio::test]
async fn failed_chunk_resumes_after_restart() {
    let mut logs: Vec<RawLogEntry> = (1..=6).map(|i| mint(i * 500, "alice", 10)).collect();
    logs.push(transfer(2600, "alice", "bob", 5));
    let chain = Arc::new(StaticChain { head: 3000, logs });

    let store = Arc::new(InMemoryBalanceStore::new());
    store.fail_on(IdempotencyKey {
        transaction_hash: tx_hash(2600),
        kind: EventKind::Transfer,
        log_index: 0,
    });

    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");

    {
        let mut sync = coordinator(&chain, &store, &checkpoint);
        assert_eq!(sync.start().await.unwrap(), 0);
        sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(sync.checkpoint(), Some(2000));
    }
    assert_eq!(persisted_height(&checkpoint), 2000);
    // The mints at 2500 and 3000 share the failed chunk and were delivered anyway.
    assert_eq!(store.balance("alice"), 60);
    assert_eq!(store.balance("bob"), 0);

    store.heal();
    let mut sync = coordinator(&chain, &store, &checkpoint);
    assert_eq!(sync.start().await.unwrap(), 2000);
    sync.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(persisted_height(&checkpoint), 3000);
    assert_eq!(store.balance("alice"), 55);
    assert_eq!(store.balance("bob"), 5);
    assert_eq!(store.record_count(), 7);
}

#[tokio::test]
async fn second_coordinator_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");

    let _first = FileCheckpointRepository::open(checkpoint.clone()).unwrap();
    assert!(FileCheckpointRepository::open(checkpoint).is_err());
}
