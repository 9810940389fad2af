//! Checkpoint store for the reconciliation loop.
//!
//! This module provides the `CheckpointStore`, which owns the single persisted value of the
//! engine: the highest block height whose events have all been delivered downstream. It wraps
//! a `CheckpointRepository` and enforces that the value never moves backwards, and that the
//! in-memory value only changes once the repository confirmed the write.

use crate::reconcile::sync::repositories::{CheckpointError, CheckpointRecord, CheckpointRepository};

use tracing::{error, info};

pub struct CheckpointStore {
    repo: Box<dyn CheckpointRepository>,
    /// Last height confirmed durable by the repository.
    confirmed: Option<u64>,
}

impl CheckpointStore {
    pub fn new(repo: Box<dyn CheckpointRepository>) -> Self {
        Self {
            repo,
            confirmed: None,
        }
    }

    /// Load the persisted height, or 0 on first run.
    pub async fn load(&mut self) -> Result<u64, CheckpointError> {
        let height = match self.repo.load().await? {
            Some(record) => record.height,
            None => {
                info!("No checkpoint found, starting from genesis");
                0
            }
        };
        self.confirmed = Some(height);
        Ok(height)
    }

    /// Persist `height`. Returns only after the write is durable.
    pub async fn save(&mut self, height: u64) -> Result<(), CheckpointError> {
        if let Some(current) = self.confirmed {
            if height < current {
                return Err(CheckpointError::Regression {
                    current,
                    attempted: height,
                });
            }
        }

        if let Err(e) = self.repo.save(&CheckpointRecord::new(height)).await {
            error!("Checkpoint write for height {} failed: {}", height, e);
            return Err(e);
        }

        self.confirmed = Some(height);
        Ok(())
    }

    pub fn confirmed(&self) -> Option<u64> {
        self.confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::sync::repositories::MemoryCheckpointRepository;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_run_loads_zero() {
        let mut store = CheckpointStore::new(Box::new(MemoryCheckpointRepository::new()));
        assert_eq!(store.load().await.unwrap(), 0);
        assert_eq!(store.confirmed(), Some(0));
    }

    #[tokio::test]
    async fn rejects_regression() {
        let mut store = CheckpointStore::new(Box::new(MemoryCheckpointRepository::with_height(2100)));
        assert_eq!(store.load().await.unwrap(), 2100);
        assert!(matches!(
            store.save(1100).await,
            Err(CheckpointError::Regression {
                current: 2100,
                attempted: 1100
            })
        ));
        store.save(2100).await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_does_not_advance() {
        let repo = Arc::new(MemoryCheckpointRepository::with_height(100));
        let mut store = CheckpointStore::new(Box::new(repo.clone()));
        store.load().await.unwrap();

        repo.set_fail_saves(true);
        assert!(store.save(1100).await.is_err());
        assert_eq!(store.confirmed(), Some(100));
        assert_eq!(repo.height(), Some(100));
    }
}
