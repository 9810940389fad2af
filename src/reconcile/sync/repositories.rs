use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Persisted checkpoint: the highest block height fully reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
	pub height: u64,
	pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
	pub fn new(height: u64) -> Self {
		Self {
			height,
			updated_at: Utc::now(),
		}
	}
}

/// Error types for checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Corrupt checkpoint at {path}: {reason}")]
	Corrupt { path: PathBuf, reason: String },

	#[error("Checkpoint {0} is locked by another process; remove the lock file if it is stale")]
	Locked(PathBuf),

	#[error("Refusing to move checkpoint back from {current} to {attempted}")]
	Regression { current: u64, attempted: u64 },

	#[error("Checkpoint write failed: {0}")]
	WriteFailed(String),
}

/// Repository for checkpoint persistence
#[async_trait::async_trait]
pub trait CheckpointRepository: Send + Sync {
	async fn load(&self) -> Result<Option<CheckpointRecord>, CheckpointError>;
	/// Must not return before the record is durable.
	async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError>;
}

#[async_trait::async_trait]
impl<R: CheckpointRepository + ?Sized> CheckpointRepository for Arc<R> {
	async fn load(&self) -> Result<Option<CheckpointRecord>, CheckpointError> {
		(**self).load().await
	}

	async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
		(**self).save(record).await
	}
}

/// Exclusive lock file held for the lifetime of a file repository.
#[derive(Debug)]
struct LockFile {
	path: PathBuf,
}

impl LockFile {
	fn acquire(path: PathBuf) -> Result<Self, CheckpointError> {
		match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(mut file) => {
				writeln!(file, "{}", std::process::id())?;
				file.sync_all()?;
				Ok(Self { path })
			}
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(CheckpointError::Locked(path)),
			Err(e) => Err(e.into()),
		}
	}
}

impl Drop for LockFile {
	fn drop(&mut self) {
		if let Err(e) = std::fs::remove_file(&self.path) {
			warn!("Failed to remove checkpoint lock {:?}: {}", self.path, e);
		}
	}
}

/// File-based implementation of CheckpointRepository
///
/// The record is written to a sibling temp file, synced, then renamed over the checkpoint, and
/// the directory is synced so the rename itself survives power loss. A crash leaves either the
/// old or the new value on disk.
#[derive(Debug)]
pub struct FileCheckpointRepository {
	path: PathBuf,
	_lock: LockFile,
}

impl FileCheckpointRepository {
	/// Open the checkpoint at `path`, creating its directory and taking the writer lock.
	pub fn open(path: PathBuf) -> Result<Self, CheckpointError> {
		std::fs::create_dir_all(Self::parent_dir(&path))?;
		let lock = LockFile::acquire(Self::sibling(&path, "lock"))?;
		info!("Opened checkpoint store at {:?}", path);
		Ok(Self { path, _lock: lock })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Directory holding `path`; `.` for a bare file name.
	fn parent_dir(path: &Path) -> &Path {
		match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent,
			_ => Path::new("."),
		}
	}

	fn sibling(path: &Path, extension: &str) -> PathBuf {
		let mut name = path.file_name().unwrap_or_default().to_os_string();
		name.push(".");
		name.push(extension);
		path.with_file_name(name)
	}
}

#[async_trait::async_trait]
impl CheckpointRepository for FileCheckpointRepository {
	async fn load(&self) -> Result<Option<CheckpointRecord>, CheckpointError> {
		let content = match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No checkpoint at {:?}", self.path);
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};

		let record: CheckpointRecord =
			serde_json::from_str(&content).map_err(|e| CheckpointError::Corrupt {
				path: self.path.clone(),
				reason: e.to_string(),
			})?;

		info!(
			"Loaded checkpoint {} from {:?} (written {})",
			record.height,
			self.path,
			record.updated_at.to_rfc3339()
		);
		Ok(Some(record))
	}

	async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
		let body = serde_json::to_vec_pretty(record)
			.map_err(|e| CheckpointError::WriteFailed(format!("Failed to serialize checkpoint: {}", e)))?;

		let tmp_path = Self::sibling(&self.path, "tmp");
		let mut file = tokio::fs::File::create(&tmp_path).await?;
		file.write_all(&body).await?;
		file.sync_all().await?;
		drop(file);

		tokio::fs::rename(&tmp_path, &self.path).await?;

		#[cfg(unix)]
		{
			let dir = tokio::fs::File::open(Self::parent_dir(&self.path)).await?;
			dir.sync_all().await?;
		}

		debug!("Saved checkpoint {} to {:?}", record.height, self.path);
		Ok(())
	}
}

/// In-memory implementation of CheckpointRepository
///
/// Keeps every saved height so callers can inspect the write history.
#[derive(Debug, Default)]
pub struct MemoryCheckpointRepository {
	current: Mutex<Option<CheckpointRecord>>,
	history: Mutex<Vec<u64>>,
	fail_saves: AtomicBool,
}

impl MemoryCheckpointRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_height(height: u64) -> Self {
		let repo = Self::default();
		*repo.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(CheckpointRecord::new(height));
		repo
	}

	/// Make subsequent saves fail, as a full disk would.
	pub fn set_fail_saves(&self, fail: bool) {
		self.fail_saves.store(fail, Ordering::SeqCst);
	}

	pub fn history(&self) -> Vec<u64> {
		self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn height(&self) -> Option<u64> {
		self.current
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.map(|record| record.height)
	}
}

#[async_trait::async_trait]
impl CheckpointRepository for MemoryCheckpointRepository {
	async fn load(&self) -> Result<Option<CheckpointRecord>, CheckpointError> {
		Ok(*self.current.lock().unwrap_or_else(|e| e.into_inner()))
	}

	async fn save(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
		if self.fail_saves.load(Ordering::SeqCst) {
			return Err(CheckpointError::WriteFailed("injected save failure".to_string()));
		}
		*self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(*record);
		self.history
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.push(record.height);
		Ok(())
	}
}
