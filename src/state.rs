//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The shared codec engine handle
//! - The batch lock (one batch in flight at a time)
//! - The most recent archive and batch progress
//! - Server configuration

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::batch::BatchProgress;
use crate::config::ServerConfig;
use crate::engine::{EngineHandle, EngineLoader};

/// The archive produced by the last successful upload
#[derive(Debug, Clone)]
pub struct StoredArchive {
    pub data: Bytes,
    pub processed: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
}

impl StoredArchive {
    pub fn new(data: Bytes, processed: usize, failed: usize) -> Self {
        Self {
            data,
            processed,
            failed,
            created_at: Utc::now(),
        }
    }

    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

pub struct AppState {
    /// Codec engine, loaded on the first batch
    pub engine: EngineHandle,

    /// Serialises batches against the shared engine workspace
    pub batch_lock: tokio::sync::Mutex<()>,

    last_archive: RwLock<Option<StoredArchive>>,

    progress: RwLock<BatchProgress>,

    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_engine(config, EngineHandle::ffmpeg())
    }

    /// State backed by a custom engine loader
    pub fn with_loader(config: ServerConfig, loader: Arc<dyn EngineLoader>) -> Self {
        Self::with_engine(config, EngineHandle::new(loader))
    }

    fn with_engine(config: ServerConfig, engine: EngineHandle) -> Self {
        Self {
            engine,
            batch_lock: tokio::sync::Mutex::new(()),
            last_archive: RwLock::new(None),
            progress: RwLock::new(BatchProgress::default()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn store_archive(&self, archive: StoredArchive) {
        tracing::debug!(
            bytes = archive.data.len(),
            processed = archive.processed,
            "Stored archive for download"
        );
        *self.last_archive.write() = Some(archive);
    }

    /// Drop the stored archive, returning it if there was one
    pub fn clear_archive(&self) -> Option<StoredArchive> {
        self.last_archive.write().take()
    }

    pub fn last_archive(&self) -> Option<StoredArchive> {
        self.last_archive.read().clone()
    }

    pub fn set_progress(&self, progress: BatchProgress) {
        *self.progress.write() = progress;
    }

    pub fn progress(&self) -> BatchProgress {
        *self.progress.read()
    }
}
