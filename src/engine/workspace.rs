//! In-memory workspace of named byte buffers
//!
//! The engine reads its input from, and writes its output to, named slots in
//! this arena. A [`ScratchSlot`] claims one path for the duration of a job and
//! removes it again when dropped, whichever way the job ends.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Workspace slot errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("workspace slot already in use: {0}")]
    SlotOccupied(String),

    #[error("workspace slot not found: {0}")]
    SlotMissing(String),
}

/// Arena of named buffers private to one engine instance
#[derive(Debug, Default)]
pub struct Workspace {
    files: DashMap<String, Bytes>,
    next_job: AtomicU64,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `path`, replacing any previous contents.
    pub fn write_file(&self, path: &str, data: Bytes) {
        self.files.insert(path.to_string(), data);
    }

    pub fn read_file(&self, path: &str) -> Result<Bytes, WorkspaceError> {
        self.files
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkspaceError::SlotMissing(path.to_string()))
    }

    /// Remove `path`, returning its contents if it existed.
    pub fn remove(&self, path: &str) -> Option<Bytes> {
        self.files.remove(path).map(|(_, data)| data)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sequence number used to name the slots of the next job
    pub fn next_job_id(&self) -> u64 {
        self.next_job.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim `path` for the lifetime of the returned guard.
    ///
    /// The slot starts out empty; it exists in the arena only once written.
    pub fn claim(&self, path: impl Into<String>) -> Result<ScratchSlot<'_>, WorkspaceError> {
        let path = path.into();
        if self.contains(&path) {
            return Err(WorkspaceError::SlotOccupied(path));
        }
        Ok(ScratchSlot {
            workspace: self,
            path,
            written: false,
        })
    }
}

/// A claimed workspace path, released on drop
#[derive(Debug)]
pub struct ScratchSlot<'a> {
    workspace: &'a Workspace,
    path: String,
    written: bool,
}

impl ScratchSlot<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn write(&mut self, data: Bytes) {
        self.workspace.write_file(&self.path, data);
        self.written = true;
    }

    pub fn read(&self) -> Result<Bytes, WorkspaceError> {
        self.workspace.read_file(&self.path)
    }
}

impl Drop for ScratchSlot<'_> {
    fn drop(&mut self) {
        match self.workspace.remove(&self.path) {
            Some(data) => {
                tracing::debug!(path = %self.path, bytes = data.len(), "Released workspace slot");
            }
            None if self.written => {
                tracing::warn!(
                    path = %self.path,
                    "Workspace slot vanished before release"
                );
            }
            None => {}
        }
    }
}
