//! Errors - エラー型と分類
//!
//! - `SlotError`: manager の公開 API が返すエラー（事前条件 + タスク失敗）
//! - `StoreError`: `SlotStore` 実装が返す I/O レベルのエラー

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::ids::SlotId;
use super::state::TaskKind;

/// Why a request collided with existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Slot already exists on disk and overwriting was not allowed.
    Overwrite(SlotId),
    /// A running task holds an overlapping resource.
    Busy { running: TaskKind },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Overwrite(id) => write!(f, "{id} already exists and overwrite is disabled"),
            Conflict::Busy { running } => write!(f, "a {running} task is already running"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("invalid slot id: {0}")]
    InvalidSlotId(SlotId),

    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("slot conflict: {0}")]
    SlotConflict(Conflict),

    #[error("store error: {0}")]
    Io(#[source] StoreError),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The worker dropped its completion without reporting.
    #[error("background work was abandoned")]
    WorkerLost,

    #[error("task cancelled")]
    Cancelled,

    #[error("no slot is loaded")]
    NoActiveSlot,

    /// The manager has been deinitialized.
    #[error("save manager is not running")]
    NotRunning,
}

impl SlotError {
    /// Rejected before any task existed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SlotError::InvalidSlotId(_)
                | SlotError::SlotNotFound(_)
                | SlotError::SlotConflict(_)
                | SlotError::NoActiveSlot
                | SlotError::NotRunning
        )
    }
}

impl From<StoreError> for SlotError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SlotError::SlotNotFound(id),
            other => SlotError::Io(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such slot: {0}")]
    NotFound(SlotId),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed slot record: {0}")]
    Format(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
