//! SavePreset - manager の設定
//!
//! JSON ファイルから読み込む。ファイルが無ければデフォルト値を使う。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{SaveFilter, ScreenshotSize, SlotId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read preset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid preset json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read-only settings consulted by the manager and its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavePreset {
    /// Number of usable slots. `<= 0` means unbounded.
    pub max_slots: i32,
    pub screenshot: ScreenshotSize,
    pub filter: SaveFilter,
    pub worker_threads: usize,
    pub shutdown_timeout_ms: u64,
    pub slots_dir: PathBuf,
    /// Version tag written into every saved `SlotInfo`.
    pub version: String,
    /// Open the slot's map before applying it when the world is elsewhere.
    pub travel_on_load: bool,
}

impl Default for SavePreset {
    fn default() -> Self {
        Self {
            max_slots: 0,
            screenshot: ScreenshotSize::default(),
            filter: SaveFilter::default(),
            worker_threads: 2,
            shutdown_timeout_ms: 5_000,
            slots_dir: PathBuf::from("saves"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            travel_on_load: true,
        }
    }
}

/// Slot ids a preset accepts: `0..max_slots`, or every non-negative id
/// when `max_slots <= 0`. `Copy` so worker futures can carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    max_slots: i32,
}

impl SlotRange {
    pub fn contains(self, id: SlotId) -> bool {
        let id = id.get();
        id >= 0 && (self.max_slots <= 0 || id < self.max_slots)
    }
}

impl SavePreset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn is_valid_slot(&self, id: SlotId) -> bool {
        self.slot_range().contains(id)
    }

    pub fn slot_range(&self) -> SlotRange {
        SlotRange {
            max_slots: self.max_slots,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
