//! Slot records: lightweight metadata (`SlotInfo`) and the full world
//! snapshot (`SlotData`).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SlotId;

/// Requested screenshot resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenshotSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ScreenshotSize {
    fn default() -> Self {
        Self::new(640, 360)
    }
}

/// Captured screenshot, raw RGBA8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Metadata of a saved slot.
///
/// Cheap to list: reading a `SlotInfo` never pulls the slot's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: SlotId,
    pub name: String,
    pub played_time: Duration,
    pub save_date: DateTime<Utc>,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub screenshot: Option<Screenshot>,
    pub version: String,
}

impl SlotInfo {
    /// Empty info used when nothing is loaded yet.
    pub fn empty(id: SlotId, version: impl Into<String>) -> Self {
        Self {
            id,
            name: default_slot_name(id),
            played_time: Duration::ZERO,
            save_date: DateTime::<Utc>::UNIX_EPOCH,
            map: String::new(),
            screenshot: None,
            version: version.into(),
        }
    }
}

pub fn default_slot_name(id: SlotId) -> String {
    format!("Slot {}", id.get())
}

/// State of one saved object. The payload is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub name: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub state: serde_json::Value,
}

impl ObjectRecord {
    pub fn new(name: impl Into<String>, class: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            tags: Vec::new(),
            state,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Records captured from a single streamed region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub objects: Vec<ObjectRecord>,
}

/// Full snapshot of mutable world state.
///
/// This is also the intermediate representation handed to workers: the
/// main thread builds it from live objects, workers only encode/decode it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotData {
    pub map: String,
    pub globals: Vec<ObjectRecord>,
    pub regions: BTreeMap<String, RegionRecord>,
}

impl SlotData {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_info_has_default_name() {
        let info = SlotInfo::empty(SlotId::new(4), "1.0");
        assert_eq!(info.name, "Slot 4");
        assert_eq!(info.played_time, Duration::ZERO);
        assert!(info.screenshot.is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SlotData::decode(b"not json").is_err());
    }

    #[test]
    fn untagged_records_omit_tags() {
        let record = ObjectRecord::new("door", "Door", json!({ "open": true }));
        let text = serde_json::to_string(&record).unwrap();
        assert!(!text.contains("tags"));
    }
}
