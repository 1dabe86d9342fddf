//! InMemoryWorld - 開発・テスト用の World 実装
//!
//! region のロード/アンロードや map 移動はホスト側（テストや CLI）が手動で進める。

use std::collections::BTreeMap;
use std::task::Poll;
use std::time::Duration;

use crate::domain::{ObjectRecord, Screenshot, ScreenshotSize};
use crate::ports::World;

#[derive(Debug, Default)]
pub struct InMemoryWorld {
    map: String,
    played_time: Duration,
    globals: BTreeMap<String, ObjectRecord>,
    regions: BTreeMap<String, Vec<ObjectRecord>>,
    map_loading: bool,
    /// Polls left before a requested screenshot is ready.
    screenshot_delay: u32,
    pending_screenshot: Option<(ScreenshotSize, u32)>,
    restored_regions: Vec<String>,
}

impl InMemoryWorld {
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            ..Self::default()
        }
    }

    pub fn set_played_time(&mut self, played: Duration) {
        self.played_time = played;
    }

    pub fn spawn_global(&mut self, record: ObjectRecord) {
        self.globals.insert(record.name.clone(), record);
    }

    pub fn global(&self, name: &str) -> Option<&ObjectRecord> {
        self.globals.get(name)
    }

    pub fn set_global_state(&mut self, name: &str, state: serde_json::Value) -> bool {
        match self.globals.get_mut(name) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    pub fn load_region(&mut self, region: impl Into<String>, objects: Vec<ObjectRecord>) {
        self.regions.insert(region.into(), objects);
    }

    pub fn unload_region(&mut self, region: &str) -> Option<Vec<ObjectRecord>> {
        self.regions.remove(region)
    }

    pub fn region(&self, region: &str) -> Option<&[ObjectRecord]> {
        self.regions.get(region).map(Vec::as_slice)
    }

    pub fn set_region_state(&mut self, region: &str, name: &str, state: serde_json::Value) -> bool {
        let Some(objects) = self.regions.get_mut(region) else {
            return false;
        };
        match objects.iter_mut().find(|o| o.name == name) {
            Some(object) => {
                object.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_screenshot_delay(&mut self, polls: u32) {
        self.screenshot_delay = polls;
    }

    /// Mark the map opened by `open_map` as loaded.
    pub fn finish_map_load(&mut self) {
        self.map_loading = false;
    }

    /// Regions restored by loads, in call order.
    pub fn restored_regions(&self) -> &[String] {
        &self.restored_regions
    }
}

impl World for InMemoryWorld {
    fn map_name(&self) -> String {
        self.map.clone()
    }

    fn played_time(&self) -> Duration {
        self.played_time
    }

    fn begin_screenshot(&mut self, size: ScreenshotSize) {
        self.pending_screenshot = Some((size, self.screenshot_delay));
    }

    fn poll_screenshot(&mut self) -> Poll<Option<Screenshot>> {
        match self.pending_screenshot.take() {
            None => Poll::Ready(None),
            Some((size, 0)) => {
                let len = size.width as usize * size.height as usize * 4;
                Poll::Ready(Some(Screenshot {
                    width: size.width,
                    height: size.height,
                    rgba: vec![0x7f; len],
                }))
            }
            Some((size, left)) => {
                self.pending_screenshot = Some((size, left - 1));
                Poll::Pending
            }
        }
    }

    fn collect_globals(&self) -> Vec<ObjectRecord> {
        self.globals.values().cloned().collect()
    }

    fn loaded_regions(&self) -> Vec<String> {
        self.regions.keys().cloned().collect()
    }

    fn collect_region(&self, region: &str) -> Option<Vec<ObjectRecord>> {
        self.regions.get(region).cloned()
    }

    fn restore_globals(&mut self, records: &[ObjectRecord]) {
        for record in records {
            self.globals.insert(record.name.clone(), record.clone());
        }
    }

    fn restore_region(&mut self, region: &str, records: &[ObjectRecord]) {
        let Some(objects) = self.regions.get_mut(region) else {
            return;
        };
        for record in records {
            match objects.iter_mut().find(|o| o.name == record.name) {
                Some(existing) => *existing = record.clone(),
                None => objects.push(record.clone()),
            }
        }
        self.restored_regions.push(region.to_string());
    }

    fn open_map(&mut self, map: &str) {
        self.map = map.to_string();
        self.regions.clear();
        self.map_loading = true;
    }

    fn is_map_loading(&self) -> bool {
        self.map_loading
    }
}
