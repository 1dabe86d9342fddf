//! World port - ライブなシミュレーション
//!
//! World はメインスレッド専用。worker には渡さない（`Send` を要求しない）。

use std::task::Poll;
use std::time::Duration;

use crate::domain::{ObjectRecord, Screenshot, ScreenshotSize};

/// Live world as seen by save and load tasks.
///
/// Region names identify streamed sub-levels. Objects outside any region are
/// "globals".
pub trait World {
    fn map_name(&self) -> String;

    fn played_time(&self) -> Duration;

    /// Start capturing a screenshot. Completion is observed via `poll_screenshot`.
    fn begin_screenshot(&mut self, _size: ScreenshotSize) {}

    /// `Ready(None)` means no screenshot could be taken.
    fn poll_screenshot(&mut self) -> Poll<Option<Screenshot>> {
        Poll::Ready(None)
    }

    fn collect_globals(&self) -> Vec<ObjectRecord>;

    fn loaded_regions(&self) -> Vec<String>;

    /// `None` when the region is not loaded.
    fn collect_region(&self, region: &str) -> Option<Vec<ObjectRecord>>;

    fn restore_globals(&mut self, records: &[ObjectRecord]);

    fn restore_region(&mut self, region: &str, records: &[ObjectRecord]);

    /// Begin opening another map. Regions of the new map announce themselves
    /// through the manager's region hooks while it loads.
    fn open_map(&mut self, _map: &str) {}

    fn is_map_loading(&self) -> bool {
        false
    }
}
