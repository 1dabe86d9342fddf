//! StreamingCoordinator - region の load/unload と実行中タスクの橋渡し
//!
//! ホストの World は region の出入りをイベントとして manager に伝える。
//! Save/Load タスクが走っていれば、そのタスクの region hook を
//! イベントの処理中に同期的に呼ぶ：
//! - unload 直前: Save がまだ capture 中なら region を今 serialize する
//! - ready 直後: Load が data を持っていれば region を今復元する
//!
//! タスクが無ければ何もしない（tracking だけ更新する）。
//!
//! `tracked()` と `hooks_dispatched()` は診断用で、dispatch はこれらを参照しない。
//! 一度も `region_ready` を通っていない region（manager より先に load 済みのもの）
//! の unloading も実行中タスクに渡る。

use std::collections::BTreeSet;

use tracing::debug;

use super::task::SlotTask;
use crate::domain::TaskKind;
use crate::ports::World;

/// Region bookkeeping for diagnostics plus hook dispatch to the running task.
#[derive(Debug, Default)]
pub struct StreamingCoordinator {
    tracked: BTreeSet<String>,
    hooks_dispatched: u64,
}

impl StreamingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, region: &str) {
        self.tracked.insert(region.to_string());
    }

    pub fn untrack(&mut self, region: &str) {
        self.tracked.remove(region);
    }

    pub fn is_tracked(&self, region: &str) -> bool {
        self.tracked.contains(region)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(String::as_str)
    }

    /// Number of region hooks that were handled by a task.
    pub fn hooks_dispatched(&self) -> u64 {
        self.hooks_dispatched
    }

    /// A region finished loading. Returns whether a task restored it.
    pub(crate) fn region_ready(
        &mut self,
        region: &str,
        tasks: &mut [SlotTask],
        world: &mut dyn World,
    ) -> bool {
        self.track(region);
        let handled = match streaming_task(tasks) {
            Some(task) => task.on_region_ready(world, region),
            None => false,
        };
        self.record(region, "ready", handled);
        handled
    }

    /// A region is about to unload. Returns whether a task serialized it.
    ///
    /// The hook runs before the region is untracked, so the caller may
    /// unload it as soon as this returns.
    pub(crate) fn region_unloading(
        &mut self,
        region: &str,
        tasks: &mut [SlotTask],
        world: &mut dyn World,
    ) -> bool {
        let handled = match streaming_task(tasks) {
            Some(task) => task.on_region_unloading(world, region),
            None => false,
        };
        self.record(region, "unloading", handled);
        self.untrack(region);
        handled
    }

    fn record(&mut self, region: &str, event: &'static str, handled: bool) {
        if handled {
            self.hooks_dispatched += 1;
            debug!(region, event, "region hook dispatched");
        }
    }
}

/// Save と Load は排他なので、非終端のものは高々 1 つ
fn streaming_task(tasks: &mut [SlotTask]) -> Option<&mut SlotTask> {
    tasks.iter_mut().find(|t| {
        matches!(t.kind(), TaskKind::Save | TaskKind::Load) && !t.state().is_terminal()
    })
}
