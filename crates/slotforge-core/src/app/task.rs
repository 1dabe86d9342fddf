//! SlotTask - save/load/list/delete の状態機械
//!
//! 1 つの `SlotTask` が種類ごとの `TaskOp`（tagged variant）を包み、
//! manager から毎 tick `advance()` で進められる。
//!
//! # フェーズ
//! - Save: Start -> Capture（metadata + screenshot）-> Writing（worker: encode + write）
//! - Load: Start -> ReadingInfo（worker）-> ReadingData（worker: read + decode）
//!   -> Travelling（map 移動待ち、任意）-> 適用（main thread）
//! - LoadInfos / DeleteAll: Start -> worker -> 完了
//!
//! main thread 側のフェーズは tick 内で同期的に終わらせ、worker に渡したら
//! 即座に戻る。tick がブロックすることはない。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::task::Poll;

use tracing::{debug, warn};

use super::snapshot;
use super::worker_pool::{WorkHandle, WorkPoll, WorkerPool};
use crate::domain::{
    RegionRecord, SaveFilter, ScreenshotSize, SlotData, SlotError, SlotId, SlotInfo, StoreError,
    TaskId, TaskKind, TaskState, default_slot_name,
};
use crate::ports::{Clock, SlotStore, World};
use crate::preset::{SavePreset, SlotRange};

pub type InfoCallback = Box<dyn FnOnce(Result<SlotInfo, SlotError>)>;
pub type InfosCallback = Box<dyn FnOnce(Result<Vec<SlotInfo>, SlotError>)>;
pub type DeleteCallback = Box<dyn FnOnce(Result<Vec<SlotId>, SlotError>)>;

/// Everything a task may touch while it advances.
pub(crate) struct TaskContext<'a> {
    pub world: &'a mut dyn World,
    pub pool: &'a WorkerPool,
    pub store: &'a Arc<dyn SlotStore>,
    pub clock: &'a dyn Clock,
    pub preset: &'a SavePreset,
}

/// Terminal result of a task, carrying its callback back to the manager.
pub(crate) enum Completion {
    Save {
        result: Result<(SlotInfo, SlotData), SlotError>,
        on_done: Option<InfoCallback>,
    },
    Load {
        result: Result<(SlotInfo, SlotData), SlotError>,
        on_done: Option<InfoCallback>,
    },
    Infos {
        result: Result<Vec<SlotInfo>, SlotError>,
        on_done: Option<InfosCallback>,
    },
    DeleteAll {
        result: Result<Vec<SlotId>, SlotError>,
        on_done: Option<DeleteCallback>,
    },
}

impl Completion {
    pub fn is_success(&self) -> bool {
        match self {
            Completion::Save { result, .. } | Completion::Load { result, .. } => result.is_ok(),
            Completion::Infos { result, .. } => result.is_ok(),
            Completion::DeleteAll { result, .. } => result.is_ok(),
        }
    }

    pub fn error(&self) -> Option<&SlotError> {
        match self {
            Completion::Save { result, .. } | Completion::Load { result, .. } => result.as_ref().err(),
            Completion::Infos { result, .. } => result.as_ref().err(),
            Completion::DeleteAll { result, .. } => result.as_ref().err(),
        }
    }
}

/// A stateful unit of work owned by the manager's roster.
pub struct SlotTask {
    id: TaskId,
    state: TaskState,
    filter: SaveFilter,
    op: TaskOp,
}

enum TaskOp {
    Save(SaveOp),
    Load(LoadOp),
    Infos(InfosOp),
    DeleteAll(DeleteAllOp),
}

impl SlotTask {
    pub(crate) fn save(
        id: TaskId,
        filter: SaveFilter,
        slot: SlotId,
        name: String,
        screenshot: Option<ScreenshotSize>,
        on_done: InfoCallback,
    ) -> Self {
        Self::new(
            id,
            filter,
            TaskOp::Save(SaveOp {
                slot,
                name,
                screenshot,
                phase: SavePhase::Start,
                unloaded: BTreeMap::new(),
                on_done: Some(on_done),
            }),
        )
    }

    pub(crate) fn load(id: TaskId, filter: SaveFilter, slot: SlotId, on_done: InfoCallback) -> Self {
        Self::new(
            id,
            filter,
            TaskOp::Load(LoadOp {
                slot,
                phase: LoadPhase::Start,
                on_done: Some(on_done),
            }),
        )
    }

    pub(crate) fn load_infos(
        id: TaskId,
        filter: SaveFilter,
        target: Option<SlotId>,
        sort_by_recent: bool,
        on_done: InfosCallback,
    ) -> Self {
        Self::new(
            id,
            filter,
            TaskOp::Infos(InfosOp {
                target,
                sort_by_recent,
                phase: WorkPhase::Start,
                on_done: Some(on_done),
            }),
        )
    }

    pub(crate) fn delete_all(id: TaskId, filter: SaveFilter, on_done: DeleteCallback) -> Self {
        Self::new(
            id,
            filter,
            TaskOp::DeleteAll(DeleteAllOp {
                phase: WorkPhase::Start,
                on_done: Some(on_done),
            }),
        )
    }

    fn new(id: TaskId, filter: SaveFilter, op: TaskOp) -> Self {
        Self {
            id,
            state: TaskState::Created,
            filter,
            op,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn filter(&self) -> &SaveFilter {
        &self.filter
    }

    pub fn kind(&self) -> TaskKind {
        match &self.op {
            TaskOp::Save(_) => TaskKind::Save,
            TaskOp::Load(_) => TaskKind::Load,
            TaskOp::Infos(_) => TaskKind::LoadInfos,
            TaskOp::DeleteAll(_) => TaskKind::DeleteAll,
        }
    }

    /// Slot written or read by a save/load task.
    pub fn target_slot(&self) -> Option<SlotId> {
        match &self.op {
            TaskOp::Save(op) => Some(op.slot),
            TaskOp::Load(op) => Some(op.slot),
            TaskOp::Infos(op) => op.target,
            TaskOp::DeleteAll(_) => None,
        }
    }

    /// Human-readable current phase, for logs.
    pub fn phase(&self) -> &'static str {
        match &self.op {
            TaskOp::Save(op) => op.phase.name(),
            TaskOp::Load(op) => op.phase.name(),
            TaskOp::Infos(op) => op.phase.name(),
            TaskOp::DeleteAll(op) => op.phase.name(),
        }
    }

    /// Created -> Running.
    pub(crate) fn start(&mut self) {
        if self.state == TaskState::Created {
            self.state = TaskState::Running;
        }
    }

    /// Advance by one tick. Returns the completion exactly once.
    pub(crate) fn advance(&mut self, ctx: &mut TaskContext<'_>) -> Option<Completion> {
        if self.state != TaskState::Running {
            return None;
        }
        let before = self.phase();
        let completion = match &mut self.op {
            TaskOp::Save(op) => op.advance(ctx, &self.filter),
            TaskOp::Load(op) => op.advance(ctx, &self.filter),
            TaskOp::Infos(op) => op.advance(ctx),
            TaskOp::DeleteAll(op) => op.advance(ctx),
        };
        let after = self.phase();
        if before != after {
            debug!(task = %self.id, kind = %self.kind(), from = before, to = after, "task phase changed");
        }
        if let Some(completion) = &completion {
            self.state = if completion.is_success() {
                TaskState::Succeeded
            } else {
                TaskState::Failed
            };
        }
        completion
    }

    /// Teardown: move to Cancelled and hand back the callback.
    pub(crate) fn cancel(&mut self) -> Completion {
        self.state = TaskState::Cancelled;
        match &mut self.op {
            TaskOp::Save(op) => {
                op.phase = SavePhase::Done;
                op.complete(Err(SlotError::Cancelled))
            }
            TaskOp::Load(op) => {
                op.phase = LoadPhase::Done;
                op.complete(Err(SlotError::Cancelled))
            }
            TaskOp::Infos(op) => {
                op.phase = WorkPhase::Done;
                op.complete(Err(SlotError::Cancelled))
            }
            TaskOp::DeleteAll(op) => {
                op.phase = WorkPhase::Done;
                op.complete(Err(SlotError::Cancelled))
            }
        }
    }

    /// A region finished loading. Returns whether this task handled it.
    pub(crate) fn on_region_ready(&mut self, world: &mut dyn World, region: &str) -> bool {
        match &mut self.op {
            TaskOp::Load(op) => op.on_region_ready(world, region, &self.filter),
            _ => false,
        }
    }

    /// A region is about to unload. Returns whether this task handled it.
    pub(crate) fn on_region_unloading(&mut self, world: &mut dyn World, region: &str) -> bool {
        match &mut self.op {
            TaskOp::Save(op) => op.on_region_unloading(world, region, &self.filter),
            _ => false,
        }
    }
}

// ============================================================================
// Save
// ============================================================================

struct SaveOp {
    slot: SlotId,
    name: String,
    screenshot: Option<ScreenshotSize>,
    phase: SavePhase,
    /// Regions serialized by the streaming hook before the world snapshot.
    unloaded: BTreeMap<String, RegionRecord>,
    on_done: Option<InfoCallback>,
}

enum SavePhase {
    Start,
    Capture(SlotInfo),
    Writing(WorkHandle<Result<(SlotInfo, SlotData), SlotError>>),
    Done,
}

impl SavePhase {
    fn name(&self) -> &'static str {
        match self {
            SavePhase::Start => "start",
            SavePhase::Capture(_) => "capture",
            SavePhase::Writing(_) => "writing",
            SavePhase::Done => "done",
        }
    }
}

impl SaveOp {
    fn advance(&mut self, ctx: &mut TaskContext<'_>, filter: &SaveFilter) -> Option<Completion> {
        loop {
            match std::mem::replace(&mut self.phase, SavePhase::Done) {
                SavePhase::Start => {
                    let info = SlotInfo {
                        id: self.slot,
                        name: self.name.clone(),
                        played_time: ctx.world.played_time(),
                        save_date: ctx.clock.now(),
                        map: ctx.world.map_name(),
                        screenshot: None,
                        version: ctx.preset.version.clone(),
                    };
                    if let Some(size) = self.screenshot {
                        ctx.world.begin_screenshot(size);
                    }
                    self.phase = SavePhase::Capture(info);
                }
                SavePhase::Capture(mut info) => {
                    if self.screenshot.is_some() {
                        match ctx.world.poll_screenshot() {
                            Poll::Pending => {
                                self.phase = SavePhase::Capture(info);
                                return None;
                            }
                            Poll::Ready(shot) => info.screenshot = shot,
                        }
                    }
                    let mut data = snapshot::capture(&*ctx.world, filter);
                    for (region, record) in std::mem::take(&mut self.unloaded) {
                        data.regions.entry(region).or_insert(record);
                    }
                    let store = Arc::clone(ctx.store);
                    let handle = ctx.pool.submit("write_slot", write_slot(store, info, data));
                    self.phase = SavePhase::Writing(handle);
                    return None;
                }
                SavePhase::Writing(mut handle) => {
                    return match handle.poll() {
                        WorkPoll::Pending => {
                            self.phase = SavePhase::Writing(handle);
                            None
                        }
                        WorkPoll::Ready(result) => Some(self.complete(result)),
                        WorkPoll::Lost => Some(self.complete(Err(SlotError::WorkerLost))),
                    };
                }
                SavePhase::Done => return None,
            }
        }
    }

    fn on_region_unloading(&mut self, world: &mut dyn World, region: &str, filter: &SaveFilter) -> bool {
        // Writing 以降は snapshot 済みなので何もしない
        if !matches!(self.phase, SavePhase::Start | SavePhase::Capture(_)) {
            return false;
        }
        match snapshot::capture_region(&*world, region, filter) {
            Some(record) => {
                self.unloaded.insert(region.to_string(), record);
                true
            }
            None => false,
        }
    }

    fn complete(&mut self, result: Result<(SlotInfo, SlotData), SlotError>) -> Completion {
        Completion::Save {
            result,
            on_done: self.on_done.take(),
        }
    }
}

/// Worker side of a save: encode, then commit info and payload together.
async fn write_slot(
    store: Arc<dyn SlotStore>,
    info: SlotInfo,
    data: SlotData,
) -> Result<(SlotInfo, SlotData), SlotError> {
    let bytes = data.encode().map_err(StoreError::from)?;
    store.write_slot(&info, &bytes).await?;
    Ok((info, data))
}

// ============================================================================
// Load
// ============================================================================

struct LoadOp {
    slot: SlotId,
    phase: LoadPhase,
    on_done: Option<InfoCallback>,
}

enum LoadPhase {
    Start,
    ReadingInfo(WorkHandle<Result<SlotInfo, SlotError>>),
    ReadingData {
        info: SlotInfo,
        handle: WorkHandle<Result<SlotData, SlotError>>,
    },
    Travelling {
        info: SlotInfo,
        data: SlotData,
        restored: BTreeSet<String>,
    },
    Done,
}

impl LoadPhase {
    fn name(&self) -> &'static str {
        match self {
            LoadPhase::Start => "start",
            LoadPhase::ReadingInfo(_) => "reading_info",
            LoadPhase::ReadingData { .. } => "reading_data",
            LoadPhase::Travelling { .. } => "travelling",
            LoadPhase::Done => "done",
        }
    }
}

impl LoadOp {
    fn advance(&mut self, ctx: &mut TaskContext<'_>, filter: &SaveFilter) -> Option<Completion> {
        loop {
            match std::mem::replace(&mut self.phase, LoadPhase::Done) {
                LoadPhase::Start => {
                    let store = Arc::clone(ctx.store);
                    let slot = self.slot;
                    let handle = ctx.pool.submit("read_info", async move {
                        store.read_info(slot).await.map_err(SlotError::from)
                    });
                    self.phase = LoadPhase::ReadingInfo(handle);
                    return None;
                }
                LoadPhase::ReadingInfo(mut handle) => match handle.poll() {
                    WorkPoll::Pending => {
                        self.phase = LoadPhase::ReadingInfo(handle);
                        return None;
                    }
                    WorkPoll::Ready(Ok(info)) => {
                        let store = Arc::clone(ctx.store);
                        let handle = ctx.pool.submit("read_data", read_data(store, info.id));
                        self.phase = LoadPhase::ReadingData { info, handle };
                        return None;
                    }
                    WorkPoll::Ready(Err(err)) => return Some(self.complete(Err(err))),
                    WorkPoll::Lost => return Some(self.complete(Err(SlotError::WorkerLost))),
                },
                LoadPhase::ReadingData { info, mut handle } => match handle.poll() {
                    WorkPoll::Pending => {
                        self.phase = LoadPhase::ReadingData { info, handle };
                        return None;
                    }
                    WorkPoll::Ready(Ok(data)) => {
                        let travel = ctx.preset.travel_on_load
                            && !data.map.is_empty()
                            && data.map != ctx.world.map_name();
                        if travel {
                            debug!(slot = %self.slot, map = %data.map, "opening saved map before applying");
                            ctx.world.open_map(&data.map);
                        }
                        self.phase = LoadPhase::Travelling {
                            info,
                            data,
                            restored: BTreeSet::new(),
                        };
                    }
                    WorkPoll::Ready(Err(err)) => return Some(self.complete(Err(err))),
                    WorkPoll::Lost => return Some(self.complete(Err(SlotError::WorkerLost))),
                },
                LoadPhase::Travelling {
                    info,
                    data,
                    restored,
                } => {
                    if ctx.world.is_map_loading() {
                        self.phase = LoadPhase::Travelling {
                            info,
                            data,
                            restored,
                        };
                        return None;
                    }
                    let skip: Vec<String> = restored.into_iter().collect();
                    snapshot::apply(ctx.world, &data, filter, &skip);
                    return Some(self.complete(Ok((info, data))));
                }
                LoadPhase::Done => return None,
            }
        }
    }

    fn on_region_ready(&mut self, world: &mut dyn World, region: &str, filter: &SaveFilter) -> bool {
        // data が手元に無いフェーズでは、最後の適用でまとめて復元される
        let LoadPhase::Travelling { data, restored, .. } = &mut self.phase else {
            return false;
        };
        if snapshot::apply_region(world, data, region, filter) {
            restored.insert(region.to_string());
            true
        } else {
            false
        }
    }

    fn complete(&mut self, result: Result<(SlotInfo, SlotData), SlotError>) -> Completion {
        Completion::Load {
            result,
            on_done: self.on_done.take(),
        }
    }
}

async fn read_data(store: Arc<dyn SlotStore>, id: SlotId) -> Result<SlotData, SlotError> {
    let bytes = store.read_data(id).await?;
    Ok(SlotData::decode(&bytes)?)
}

// ============================================================================
// LoadInfos / DeleteAll
// ============================================================================

enum WorkPhase<T> {
    Start,
    Working(WorkHandle<T>),
    Done,
}

impl<T> WorkPhase<T> {
    fn name(&self) -> &'static str {
        match self {
            WorkPhase::Start => "start",
            WorkPhase::Working(_) => "working",
            WorkPhase::Done => "done",
        }
    }

    /// Submit on the first call, then poll. `Some` once the work reported.
    fn drive<F>(&mut self, pool: &WorkerPool, label: &'static str, start: impl FnOnce() -> F) -> Option<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
        T: From<SlotError>,
    {
        if matches!(self, WorkPhase::Start) {
            *self = WorkPhase::Working(pool.submit(label, start()));
            return None;
        }
        let WorkPhase::Working(handle) = self else {
            return None;
        };
        match handle.poll() {
            WorkPoll::Pending => None,
            WorkPoll::Ready(value) => {
                *self = WorkPhase::Done;
                Some(value)
            }
            WorkPoll::Lost => {
                *self = WorkPhase::Done;
                Some(T::from(SlotError::WorkerLost))
            }
        }
    }
}

struct InfosOp {
    target: Option<SlotId>,
    sort_by_recent: bool,
    phase: WorkPhase<InfosResult>,
    on_done: Option<InfosCallback>,
}

/// Wrapper so `WorkPhase::drive` can turn a lost worker into a result.
struct InfosResult(Result<Vec<SlotInfo>, SlotError>);

impl From<SlotError> for InfosResult {
    fn from(err: SlotError) -> Self {
        Self(Err(err))
    }
}

impl InfosOp {
    fn advance(&mut self, ctx: &mut TaskContext<'_>) -> Option<Completion> {
        let store = Arc::clone(ctx.store);
        let (target, sort) = (self.target, self.sort_by_recent);
        let range = ctx.preset.slot_range();
        let InfosResult(result) = self.phase.drive(ctx.pool, "read_infos", move || async move {
            InfosResult(read_infos(store, range, target, sort).await)
        })?;
        Some(self.complete(result))
    }

    fn complete(&mut self, result: Result<Vec<SlotInfo>, SlotError>) -> Completion {
        Completion::Infos {
            result,
            on_done: self.on_done.take(),
        }
    }
}

/// Read the infos of `target`, or of every stored slot.
///
/// When listing everything, ids outside `range` and unreadable slots are
/// skipped, and the result is in id order, or newest save first with
/// `sort_by_recent`.
pub(crate) async fn read_infos(
    store: Arc<dyn SlotStore>,
    range: SlotRange,
    target: Option<SlotId>,
    sort_by_recent: bool,
) -> Result<Vec<SlotInfo>, SlotError> {
    if let Some(id) = target {
        return Ok(vec![store.read_info(id).await?]);
    }
    let ids = store.list_ids().await?;
    let mut infos = Vec::with_capacity(ids.len());
    for id in ids {
        if !range.contains(id) {
            warn!(slot = %id, "skipping slot outside the preset range");
            continue;
        }
        match store.read_info(id).await {
            Ok(info) => infos.push(info),
            Err(err) => warn!(slot = %id, error = %err, "skipping unreadable slot info"),
        }
    }
    if sort_by_recent {
        // stable sort: 同時刻なら id 順のまま
        infos.sort_by(|a, b| b.save_date.cmp(&a.save_date));
    }
    Ok(infos)
}

struct DeleteAllOp {
    phase: WorkPhase<DeleteResult>,
    on_done: Option<DeleteCallback>,
}

struct DeleteResult(Result<Vec<SlotId>, SlotError>);

impl From<SlotError> for DeleteResult {
    fn from(err: SlotError) -> Self {
        Self(Err(err))
    }
}

impl DeleteAllOp {
    fn advance(&mut self, ctx: &mut TaskContext<'_>) -> Option<Completion> {
        let store = Arc::clone(ctx.store);
        let DeleteResult(result) = self.phase.drive(ctx.pool, "delete_all", move || async move {
            DeleteResult(delete_all(store).await)
        })?;
        Some(self.complete(result))
    }

    fn complete(&mut self, result: Result<Vec<SlotId>, SlotError>) -> Completion {
        Completion::DeleteAll {
            result,
            on_done: self.on_done.take(),
        }
    }
}

async fn delete_all(store: Arc<dyn SlotStore>) -> Result<Vec<SlotId>, SlotError> {
    let ids = store.list_ids().await?;
    let mut deleted = Vec::with_capacity(ids.len());
    for id in ids {
        match store.delete(id).await {
            Ok(()) => deleted.push(id),
            // 列挙と削除の間に消えていた
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(deleted)
}

/// Name for a newly saved slot, keeping the previous name when overwriting
/// the active slot.
pub(crate) fn save_name(slot: SlotId, active: Option<&SlotInfo>) -> String {
    match active {
        Some(info) if info.id == slot => info.name.clone(),
        _ => default_slot_name(slot),
    }
}
