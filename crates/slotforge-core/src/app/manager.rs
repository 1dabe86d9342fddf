//! SaveManager - slot の保存/読み込みを束ねるオーケストレータ
//!
//! # 責務
//! - active slot（現在ロード中の SlotInfo + SlotData）を所有する
//! - タスクの roster を持ち、事前条件を検証してからタスクを作る
//! - `tick()` で毎フレーム全タスクを進め、完了を observer と callback に流す
//! - region の load/unload を StreamingCoordinator 経由で実行中タスクに渡す
//!
//! # スレッドモデル
//! SaveManager 自体は main thread 専用（`Send` ではない）。
//! disk / encode は WorkerPool に逃がし、tick は決してブロックしない。
//! 同期 API（`*_sync`, `delete_slot`, 存在確認）だけが pool 上で block_on する。
//!
//! # 排他
//! Save/Load は同時に 1 つだけ。DeleteAll は Save/Load/DeleteAll と衝突する。
//! LoadInfos は何とも衝突しない。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::streaming::StreamingCoordinator;
use super::task::{
    Completion, DeleteCallback, InfoCallback, InfosCallback, SlotTask, TaskContext, read_infos,
    save_name,
};
use super::worker_pool::WorkerPool;
use crate::domain::{
    Conflict, SaveFilter, ScreenshotSize, SlotData, SlotError, SlotId, SlotInfo, TaskId, TaskKind,
    TaskState,
};
use crate::ports::{Clock, IdGenerator, SaveObserver, SlotStore, UlidGenerator, World};
use crate::preset::SavePreset;

pub struct SaveManager {
    preset: SavePreset,
    store: Arc<dyn SlotStore>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    /// `None` after `deinitialize`.
    pool: Option<WorkerPool>,
    tasks: Vec<SlotTask>,
    active: Option<(SlotInfo, SlotData)>,
    /// Default pair handed out by `current_info`/`current_data` while no
    /// slot is loaded. Never counts as being in a slot.
    fallback: Option<(SlotInfo, SlotData)>,
    observers: Vec<Arc<dyn SaveObserver>>,
    streaming: StreamingCoordinator,
}

impl SaveManager {
    pub fn new(
        preset: SavePreset,
        store: Arc<dyn SlotStore>,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let pool = WorkerPool::new(preset.worker_threads)?;
        info!(
            workers = preset.worker_threads,
            max_slots = preset.max_slots,
            "save manager initialized"
        );
        Ok(Self {
            ids: UlidGenerator::new(Arc::clone(&clock)),
            preset,
            store,
            clock,
            pool: Some(pool),
            tasks: Vec::new(),
            active: None,
            fallback: None,
            observers: Vec::new(),
            streaming: StreamingCoordinator::new(),
        })
    }

    pub fn preset(&self) -> &SavePreset {
        &self.preset
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    // ========================================================================
    // Save / Load
    // ========================================================================

    /// Start saving the world into `id`.
    ///
    /// Rejected synchronously (no task, no callback) when the id is out of
    /// range, a conflicting task is running, or the slot exists and
    /// `overwrite` is false.
    pub fn save_slot(
        &mut self,
        id: SlotId,
        overwrite: bool,
        screenshot: Option<ScreenshotSize>,
        on_done: impl FnOnce(Result<SlotInfo, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        self.check_save(id, overwrite)
            .map_err(|err| rejected(TaskKind::Save, Some(id), err))?;
        let name = save_name(id, self.active_slot());
        let on_done: InfoCallback = Box::new(on_done);
        let task = SlotTask::save(
            self.ids.generate_task_id(),
            self.preset.filter.clone(),
            id,
            name,
            screenshot,
            on_done,
        );
        Ok(self.register(task))
    }

    /// Save over the active slot.
    pub fn save_current_slot(
        &mut self,
        screenshot: Option<ScreenshotSize>,
        on_done: impl FnOnce(Result<SlotInfo, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        let Some(id) = self.active_slot().map(|info| info.id) else {
            return Err(rejected(TaskKind::Save, None, SlotError::NoActiveSlot));
        };
        self.save_slot(id, true, screenshot, on_done)
    }

    /// Start loading `id`. The slot becomes active only if the load succeeds.
    pub fn load_slot(
        &mut self,
        id: SlotId,
        on_done: impl FnOnce(Result<SlotInfo, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        self.check_load(id)
            .map_err(|err| rejected(TaskKind::Load, Some(id), err))?;
        let on_done: InfoCallback = Box::new(on_done);
        let task = SlotTask::load(
            self.ids.generate_task_id(),
            self.preset.filter.clone(),
            id,
            on_done,
        );
        Ok(self.register(task))
    }

    /// Load the active slot again, discarding unsaved world changes.
    pub fn reload_current_slot(
        &mut self,
        on_done: impl FnOnce(Result<SlotInfo, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        let Some(id) = self.active_slot().map(|info| info.id) else {
            return Err(rejected(TaskKind::Load, None, SlotError::NoActiveSlot));
        };
        self.load_slot(id, on_done)
    }

    fn check_save(&self, id: SlotId, overwrite: bool) -> Result<(), SlotError> {
        let pool = self.pool.as_ref().ok_or(SlotError::NotRunning)?;
        self.check_slot(id)?;
        self.check_conflict(TaskKind::Save)?;
        if !overwrite && pool.block_on(self.store.exists(id)) {
            return Err(SlotError::SlotConflict(Conflict::Overwrite(id)));
        }
        Ok(())
    }

    fn check_load(&self, id: SlotId) -> Result<(), SlotError> {
        let pool = self.pool.as_ref().ok_or(SlotError::NotRunning)?;
        self.check_slot(id)?;
        self.check_conflict(TaskKind::Load)?;
        if !pool.block_on(self.store.exists(id)) {
            return Err(SlotError::SlotNotFound(id));
        }
        Ok(())
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// List every stored slot's info on the worker pool.
    pub fn load_all_slot_infos(
        &mut self,
        sort_by_recent: bool,
        on_done: impl FnOnce(Result<Vec<SlotInfo>, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        self.ensure_running()
            .map_err(|err| rejected(TaskKind::LoadInfos, None, err))?;
        let on_done: InfosCallback = Box::new(on_done);
        let task = SlotTask::load_infos(
            self.ids.generate_task_id(),
            self.preset.filter.clone(),
            None,
            sort_by_recent,
            on_done,
        );
        Ok(self.register(task))
    }

    /// Blocking variant of `load_all_slot_infos`.
    pub fn load_all_slot_infos_sync(&self, sort_by_recent: bool) -> Result<Vec<SlotInfo>, SlotError> {
        let pool = self.pool.as_ref().ok_or(SlotError::NotRunning)?;
        pool.block_on(read_infos(
            Arc::clone(&self.store),
            self.preset.slot_range(),
            None,
            sort_by_recent,
        ))
    }

    /// Read a single slot's info on the worker pool.
    pub fn load_slot_info(
        &mut self,
        id: SlotId,
        on_done: impl FnOnce(Result<SlotInfo, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        self.ensure_running()
            .and_then(|()| self.check_slot(id))
            .map_err(|err| rejected(TaskKind::LoadInfos, Some(id), err))?;
        let on_done: InfosCallback = Box::new(move |result| {
            on_done(result.and_then(|mut infos| infos.pop().ok_or(SlotError::SlotNotFound(id))))
        });
        let task = SlotTask::load_infos(
            self.ids.generate_task_id(),
            self.preset.filter.clone(),
            Some(id),
            false,
            on_done,
        );
        Ok(self.register(task))
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete one slot synchronously.
    ///
    /// Deleting a missing slot fails with `SlotNotFound` and leaves the
    /// store untouched. Deleting the active slot clears it.
    pub fn delete_slot(&mut self, id: SlotId) -> Result<(), SlotError> {
        let pool = self.pool.as_ref().ok_or(SlotError::NotRunning)?;
        self.check_slot(id)?;
        if let Some(task) = self.tasks.iter().find(|t| {
            t.kind() == TaskKind::DeleteAll
                || (t.target_slot() == Some(id)
                    && matches!(t.kind(), TaskKind::Save | TaskKind::Load))
        }) {
            let err = SlotError::SlotConflict(Conflict::Busy { running: task.kind() });
            warn!(slot = %id, error = %err, "delete rejected");
            return Err(err);
        }
        if let Err(err) = pool.block_on(self.store.delete(id)) {
            let err = SlotError::from(err);
            warn!(slot = %id, error = %err, "delete failed");
            return Err(err);
        }
        if self.active_slot().is_some_and(|info| info.id == id) {
            info!(slot = %id, "active slot deleted");
            self.active = None;
        }
        info!(slot = %id, "slot deleted");
        Ok(())
    }

    /// Delete every stored slot on the worker pool. Reports the removed ids.
    pub fn delete_all_slots(
        &mut self,
        on_done: impl FnOnce(Result<Vec<SlotId>, SlotError>) + 'static,
    ) -> Result<TaskId, SlotError> {
        self.ensure_running()
            .and_then(|()| self.check_conflict(TaskKind::DeleteAll))
            .map_err(|err| rejected(TaskKind::DeleteAll, None, err))?;
        let on_done: DeleteCallback = Box::new(on_done);
        let task = SlotTask::delete_all(
            self.ids.generate_task_id(),
            self.preset.filter.clone(),
            on_done,
        );
        Ok(self.register(task))
    }

    // ========================================================================
    // Active slot
    // ========================================================================

    pub fn active_slot(&self) -> Option<&SlotInfo> {
        self.active.as_ref().map(|(info, _)| info)
    }

    pub fn active_data(&self) -> Option<&SlotData> {
        self.active.as_ref().map(|(_, data)| data)
    }

    pub fn is_in_slot(&self) -> bool {
        self.active.is_some()
    }

    /// Active slot info, or a default one if nothing is loaded.
    ///
    /// The default is not an implicit load: `is_in_slot` stays false.
    pub fn current_info(&mut self) -> &SlotInfo {
        &self.current().0
    }

    /// Active slot data, or an empty one if nothing is loaded.
    pub fn current_data(&mut self) -> &SlotData {
        &self.current().1
    }

    fn current(&mut self) -> &(SlotInfo, SlotData) {
        match &self.active {
            Some(active) => active,
            None => {
                let version = self.preset.version.clone();
                self.fallback
                    .get_or_insert_with(|| (SlotInfo::empty(SlotId::new(0), version), SlotData::default()))
            }
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn subscribe(&mut self, observer: Arc<dyn SaveObserver>) {
        if !self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            self.observers.push(observer);
        }
    }

    /// Returns whether the observer was subscribed.
    pub fn unsubscribe(&mut self, observer: &Arc<dyn SaveObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
        self.observers.len() != before
    }

    // ========================================================================
    // Roster
    // ========================================================================

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[SlotTask] {
        &self.tasks
    }

    pub fn is_loading(&self) -> bool {
        self.tasks.iter().any(|t| t.kind() == TaskKind::Load)
    }

    pub fn is_saving_or_loading(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.kind(), TaskKind::Save | TaskKind::Load))
    }

    pub fn is_valid_slot(&self, id: SlotId) -> bool {
        self.preset.is_valid_slot(id)
    }

    /// Whether `id` holds a saved slot. Blocks on the worker pool.
    /// `false` for ids the preset rejects and after `deinitialize`.
    pub fn is_slot_saved(&self, id: SlotId) -> bool {
        match &self.pool {
            Some(pool) if self.preset.is_valid_slot(id) => pool.block_on(self.store.exists(id)),
            _ => false,
        }
    }

    pub fn streaming(&self) -> &StreamingCoordinator {
        &self.streaming
    }

    /// Advance every task by one step. Call once per frame on the main thread.
    pub fn tick(&mut self, world: &mut dyn World) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let mut finished = Vec::new();
        for task in &mut self.tasks {
            if task.state() == TaskState::Created {
                task.start();
                info!(task = %task.id(), kind = %task.kind(), slot = ?task.target_slot(), "task started");
                notify_began(&self.observers, task.kind(), task.filter());
            }
            let mut ctx = TaskContext {
                world: &mut *world,
                pool,
                store: &self.store,
                clock: &*self.clock,
                preset: &self.preset,
            };
            if let Some(completion) = task.advance(&mut ctx) {
                finished.push((Finished::of(task), completion));
            }
        }
        self.tasks.retain(|t| !t.state().is_terminal());
        for (task, completion) in finished {
            self.finish(task, completion, true);
        }
    }

    /// The host world finished streaming in `region`.
    pub fn region_ready(&mut self, world: &mut dyn World, region: &str) -> bool {
        self.streaming.region_ready(region, &mut self.tasks, world)
    }

    /// The host world is about to stream out `region`. Must be called
    /// before the region's objects are gone.
    pub fn region_unloading(&mut self, world: &mut dyn World, region: &str) -> bool {
        self.streaming.region_unloading(region, &mut self.tasks, world)
    }

    /// Stop the worker pool (bounded wait) and cancel every remaining task.
    ///
    /// Cancelled tasks still get their callbacks (with `Cancelled`). Later
    /// requests are rejected with `NotRunning`. Idempotent.
    pub fn deinitialize(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let abandoned = pool.shutdown(self.preset.shutdown_timeout());
        let tasks = std::mem::take(&mut self.tasks);
        let cancelled = tasks.len();
        for mut task in tasks {
            let began = task.state() == TaskState::Running;
            let completion = task.cancel();
            self.finish(Finished::of(&task), completion, began);
        }
        self.active = None;
        self.fallback = None;
        self.observers.clear();
        self.streaming = StreamingCoordinator::new();
        info!(cancelled, abandoned, "save manager deinitialized");
    }

    // ========================================================================
    // internals
    // ========================================================================

    fn ensure_running(&self) -> Result<(), SlotError> {
        if self.pool.is_some() {
            Ok(())
        } else {
            Err(SlotError::NotRunning)
        }
    }

    fn check_slot(&self, id: SlotId) -> Result<(), SlotError> {
        if self.preset.is_valid_slot(id) {
            Ok(())
        } else {
            Err(SlotError::InvalidSlotId(id))
        }
    }

    fn check_conflict(&self, kind: TaskKind) -> Result<(), SlotError> {
        let wanted = kind.resource();
        match self
            .tasks
            .iter()
            .find(|t| !t.state().is_terminal() && t.kind().resource().conflicts_with(wanted))
        {
            Some(running) => Err(SlotError::SlotConflict(Conflict::Busy {
                running: running.kind(),
            })),
            None => Ok(()),
        }
    }

    fn register(&mut self, task: SlotTask) -> TaskId {
        let id = task.id();
        debug!(task = %id, kind = %task.kind(), slot = ?task.target_slot(), "task created");
        self.tasks.push(task);
        id
    }

    /// Activation, then observers, then the callback.
    fn finish(&mut self, task: Finished, completion: Completion, notify: bool) {
        match completion.error() {
            None => info!(task = %task.id, kind = %task.kind, slot = ?task.slot, "task succeeded"),
            Some(SlotError::Cancelled) => {
                info!(task = %task.id, kind = %task.kind, slot = ?task.slot, "task cancelled")
            }
            Some(err) => {
                warn!(task = %task.id, kind = %task.kind, slot = ?task.slot, error = %err, "task failed")
            }
        }
        match completion {
            Completion::Save { result, on_done } => {
                let result = self.activate(result);
                if notify {
                    for observer in &self.observers {
                        observer.on_save_finished(&task.filter, result.is_ok());
                    }
                }
                call(on_done, result);
            }
            Completion::Load { result, on_done } => {
                let result = self.activate(result);
                if notify {
                    for observer in &self.observers {
                        observer.on_load_finished(&task.filter, result.is_ok());
                    }
                }
                call(on_done, result);
            }
            Completion::Infos { result, on_done } => call(on_done, result),
            Completion::DeleteAll { result, on_done } => {
                let active_deleted = match (&result, self.active_slot()) {
                    (Ok(deleted), Some(info)) => deleted.contains(&info.id),
                    _ => false,
                };
                if active_deleted {
                    info!("active slot deleted");
                    self.active = None;
                }
                call(on_done, result);
            }
        }
    }

    fn activate(
        &mut self,
        result: Result<(SlotInfo, SlotData), SlotError>,
    ) -> Result<SlotInfo, SlotError> {
        let (info, data) = result?;
        debug!(slot = %info.id, "slot activated");
        self.active = Some((info.clone(), data));
        Ok(info)
    }
}

impl Drop for SaveManager {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// Snapshot of a task's identity taken before it leaves the roster.
struct Finished {
    id: TaskId,
    kind: TaskKind,
    slot: Option<SlotId>,
    filter: SaveFilter,
}

impl Finished {
    fn of(task: &SlotTask) -> Self {
        Self {
            id: task.id(),
            kind: task.kind(),
            slot: task.target_slot(),
            filter: task.filter().clone(),
        }
    }
}

fn notify_began(observers: &[Arc<dyn SaveObserver>], kind: TaskKind, filter: &SaveFilter) {
    for observer in observers {
        match kind {
            TaskKind::Save => observer.on_save_began(filter),
            TaskKind::Load => observer.on_load_began(filter),
            TaskKind::LoadInfos | TaskKind::DeleteAll => {}
        }
    }
}

fn call<T>(on_done: Option<Box<dyn FnOnce(T)>>, value: T) {
    if let Some(on_done) = on_done {
        on_done(value);
    }
}

fn rejected(kind: TaskKind, slot: Option<SlotId>, err: SlotError) -> SlotError {
    warn!(kind = %kind, slot = ?slot, error = %err, "request rejected");
    err
}
