//! InMemorySlotStore - 開発・テスト用の SlotStore
//!
//! # 実装詳細
//! - `std::sync::Mutex` で排他制御（await をまたいで lock を持たない）
//! - fault injection: 書き込み / 読み込みを失敗させられる
//!   （`fail_info_writes` は payload を stage した後で info だけ失敗させる）
//! - write gate: `hold_writes()` 中は書き込みが止まり、タスクを mid-flight で観察できる

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{SlotId, SlotInfo, StoreError};
use crate::ports::SlotStore;

#[derive(Debug, Default)]
struct Slots {
    infos: BTreeMap<SlotId, SlotInfo>,
    data: BTreeMap<SlotId, Vec<u8>>,
}

#[derive(Debug)]
pub struct InMemorySlotStore {
    slots: Mutex<Slots>,
    fail_writes: AtomicBool,
    fail_info_writes: AtomicBool,
    fail_reads: AtomicBool,
    /// `true` while writes may proceed.
    write_gate: watch::Sender<bool>,
    writes: AtomicUsize,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        let (write_gate, _) = watch::channel(true);
        Self {
            slots: Mutex::new(Slots::default()),
            fail_writes: AtomicBool::new(false),
            fail_info_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            write_gate,
            writes: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later write fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the metadata half of every later write fail, after the payload
    /// has been staged.
    pub fn fail_info_writes(&self, fail: bool) {
        self.fail_info_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every later read fail with a backend error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Park writes until `release_writes`.
    pub fn hold_writes(&self) {
        self.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(true);
    }

    /// Number of committed slot writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.lock().infos.contains_key(&id)
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.lock().infos.keys().copied().collect()
    }

    pub fn info(&self, id: SlotId) -> Option<SlotInfo> {
        self.lock().infos.get(&id).cloned()
    }

    /// Store an info record as-is, bypassing the gate and fault injection.
    pub fn put_info(&self, info: SlotInfo) {
        self.lock().infos.insert(info.id, info);
    }

    /// Replace a payload with arbitrary bytes, e.g. to simulate corruption.
    pub fn put_raw_data(&self, id: SlotId, bytes: Vec<u8>) {
        self.lock().data.insert(id, bytes);
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let mut gate = self.write_gate.subscribe();
        // sender は self が持っているので閉じることはない
        let _ = gate.wait_for(|open| *open).await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        Ok(())
    }

    fn before_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemorySlotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn exists(&self, id: SlotId) -> bool {
        self.contains(id)
    }

    async fn read_info(&self, id: SlotId) -> Result<SlotInfo, StoreError> {
        self.before_read()?;
        self.info(id).ok_or(StoreError::NotFound(id))
    }

    async fn read_data(&self, id: SlotId) -> Result<Vec<u8>, StoreError> {
        self.before_read()?;
        self.lock()
            .data
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn write_slot(&self, info: &SlotInfo, bytes: &[u8]) -> Result<(), StoreError> {
        self.before_write().await?;
        let staged = bytes.to_vec();
        if self.fail_info_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected info write failure".into()));
        }
        // info と payload は同じ lock の中で入れ替える
        let mut slots = self.lock();
        slots.data.insert(info.id, staged);
        slots.infos.insert(info.id, info.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, id: SlotId) -> Result<(), StoreError> {
        let mut slots = self.lock();
        if slots.infos.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        slots.data.remove(&id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<BTreeSet<SlotId>, StoreError> {
        self.before_read()?;
        Ok(self.lock().infos.keys().copied().collect())
    }
}
