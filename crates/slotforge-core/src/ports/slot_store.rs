//! SlotStore port - slot の metadata / payload の永続化
//!
//! # 設計原則
//! - 1 slot の metadata と payload は `write_slot` でまとめて commit する
//!   （失敗したら slot は呼び出し前の内容のまま）
//! - payload は bytes のまま扱う（encode/decode は worker 上のタスクが行う）
//! - 実装は worker スレッドから呼ばれるので `Send + Sync`

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::{SlotId, SlotInfo, StoreError};

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// A slot exists when its metadata record exists.
    async fn exists(&self, id: SlotId) -> bool;

    async fn read_info(&self, id: SlotId) -> Result<SlotInfo, StoreError>;

    async fn read_data(&self, id: SlotId) -> Result<Vec<u8>, StoreError>;

    /// Store metadata and payload for `info.id` as one unit.
    ///
    /// On error the slot still holds what it held before the call: the
    /// previous info and payload, or nothing.
    async fn write_slot(&self, info: &SlotInfo, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remove metadata and payload. `NotFound` when there was nothing to remove.
    async fn delete(&self, id: SlotId) -> Result<(), StoreError>;

    async fn list_ids(&self) -> Result<BTreeSet<SlotId>, StoreError>;
}
