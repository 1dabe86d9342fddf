//! slotforge-core
//!
//! Save/load slot orchestration for a live, main-thread simulation.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, slot records, filter, task states, errors）
//! - **ports**: 抽象化レイヤー（SlotStore, World, SaveObserver, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（SaveManager, SlotTask, WorkerPool, StreamingCoordinator）
//! - **impls**: 実装（FileSlotStore, InMemorySlotStore, InMemoryWorld）
//! - **preset**: 設定（SavePreset）
//!
//! # 使い方
//! ```ignore
//! let store = Arc::new(FileSlotStore::new(&preset.slots_dir));
//! let mut manager = SaveManager::new(preset, store, Arc::new(SystemClock))?;
//! manager.save_slot(SlotId::new(1), true, None, |result| { /* ... */ })?;
//! loop {
//!     manager.tick(&mut world);
//! }
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod preset;

pub use crate::app::{Latent, SaveManager};
pub use crate::domain::{
    OpStatus, SaveFilter, ScreenshotSize, SlotData, SlotError, SlotId, SlotInfo, StoreError,
    TaskId, TaskKind, TaskState,
};
pub use crate::preset::{ConfigError, SavePreset, SlotRange};
