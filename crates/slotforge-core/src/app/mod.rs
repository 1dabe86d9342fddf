//! App - アプリケーション層
//!
//! ports を組み合わせて save/load のオーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **SaveManager**: active slot とタスク roster の所有者、毎フレームの tick
//! - **SlotTask**: Save / Load / LoadInfos / DeleteAll の状態機械
//! - **WorkerPool**: disk / encode を main thread から外す実行器
//! - **StreamingCoordinator**: region の load/unload を実行中タスクに渡す
//! - **Latent**: callback の代わりに poll できる結果ハンドル

pub mod latent;
pub mod manager;
pub mod snapshot;
pub mod streaming;
pub mod task;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::latent::Latent;
pub use self::manager::SaveManager;
pub use self::streaming::StreamingCoordinator;
pub use self::task::{DeleteCallback, InfoCallback, InfosCallback, SlotTask};
pub use self::worker_pool::{WorkHandle, WorkPoll, WorkerPool};
