//! Ports - 抽象化レイヤー
//!
//! manager が外部に依存する境界をここで定義します。
//! - `SlotStore`: ディスク（または任意のバックエンド）への読み書き
//! - `World`: ライブなワールド（メインスレッド専用）
//! - `SaveObserver`: save/load イベントの購読者
//! - `Clock` / `IdGenerator`: テスト容易性のための抽象化

pub mod clock;
pub mod id_generator;
pub mod observer;
pub mod slot_store;
pub mod world;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::observer::SaveObserver;
pub use self::slot_store::SlotStore;
pub use self::world::World;
