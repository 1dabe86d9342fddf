//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **FileSlotStore**: ディレクトリに slot ごとの info / payload ファイルを置く本番用ストア
//! - **InMemorySlotStore**: 開発・テスト用のストア（fault injection と write gate 付き）
//! - **InMemoryWorld**: 開発・テスト用の World（CLI デモとテストで使う）

pub mod file_store;
pub mod memory_store;
pub mod memory_world;

// 主要な型を再エクスポート
pub use self::file_store::FileSlotStore;
pub use self::memory_store::InMemorySlotStore;
pub use self::memory_world::InMemoryWorld;
