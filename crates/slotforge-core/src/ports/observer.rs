//! SaveObserver port - save/load のライフサイクル通知
//!
//! フックはメインスレッドで呼ばれる。ブロックしないこと。

use crate::domain::SaveFilter;

pub trait SaveObserver {
    fn on_save_began(&self, _filter: &SaveFilter) {}

    fn on_save_finished(&self, _filter: &SaveFilter, _success: bool) {}

    fn on_load_began(&self, _filter: &SaveFilter) {}

    fn on_load_finished(&self, _filter: &SaveFilter, _success: bool) {}
}
