//! Domain model (IDs, slot records, filter, task states, errors).

pub mod errors;
pub mod filter;
pub mod ids;
pub mod slot;
pub mod state;

pub use self::errors::{Conflict, SlotError, StoreError};
pub use self::filter::SaveFilter;
pub use self::ids::{Id, IdMarker, SlotId, TaskId};
pub use self::slot::{
    ObjectRecord, RegionRecord, Screenshot, ScreenshotSize, SlotData, SlotInfo, default_slot_name,
};
pub use self::state::{OpStatus, Resource, TaskKind, TaskState};
