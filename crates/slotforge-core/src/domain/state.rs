//! State - タスクの種類・状態・排他リソース

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Save,
    Load,
    LoadInfos,
    DeleteAll,
}

impl TaskKind {
    /// The resource this kind of task locks while it runs.
    pub fn resource(self) -> Resource {
        match self {
            TaskKind::Save | TaskKind::Load => Resource::ActiveSlot,
            TaskKind::DeleteAll => Resource::AllSlots,
            TaskKind::LoadInfos => Resource::Unlocked,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Save => "save",
            TaskKind::Load => "load",
            TaskKind::LoadInfos => "load_infos",
            TaskKind::DeleteAll => "delete_all",
        };
        f.write_str(s)
    }
}

/// Lock scope used by the exclusion rule.
///
/// - `ActiveSlot`: save/load (both replace the active slot)
/// - `AllSlots`: delete-all, overlaps every locked resource
/// - `Unlocked`: read-only listing, never conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    ActiveSlot,
    AllSlots,
    Unlocked,
}

impl Resource {
    pub fn conflicts_with(self, other: Resource) -> bool {
        !matches!(self, Resource::Unlocked) && !matches!(other, Resource::Unlocked)
    }
}

/// Task state.
///
/// State transitions:
/// - Created -> Running -> Succeeded
/// - Created -> Running -> Failed
/// - Created | Running -> Cancelled (teardown only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Outcome surfaced to callers of the latent entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Succeeded,
    Failed,
    /// Precondition failed, no task was created.
    Rejected,
}
