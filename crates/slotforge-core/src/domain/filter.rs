//! SaveFilter - save/load が触る範囲

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::slot::ObjectRecord;

/// Scope of a save or load. Observers receive it in every hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveFilter {
    /// Include objects that do not belong to a streamed region.
    pub store_globals: bool,
    /// Include streamed regions.
    pub store_regions: bool,
    pub ignored_classes: BTreeSet<String>,
    pub ignored_tags: BTreeSet<String>,
}

impl Default for SaveFilter {
    fn default() -> Self {
        Self {
            store_globals: true,
            store_regions: true,
            ignored_classes: BTreeSet::new(),
            ignored_tags: BTreeSet::new(),
        }
    }
}

impl SaveFilter {
    pub fn accepts(&self, record: &ObjectRecord) -> bool {
        !self.ignored_classes.contains(&record.class)
            && !record.tags.iter().any(|t| self.ignored_tags.contains(t))
    }

    /// Keep only the records this filter accepts.
    pub fn retain(&self, records: Vec<ObjectRecord>) -> Vec<ObjectRecord> {
        records.into_iter().filter(|r| self.accepts(r)).collect()
    }
}
