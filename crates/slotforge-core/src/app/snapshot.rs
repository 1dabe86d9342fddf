//! World <-> SlotData traversal. Main thread only.

use crate::domain::{ObjectRecord, RegionRecord, SaveFilter, SlotData};
use crate::ports::World;

/// Build the intermediate representation from live world state.
pub fn capture(world: &dyn World, filter: &SaveFilter) -> SlotData {
    let mut data = SlotData {
        map: world.map_name(),
        ..SlotData::default()
    };
    if filter.store_globals {
        data.globals = filter.retain(world.collect_globals());
    }
    if filter.store_regions {
        for region in world.loaded_regions() {
            if let Some(record) = capture_region(world, &region, filter) {
                data.regions.insert(region, record);
            }
        }
    }
    data
}

pub fn capture_region(world: &dyn World, region: &str, filter: &SaveFilter) -> Option<RegionRecord> {
    if !filter.store_regions {
        return None;
    }
    let objects = world.collect_region(region)?;
    Some(RegionRecord {
        objects: filter.retain(objects),
    })
}

/// Restore globals and every currently loaded region except `skip`.
///
/// Returns the regions that were restored.
pub fn apply(
    world: &mut dyn World,
    data: &SlotData,
    filter: &SaveFilter,
    skip: &[String],
) -> Vec<String> {
    if filter.store_globals {
        world.restore_globals(&accepted(&data.globals, filter));
    }
    let mut restored = Vec::new();
    for region in world.loaded_regions() {
        if skip.contains(&region) {
            continue;
        }
        if apply_region(world, data, &region, filter) {
            restored.push(region);
        }
    }
    restored
}

/// Restore one region from `data`. `false` when there is nothing saved for it.
pub fn apply_region(world: &mut dyn World, data: &SlotData, region: &str, filter: &SaveFilter) -> bool {
    if !filter.store_regions {
        return false;
    }
    let Some(record) = data.regions.get(region) else {
        return false;
    };
    world.restore_region(region, &accepted(&record.objects, filter));
    true
}

fn accepted(records: &[ObjectRecord], filter: &SaveFilter) -> Vec<ObjectRecord> {
    records
        .iter()
        .filter(|r| filter.accepts(r))
        .cloned()
        .collect()
}
