use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotforge_core::domain::ObjectRecord;
use slotforge_core::impls::{FileSlotStore, InMemoryWorld};
use slotforge_core::ports::{SaveObserver, SystemClock};
use slotforge_core::{SaveFilter, SaveManager, SavePreset, SlotError, SlotId, SlotInfo};

/// 1 frame 分の待ち（本物のゲームループの代わり）
const FRAME: Duration = Duration::from_millis(16);
const MAX_FRAMES: usize = 600;

/// observer：save/load の開始と終了をログに出すだけ
struct LoggingObserver;

impl SaveObserver for LoggingObserver {
    fn on_save_began(&self, filter: &SaveFilter) {
        info!(globals = filter.store_globals, regions = filter.store_regions, "save began");
    }

    fn on_save_finished(&self, _filter: &SaveFilter, success: bool) {
        info!(success, "save finished");
    }

    fn on_load_began(&self, _filter: &SaveFilter) {
        info!("load began");
    }

    fn on_load_finished(&self, _filter: &SaveFilter, success: bool) {
        info!(success, "load finished");
    }
}

#[derive(Debug, Serialize)]
struct SlotSummary {
    id: SlotId,
    name: String,
    map: String,
    played_secs: u64,
    saved_at: String,
}

impl From<&SlotInfo> for SlotSummary {
    fn from(info: &SlotInfo) -> Self {
        Self {
            id: info.id,
            name: info.name.clone(),
            map: info.map.clone(),
            played_secs: info.played_time.as_secs(),
            saved_at: info.save_date.to_rfc3339(),
        }
    }
}

type Shared<T> = Rc<RefCell<Option<Result<T, SlotError>>>>;

/// callback の結果を後から取り出せるようにする
fn slot<T: 'static>() -> (Shared<T>, impl FnOnce(Result<T, SlotError>) + 'static) {
    let shared = Rc::new(RefCell::new(None));
    let sink = shared.clone();
    (shared, move |result| *sink.borrow_mut() = Some(result))
}

fn take<T>(shared: &Shared<T>) -> Result<T, Box<dyn Error>> {
    match shared.borrow_mut().take() {
        Some(result) => Ok(result?),
        None => Err("operation finished without reporting".into()),
    }
}

/// ゲームループの代わり：タスクが無くなるまで tick する
fn run_frames(manager: &mut SaveManager, world: &mut InMemoryWorld) -> Result<usize, Box<dyn Error>> {
    let mut frames = 0;
    while manager.has_tasks() {
        if frames >= MAX_FRAMES {
            return Err(format!("tasks still running after {frames} frames").into());
        }
        manager.tick(world);
        std::thread::sleep(FRAME);
        frames += 1;
    }
    Ok(frames)
}

fn build_world() -> InMemoryWorld {
    let mut world = InMemoryWorld::new("harbor");
    world.spawn_global(ObjectRecord::new(
        "player",
        "Player",
        json!({ "hp": 30, "gold": 12, "position": [4, 0, 9] }),
    ));
    world.spawn_global(ObjectRecord::new("spark", "Particle", json!(null)).with_tag("transient"));
    world.load_region(
        "docks",
        vec![
            ObjectRecord::new("crate_a", "Crate", json!({ "opened": false })),
            ObjectRecord::new("boat", "Boat", json!({ "moored": true })),
        ],
    );
    world
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slotforge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // (A) preset を読む（引数が無ければデフォルト）
    let preset = match std::env::args().nth(1) {
        Some(path) => SavePreset::load(path)?,
        None => SavePreset::default(),
    };
    info!(dir = %preset.slots_dir.display(), "using slots directory");

    // (B) store / world / manager を用意
    let store = Arc::new(FileSlotStore::new(&preset.slots_dir));
    let mut world = build_world();
    let mut manager = SaveManager::new(preset, store, Arc::new(SystemClock))?;
    manager.subscribe(Arc::new(LoggingObserver));

    // (C) slot 1 と slot 2 に保存（間でワールドを変える）
    let (first, on_done) = slot();
    manager.save_slot(SlotId::new(1), true, None, on_done)?;
    let frames = run_frames(&mut manager, &mut world)?;
    info!(frames, slot = %take(&first)?.id, "saved");

    world.set_played_time(Duration::from_secs(95));
    world.set_global_state("player", json!({ "hp": 8, "gold": 40, "position": [1, 0, 2] }));
    let screenshot = Some(manager.preset().screenshot);
    let (second, on_done) = slot();
    manager.save_slot(SlotId::new(2), true, screenshot, on_done)?;
    run_frames(&mut manager, &mut world)?;
    take(&second)?;

    // (D) 新しい順に一覧
    let (listed, on_done) = slot();
    manager.load_all_slot_infos(true, on_done)?;
    run_frames(&mut manager, &mut world)?;
    let summaries: Vec<SlotSummary> = take(&listed)?.iter().map(SlotSummary::from).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    // (E) slot 1 を読み戻す
    world.set_region_state("docks", "crate_a", json!({ "opened": true }));
    let (loaded, on_done) = slot();
    manager.load_slot(SlotId::new(1), on_done)?;
    run_frames(&mut manager, &mut world)?;
    let info = take(&loaded)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "loaded": SlotSummary::from(&info),
            "player": world.global("player").map(|p| &p.state),
            "docks": world.region("docks"),
        }))?
    );

    // (F) slot 2 を消して同期で一覧
    manager.delete_slot(SlotId::new(2))?;
    let remaining: Vec<SlotSummary> = manager
        .load_all_slot_infos_sync(false)?
        .iter()
        .map(SlotSummary::from)
        .collect();
    println!("{}", serde_json::to_string_pretty(&remaining)?);

    manager.deinitialize();
    Ok(())
}
