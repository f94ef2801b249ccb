mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{keys, scattered_world, SlowFactory};
use fortressfinder::{
    BlockPos, CheckpointError, CheckpointStore, ClusterResult, PatternType, ResultStore,
    ScanCheckpoint, ScanKind, ScanSession, ScanSettings, ScanState,
};

fn store_in(dir: &tempfile::TempDir) -> CheckpointStore {
    CheckpointStore::new(
        dir.path().join("scan_state.toml"),
        dir.path().join("results.dat"),
    )
}

fn sample_results() -> Vec<ClusterResult> {
    vec![
        ClusterResult::new(0, BlockPos::new(9, 64, 9), PatternType::Quad, false),
        ClusterResult::new(-12, BlockPos::new(-400, 70, 21), PatternType::Triple, true),
        ClusterResult::new(i64::MAX, BlockPos::new(1, 64, -1), PatternType::LShape, true),
    ]
}

#[test]
fn state_and_results_survive_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let settings = ScanSettings::sweep(1000, None, 4).unwrap();
    let state = ScanCheckpoint {
        area_cursor: 17,
        area_seed: -3,
        area_radius: 250,
        next_seed: 123_456,
        settings: settings.persisted(),
    };
    store.save(&state, &sample_results()).unwrap();

    assert_eq!(store.load_state().unwrap(), Some(state.clone()));
    assert_eq!(store.load_results().unwrap(), sample_results());
    let (loaded_state, loaded) = store.load_or_default();
    assert_eq!(loaded_state, state);
    assert_eq!(loaded_state.settings.mode, ScanKind::Sweep);
    assert_eq!(loaded.len(), 3);
    assert!(!dir.path().join("scan_state.toml.tmp").exists());
}

#[test]
fn missing_files_mean_a_fresh_start() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    assert_eq!(store.load_state().unwrap(), None);
    assert!(store.load_results().unwrap().is_empty());
    let (state, results) = store.load_or_default();
    assert_eq!(state, ScanCheckpoint::default());
    assert!(results.is_empty());
}

#[test]
fn corrupt_state_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    fs::write(store.state_path(), "area_cursor = \"not a number\"\n[[[").unwrap();
    assert!(matches!(
        store.load_state(),
        Err(CheckpointError::Decode { .. })
    ));
    let (state, _) = store.load_or_default();
    assert_eq!(state, ScanCheckpoint::default());
}

#[test]
fn partial_state_fills_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    fs::write(store.state_path(), "area_cursor = 5\n").unwrap();
    let state = store.load_state().unwrap().unwrap();
    assert_eq!(state.area_cursor, 5);
    assert_eq!(state.next_seed, 0);
    assert_eq!(state.settings.mode, ScanKind::Area);
}

#[test]
fn malformed_result_lines_are_skipped_and_duplicates_collapse() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    fs::write(
        store.results_path(),
        "# seed x y z distSq pattern permanent\n\
         0 9 64 9 81 0 0\n\
         garbage line\n\
         \n\
         0 9 64 9 999 0 0\n\
         7 -9 64 19 442 2 1\n\
         7 -9 64 19 442 5 1\n",
    )
    .unwrap();
    let loaded = store.load_results().unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|r| r.distance_squared() == 162 || r.distance_squared() == 442));

    let results = ResultStore::from_results(loaded);
    assert_eq!(results.len(), 2);
}

#[test]
fn save_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = CheckpointStore::new(
        dir.path().join("runs/a/state.toml"),
        dir.path().join("runs/a/results.dat"),
    );
    nested.save(&ScanCheckpoint::default(), &[]).unwrap();
    let text = fs::read_to_string(nested.results_path()).unwrap();
    assert!(text.starts_with('#'));
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn finished_session_writes_its_final_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = store_in(&dir);
    let results = Arc::new(ResultStore::new());
    let settings = ScanSettings::area("6", 3, 2).unwrap();
    let outcome = ScanSession::start(
        Arc::new(scattered_world(6, 3)),
        settings.clone(),
        ScanCheckpoint::default(),
        Arc::clone(&results),
        Some(checkpoint.clone()),
    )
    .unwrap()
    .wait();
    assert_eq!(outcome.state, ScanState::Completed);

    let (state, saved) = checkpoint.load_or_default();
    assert_eq!(state.area_cursor, 7);
    assert_eq!(state.settings, settings.persisted());
    assert_eq!(state.settings.seed, "6");
    assert_eq!(keys(&saved), keys(&results.snapshot()));
    assert_eq!(saved.len(), 6);
}

#[test]
fn unwritable_state_file_does_not_stop_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = store_in(&dir);
    // A directory where the state file belongs makes every save fail.
    fs::create_dir(checkpoint.state_path()).unwrap();

    let results = Arc::new(ResultStore::new());
    let mut settings = ScanSettings::area("8", 4, 1).unwrap();
    settings.checkpoint_every = Duration::from_millis(20);
    let factory = SlowFactory {
        inner: scattered_world(8, 4),
        delay: Duration::from_millis(2),
    };
    let outcome = ScanSession::start(
        Arc::new(factory),
        settings,
        ScanCheckpoint::default(),
        Arc::clone(&results),
        Some(checkpoint.clone()),
    )
    .unwrap()
    .wait();

    assert_eq!(outcome.state, ScanState::Completed);
    assert_eq!(outcome.cursor, 9);
    assert_eq!(results.len(), 6);
    // At least one periodic attempt plus the final one.
    assert!(outcome.checkpoint_failures >= 2);
    assert!(checkpoint.state_path().is_dir());
}
