#![forbid(unsafe_code)]

use std::sync::Arc;
use sw_core::clock::{Clock, ManualClock};
use sw_storage::{BATCH_STATE_TTL_MS, BatchError, BatchState, BatchStateStore, ProjectLayout};

fn state(timestamp: i64) -> BatchState {
    BatchState {
        total: 5,
        completed: 2,
        succeeded: 1,
        failed: 1,
        errors: vec![BatchError {
            id: "0002-b".to_string(),
            error: "remote error 404: not found".to_string(),
            timestamp,
        }],
        timestamp,
        canceled: true,
        last_processed_id: Some("0002-b".to_string()),
    }
}

#[test]
fn saved_state_loads_until_it_expires() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = BatchStateStore::with_clock(layout.clone(), clock.clone());

    assert!(store.load().expect("load empty").is_none());

    let saved = state(clock.now_ms());
    store.save(&saved).expect("save");
    assert_eq!(store.load().expect("load"), Some(saved));

    clock.advance(BATCH_STATE_TTL_MS + 1);
    assert!(store.load().expect("load expired").is_none());
    assert!(!layout.batch_state_path().exists(), "expired state is deleted");
}

#[test]
fn unreadable_state_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    std::fs::create_dir_all(layout.state_dir()).expect("state dir");
    std::fs::write(layout.batch_state_path(), "[]").expect("write junk");

    let store = BatchStateStore::new(layout.clone());
    assert!(store.load().expect("load").is_none());
    assert!(!layout.batch_state_path().exists());
}
