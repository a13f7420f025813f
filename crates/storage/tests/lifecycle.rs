#![forbid(unsafe_code)]

use std::fs;
use std::sync::Arc;
use sw_core::Status;
use sw_core::clock::ManualClock;
use sw_core::duplicates::StorageArea;
use sw_core::ids::IncrementId;
use sw_core::lifecycle::ACTIVE_STALE_AFTER_MS;
use sw_core::model::IncrementType;
use sw_storage::{
    ActiveSetTracker, CreateIncrementRequest, DEFAULT_PAUSED_REASON, MetadataStore, MirrorOutcome,
    ProjectLayout, StoreError, detect_desync, repair_all, scan_completion,
};
use tempfile::TempDir;

const START_MS: i64 = 1_731_578_400_000;

fn project() -> (TempDir, Arc<ManualClock>, MetadataStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(START_MS));
    let store = MetadataStore::with_clock(ProjectLayout::new(dir.path()), clock.clone());
    (dir, clock, store)
}

fn id(raw: &str) -> IncrementId {
    IncrementId::try_new(raw).expect("increment id")
}

fn create(store: &MetadataStore, raw: &str, status: Status) -> IncrementId {
    store
        .create(CreateIncrementRequest {
            status,
            ..CreateIncrementRequest::new(raw)
        })
        .expect("create increment");
    id(raw)
}

fn write_spec(store: &MetadataStore, id: &IncrementId, text: &str) {
    let path = store.mirror().path(id).expect("spec path");
    fs::write(path, text).expect("write spec.md");
}

const SPEC_BODY: &str = "\n# Feature\n\n### US-001: Do it\n- [ ] AC-US1-01: works\r\n- [ ] AC-US1-02: is tested\n";

#[test]
fn increment_completes_end_to_end() {
    let (_dir, clock, store) = project();
    let inc = create(&store, "0001-test", Status::Active);
    let spec = format!("---\nincrement: 0001-test\nstatus: active\n---\n{SPEC_BODY}");
    write_spec(&store, &inc, &spec);
    let dir = store.layout().increment_dir(StorageArea::Active, &inc);
    fs::write(
        dir.join("tasks.md"),
        "### T-001: Build\n**AC**: AC-US1-01\n- [x] done\n\n### T-002: Test\n**AC**: AC-US1-02\n- [x] done\n",
    )
    .expect("write tasks.md");

    let tracker = ActiveSetTracker::new(store.clone());
    assert_eq!(tracker.get_active(), vec!["0001-test".to_string()]);

    let scan = scan_completion(store.layout(), &inc).expect("scan");
    assert!(scan.report.increment_complete);
    assert_eq!(scan.report.criteria_percent, 100);

    clock.advance(60_000);
    let update = store
        .update_status(&inc, Status::Completed, None)
        .expect("complete");
    assert_eq!(update.previous, Status::Active);
    assert_eq!(update.mirror, MirrorOutcome::Mirrored);
    assert_eq!(update.record.last_activity_ms, START_MS + 60_000);

    assert_eq!(store.read(&inc).expect("read").status, Status::Completed);
    assert_eq!(
        store.mirror().read_status(&inc).expect("mirror status"),
        Status::Completed
    );
    assert!(tracker.get_active().is_empty());
    assert!(tracker.get_primary().is_none());

    let after = fs::read_to_string(store.mirror().path(&inc).expect("path")).expect("read spec");
    assert!(after.ends_with(SPEC_BODY), "body must be preserved byte for byte");
    assert!(detect_desync(&store, &inc).expect("desync check").is_none());
}

#[test]
fn invalid_transition_changes_nothing() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0002-plan", Status::Planning);
    let path = store
        .layout()
        .increment_dir(StorageArea::Active, &inc)
        .join("metadata.json");
    let before = fs::read(&path).expect("read metadata");

    let err = store
        .update_status(&inc, Status::Completed, None)
        .expect_err("planning -> completed must fail");
    match err {
        StoreError::InvalidTransition(t) => {
            assert_eq!((t.from, t.to), (Status::Planning, Status::Completed));
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(fs::read(&path).expect("re-read metadata"), before);
}

#[test]
fn create_rejects_non_initial_status_and_duplicates() {
    let (_dir, _clock, store) = project();
    let err = store
        .create(CreateIncrementRequest {
            status: Status::Completed,
            ..CreateIncrementRequest::new("0003-x")
        })
        .expect_err("completed is not an initial status");
    assert!(matches!(err, StoreError::InvalidInput(_)));

    create(&store, "0003-x", Status::Planning);
    let err = store
        .create(CreateIncrementRequest::new("0003-x"))
        .expect_err("duplicate create");
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[test]
fn paused_reason_defaults_and_clears() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0004-pause", Status::Active);

    let paused = store
        .update_status(&inc, Status::Paused, None)
        .expect("pause");
    assert_eq!(
        paused.record.paused_reason.as_deref(),
        Some(DEFAULT_PAUSED_REASON)
    );
    let paused = store
        .update_status(&inc, Status::Active, None)
        .expect("resume")
        .record;
    assert!(paused.paused_reason.is_none());

    let record = store
        .update_status(&inc, Status::Paused, Some("waiting on review"))
        .expect("pause again")
        .record;
    assert_eq!(record.paused_reason.as_deref(), Some("waiting on review"));
}

#[test]
fn mirror_failure_is_reported_but_not_rolled_back() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0005-nomirror", Status::Active);

    let update = store
        .update_status(&inc, Status::Paused, None)
        .expect("metadata write succeeds");
    assert!(matches!(update.mirror, MirrorOutcome::Failed(_)));
    assert_eq!(store.read(&inc).expect("read").status, Status::Paused);

    write_spec(&store, &inc, "---\nstatus: active\n---\nbody\n");
    let report = detect_desync(&store, &inc)
        .expect("desync check")
        .expect("desync present");
    assert_eq!(report.metadata_status, Status::Paused);
    assert_eq!(report.mirror_status, Some(Status::Active));

    assert_eq!(repair_all(&store).expect("repair"), vec!["0005-nomirror".to_string()]);
    assert_eq!(
        store.mirror().read_status(&inc).expect("mirror status"),
        Status::Paused
    );
    assert!(detect_desync(&store, &inc).expect("desync check").is_none());
}

#[test]
fn quoted_status_key_survives_update_and_repair() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0006-quoted", Status::Planning);
    write_spec(&store, &inc, "---\n\"status\": planning\ntitle: x\n---\nbody\n");

    let update = store
        .update_status(&inc, Status::Active, None)
        .expect("activate");
    assert_eq!(update.mirror, MirrorOutcome::Mirrored);
    assert_eq!(
        store.mirror().read_status(&inc).expect("mirror status"),
        Status::Active
    );
    let text = store.mirror().read_text(&inc).expect("read spec");
    assert_eq!(text, "---\n\"status\": active\ntitle: x\n---\nbody\n");

    write_spec(&store, &inc, "---\n\"status\": planning\ntitle: x\n---\nbody\n");
    assert!(detect_desync(&store, &inc).expect("desync check").is_some());
    assert_eq!(repair_all(&store).expect("repair"), vec!["0006-quoted".to_string()]);
    assert!(detect_desync(&store, &inc).expect("desync check").is_none());
}

#[test]
fn active_set_keeps_two_most_recent() {
    let (_dir, clock, store) = project();
    let a = create(&store, "0010-a", Status::Active);
    clock.advance(1_000);
    create(&store, "0011-b", Status::Active);
    clock.advance(1_000);
    create(&store, "0012-c", Status::Active);

    let tracker = ActiveSetTracker::new(store.clone());
    let first = tracker.smart_update().expect("rebuild");
    assert_eq!(first, vec!["0012-c".to_string(), "0011-b".to_string()]);
    assert_eq!(tracker.smart_update().expect("rebuild again"), first);
    assert_eq!(tracker.get_primary().as_deref(), Some("0012-c"));

    clock.advance(1_000);
    store.touch(&a).expect("touch");
    assert_eq!(
        tracker.smart_update().expect("rebuild"),
        vec!["0010-a".to_string(), "0012-c".to_string()]
    );
}

#[test]
fn validate_rebuilds_a_stale_cache() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0020-a", Status::Active);
    let tracker = ActiveSetTracker::new(store.clone());
    assert!(tracker.validate().expect("validate"));

    // Simulate an out-of-band metadata edit the cache has not seen.
    let mut record = store.read(&inc).expect("read");
    record.status = Status::Paused;
    store.write(&record).expect("write");
    assert_eq!(tracker.get_active(), vec!["0020-a".to_string()]);

    assert!(!tracker.validate().expect("validate"));
    assert!(tracker.get_active().is_empty());
}

#[test]
fn active_set_reads_legacy_and_malformed_files() {
    let (_dir, _clock, store) = project();
    let path = store.layout().active_state_path();
    fs::create_dir_all(path.parent().expect("state dir")).expect("mkdir");
    let tracker = ActiveSetTracker::new(store.clone());

    fs::write(&path, r#"{"id":"0030-legacy"}"#).expect("write legacy");
    assert_eq!(tracker.get_active(), vec!["0030-legacy".to_string()]);

    fs::write(&path, "{not json").expect("write garbage");
    assert!(tracker.get_active().is_empty());
}

#[test]
fn missing_increment_is_not_found() {
    let (_dir, _clock, store) = project();
    let err = store.read(&id("0099-missing")).expect_err("missing");
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn relocated_increment_is_still_readable() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0040-old", Status::Active);
    let target = store
        .relocate(&inc, StorageArea::Archive)
        .expect("relocate");
    assert!(target.ends_with("_archive/0040-old"));
    assert_eq!(store.read(&inc).expect("read").status, Status::Active);
    assert!(store.get_active().expect("active").is_empty());
    assert_eq!(store.list_all().expect("all").len(), 1);
    assert!(ActiveSetTracker::new(store.clone()).get_active().is_empty());
}

#[test]
fn stale_increments() {
    let (_dir, clock, store) = project();
    create(&store, "0050-old", Status::Active);
    clock.advance(ACTIVE_STALE_AFTER_MS + 1);
    create(&store, "0051-new", Status::Active);

    let stale: Vec<String> = store
        .stale()
        .expect("stale")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(stale, vec!["0050-old".to_string()]);
}

#[test]
fn foreign_metadata_keys_survive_rewrites() {
    let (_dir, _clock, store) = project();
    let inc = create(&store, "0060-keys", Status::Planning);
    let path = store
        .layout()
        .increment_dir(StorageArea::Active, &inc)
        .join("metadata.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    value["github"] = serde_json::json!({ "issue": 42 });
    fs::write(&path, serde_json::to_string(&value).expect("encode")).expect("write");

    store
        .update_type(&inc, IncrementType::Hotfix)
        .expect("update type");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(value["github"]["issue"], 42);
    assert_eq!(value["type"], "hotfix");
    assert_eq!(value["status"], "planning");
    assert!(value["created"].as_str().is_some_and(|s| s.ends_with('Z')));
}
