#![forbid(unsafe_code)]

use std::fs;
use sw_core::duplicates::StorageArea;
use sw_core::ids::IncrementId;
use sw_storage::{ProjectLayout, StoreError, scan_completion, sync_criteria_checkboxes};

const SPEC: &str = "---\nstatus: active\n---\n\n### US-001: Login\n- [ ] AC-US1-01: form renders\n- [x] AC-US1-02: errors shown\n- [ ] AC-US1-03: remember me\n";

const TASKS: &str = "\
#### T-001: Form
**AC**: AC-US1-01
- [x] build form

#### T-002: Errors
**AC**: AC-US1-02
- [x] map errors
- [ ] cover edge cases
";

fn project() -> (tempfile::TempDir, ProjectLayout, IncrementId) {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    let id = IncrementId::try_new("0008-login").expect("id");
    let inc = layout.increment_dir(StorageArea::Active, &id);
    fs::create_dir_all(&inc).expect("increment dir");
    fs::write(inc.join("spec.md"), SPEC).expect("spec");
    fs::write(inc.join("tasks.md"), TASKS).expect("tasks");
    (dir, layout, id)
}

#[test]
fn completion_is_derived_from_tasks_first() {
    let (_dir, layout, id) = project();
    let scan = scan_completion(&layout, &id).expect("scan");
    let report = &scan.report;

    assert!(report.criterion("AC-US1-01").expect("ac1").complete);
    let ac2 = report.criterion("AC-US1-02").expect("ac2");
    assert!(!ac2.complete);
    assert!(ac2.checkbox_out_of_date());
    assert!(!report.criterion("AC-US1-03").expect("ac3").complete);
    assert!(!report.story("US-001").expect("story").complete);
    assert_eq!(report.task_percent, 50);
    assert_eq!(report.criteria_percent, 33);
    assert_eq!(scan.skipped_lines(), 0);
}

#[test]
fn checkbox_sync_flips_only_out_of_date_criteria() {
    let (_dir, layout, id) = project();
    let changed = sync_criteria_checkboxes(&layout, &id).expect("sync");
    assert_eq!(
        changed,
        vec!["AC-US1-01".to_string(), "AC-US1-02".to_string()]
    );

    let path = layout
        .increment_dir(StorageArea::Active, &id)
        .join("spec.md");
    let text = fs::read_to_string(path).expect("read spec");
    assert_eq!(
        text,
        SPEC.replace("- [ ] AC-US1-01", "- [x] AC-US1-01")
            .replace("- [x] AC-US1-02", "- [ ] AC-US1-02")
    );
    assert!(sync_criteria_checkboxes(&layout, &id).expect("resync").is_empty());
}

#[test]
fn unknown_increment_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    let id = IncrementId::try_new("0009-none").expect("id");
    assert!(matches!(
        scan_completion(&layout, &id),
        Err(StoreError::NotFound(_))
    ));
}
