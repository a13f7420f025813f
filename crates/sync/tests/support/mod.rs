#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};
use sw_core::Status;
use sw_core::clock::ManualClock;
use sw_core::ids::IncrementId;
use sw_core::retry::RemoteError;
use sw_storage::config::SyncSettings;
use sw_storage::{CreateIncrementRequest, ExternalLink, MetadataStore, ProjectLayout};
use sw_sync::retry::RecordingSleeper;
use sw_sync::tracker::{IssueTracker, ItemPayload, RemoteItem, RemoteStatus};
use sw_sync::{EngineOptions, ExternalSyncEngine};
use tempfile::TempDir;

pub(crate) const START_MS: i64 = 1_731_578_400_000;
pub(crate) const TOOL: &str = "github";

pub(crate) struct Project {
    pub(crate) dir: TempDir,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) store: MetadataStore,
}

impl Project {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = MetadataStore::with_clock(ProjectLayout::new(dir.path()), clock.clone());
        Self { dir, clock, store }
    }

    pub(crate) fn layout(&self) -> &ProjectLayout {
        self.store.layout()
    }

    /// Creates the increment with a `spec.md` whose front-matter matches its status.
    pub(crate) fn increment(&self, raw: &str, status: Status) -> IncrementId {
        self.store
            .create(CreateIncrementRequest {
                status,
                ..CreateIncrementRequest::new(raw)
            })
            .expect("create increment");
        let id = IncrementId::try_new(raw).expect("increment id");
        let spec = format!(
            "---\nincrement: {raw}\nstatus: {}\ntitle: \"Increment {raw}\"\n---\n\n# {raw}\n\nBody.\n",
            status.as_str()
        );
        fs::write(self.store.mirror().path(&id).expect("spec path"), spec).expect("write spec.md");
        id
    }

    pub(crate) fn link(&self, id: &IncrementId, item_id: &str, content_hash: Option<&str>) {
        self.store
            .set_external_link(
                id,
                Some(ExternalLink {
                    tool: TOOL.to_string(),
                    item_id: item_id.to_string(),
                    url: None,
                    content_hash: content_hash.map(str::to_string),
                }),
            )
            .expect("link increment");
    }

    pub(crate) fn status(&self, id: &IncrementId) -> Status {
        self.store.read(id).expect("read metadata").status
    }

    pub(crate) fn engine(
        &self,
        tracker: &Arc<FakeTracker>,
        options: EngineOptions,
    ) -> (ExternalSyncEngine, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let tracker: Arc<dyn IssueTracker> = tracker.clone();
        let engine = ExternalSyncEngine::new(self.store.clone(), tracker, options)
            .with_sleeper(sleeper.clone());
        (engine, sleeper)
    }
}

pub(crate) fn all_gates() -> SyncSettings {
    SyncSettings {
        can_upsert_internal_items: true,
        can_update_external_items: true,
        can_update_status: true,
    }
}

pub(crate) fn status_only() -> SyncSettings {
    SyncSettings {
        can_update_status: true,
        ..SyncSettings::default()
    }
}

pub(crate) fn options(settings: SyncSettings) -> EngineOptions {
    EngineOptions {
        settings,
        triggered_by: "test".to_string(),
        ..EngineOptions::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Create(String),
    Update(String),
    ReadStatus(String),
    UpdateStatus(String, Status),
}

/// In-memory tracker. Failures queued with `fail_next` are returned before real answers.
#[derive(Default)]
pub(crate) struct FakeTracker {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<RemoteError>>,
    statuses: Mutex<HashMap<String, RemoteStatus>>,
    next_item: Mutex<u32>,
}

impl FakeTracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_remote(&self, item_id: &str, status: &str, updated_at_ms: i64) {
        self.statuses
            .lock()
            .expect("statuses")
            .insert(item_id.to_string(), RemoteStatus::new(status, updated_at_ms));
    }

    pub(crate) fn remote(&self, item_id: &str) -> Option<RemoteStatus> {
        self.statuses.lock().expect("statuses").get(item_id).cloned()
    }

    pub(crate) fn fail_next(&self, err: RemoteError) {
        self.failures.lock().expect("failures").push_back(err);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: Call) -> Result<(), RemoteError> {
        self.calls.lock().expect("calls").push(call);
        match self.failures.lock().expect("failures").pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl IssueTracker for FakeTracker {
    fn tool(&self) -> &str {
        TOOL
    }

    fn create_item(&self, payload: &ItemPayload) -> Result<RemoteItem, RemoteError> {
        self.record(Call::Create(payload.increment_id.clone()))?;
        let mut next = self.next_item.lock().expect("next item");
        *next += 1;
        let item_id = format!("{}", 100 + *next);
        self.statuses.lock().expect("statuses").insert(
            item_id.clone(),
            RemoteStatus::new(payload.status.as_str(), START_MS),
        );
        Ok(RemoteItem {
            url: Some(format!("https://tracker.test/issues/{item_id}")),
            item_id,
        })
    }

    fn update_item(&self, item_id: &str, _payload: &ItemPayload) -> Result<(), RemoteError> {
        self.record(Call::Update(item_id.to_string()))
    }

    fn read_status(&self, item_id: &str) -> Result<RemoteStatus, RemoteError> {
        self.record(Call::ReadStatus(item_id.to_string()))?;
        self.remote(item_id)
            .ok_or_else(|| RemoteError::http(404, format!("item {item_id} not found")))
    }

    fn update_status(&self, item_id: &str, status: Status) -> Result<(), RemoteError> {
        self.record(Call::UpdateStatus(item_id.to_string(), status))?;
        self.set_remote(item_id, status.as_str(), START_MS);
        Ok(())
    }
}
