#![forbid(unsafe_code)]

use super::active_set::ActiveSetTracker;
use super::error::StoreError;
use super::mirror::DocumentMirror;
use super::requests::CreateIncrementRequest;
use crate::codec;
use crate::fsio;
use crate::layout::{METADATA_FILE, ProjectLayout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use sw_core::Status;
use sw_core::clock::{Clock, SystemClock};
use sw_core::duplicates::StorageArea;
use sw_core::ids::IncrementId;
use sw_core::lifecycle::{is_stale, validate_transition};
use sw_core::model::IncrementType;

pub const DEFAULT_PAUSED_REASON: &str = "No reason provided";

/// Pointer to the tracker item an increment is synchronized with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLink {
    pub tool: String,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Hash of the document content last pushed to the tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Authoritative state of one increment (`metadata.json`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: String,
    #[serde(with = "codec::status")]
    pub status: Status,
    #[serde(rename = "type", default, with = "codec::increment_type")]
    pub kind: IncrementType,
    #[serde(rename = "created", with = "codec::timestamp")]
    pub created_ms: i64,
    #[serde(rename = "lastActivity", with = "codec::timestamp")]
    pub last_activity_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalLink>,
    /// Keys owned by other tools, kept verbatim across rewrites.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetadataRecord {
    pub fn increment_id(&self) -> Result<IncrementId, StoreError> {
        Ok(IncrementId::try_new(self.id.as_str())?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirrorOutcome {
    Mirrored,
    /// The metadata write stands; the document still shows the old status.
    Failed(String),
}

impl MirrorOutcome {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, MirrorOutcome::Mirrored)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub record: MetadataRecord,
    pub previous: Status,
    pub mirror: MirrorOutcome,
}

#[derive(Clone)]
pub struct MetadataStore {
    layout: ProjectLayout,
    clock: Arc<dyn Clock>,
    mirror: DocumentMirror,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self::with_clock(layout, Arc::new(SystemClock))
    }

    pub fn with_clock(layout: ProjectLayout, clock: Arc<dyn Clock>) -> Self {
        let mirror = DocumentMirror::new(layout.clone());
        Self {
            layout,
            clock,
            mirror,
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn mirror(&self) -> &DocumentMirror {
        &self.mirror
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn exists(&self, id: &IncrementId) -> bool {
        self.layout
            .locate(id)
            .is_some_and(|(_, dir)| dir.join(METADATA_FILE).is_file())
    }

    pub fn read(&self, id: &IncrementId) -> Result<MetadataRecord, StoreError> {
        let Some((_, dir)) = self.layout.locate(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let path = dir.join(METADATA_FILE);
        let Some(text) = fsio::read_optional(&path)? else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        serde_json::from_str(&text).map_err(|err| StoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Atomic overwrite in whichever area currently holds the increment (active area for new ones).
    pub fn write(&self, record: &MetadataRecord) -> Result<(), StoreError> {
        let id = record.increment_id()?;
        let dir = match self.layout.locate(&id) {
            Some((_, dir)) => dir,
            None => self.layout.increment_dir(StorageArea::Active, &id),
        };
        fsio::write_json_atomic(&dir.join(METADATA_FILE), record)
    }

    pub fn create(&self, request: CreateIncrementRequest) -> Result<MetadataRecord, StoreError> {
        let id = IncrementId::try_new(request.id)?;
        if !request.status.is_initial() {
            return Err(StoreError::InvalidInput(
                "increment must be created as planning or active",
            ));
        }
        if self.exists(&id) {
            return Err(StoreError::AlreadyExists(id.into_string()));
        }

        let now = self.clock.now_ms();
        let record = MetadataRecord {
            id: id.as_str().to_string(),
            status: request.status,
            kind: request.kind,
            created_ms: now,
            last_activity_ms: now,
            paused_reason: None,
            external: None,
            extra: serde_json::Map::new(),
        };
        self.write(&record)?;
        tracing::info!(increment = %id, status = %record.status, "increment created");
        self.refresh_active_set();
        Ok(record)
    }

    /// Validated transition. The metadata write is the commit point; the document mirror is
    /// updated afterwards and its failure is reported, not rolled back.
    pub fn update_status(
        &self,
        id: &IncrementId,
        status: Status,
        reason: Option<&str>,
    ) -> Result<StatusUpdate, StoreError> {
        let mut record = self.read(id)?;
        let previous = record.status;
        validate_transition(previous, status)?;

        record.status = status;
        record.last_activity_ms = self.clock.now_ms();
        match status {
            Status::Paused => {
                let reason = reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_PAUSED_REASON);
                record.paused_reason = Some(reason.to_string());
            }
            Status::Active => record.paused_reason = None,
            _ => {}
        }
        self.write(&record)?;
        tracing::debug!(increment = %id, from = %previous, to = %status, "status updated");

        let mirror = match self.mirror.update_status(id, status) {
            Ok(()) => MirrorOutcome::Mirrored,
            Err(err) => {
                tracing::warn!(
                    increment = %id,
                    status = %status,
                    error = %err,
                    "metadata updated but spec.md status was not; run repair to resync"
                );
                MirrorOutcome::Failed(err.to_string())
            }
        };

        self.refresh_active_set();
        Ok(StatusUpdate {
            record,
            previous,
            mirror,
        })
    }

    pub fn touch(&self, id: &IncrementId) -> Result<MetadataRecord, StoreError> {
        let mut record = self.read(id)?;
        record.last_activity_ms = self.clock.now_ms();
        self.write(&record)?;
        Ok(record)
    }

    pub fn update_type(
        &self,
        id: &IncrementId,
        kind: IncrementType,
    ) -> Result<MetadataRecord, StoreError> {
        let mut record = self.read(id)?;
        record.kind = kind;
        record.last_activity_ms = self.clock.now_ms();
        self.write(&record)?;
        Ok(record)
    }

    pub fn set_external_link(
        &self,
        id: &IncrementId,
        link: Option<ExternalLink>,
    ) -> Result<MetadataRecord, StoreError> {
        let mut record = self.read(id)?;
        record.external = link;
        self.write(&record)?;
        Ok(record)
    }

    /// Records in one storage area. Unreadable records are logged and skipped.
    pub fn list_area(&self, area: StorageArea) -> Result<Vec<MetadataRecord>, StoreError> {
        let dir = self.layout.area_dir(area);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(id) = IncrementId::try_new(name) else {
                continue;
            };
            let path = entry.path().join(METADATA_FILE);
            let Some(text) = fsio::read_optional(&path)? else {
                continue;
            };
            match serde_json::from_str::<MetadataRecord>(&text) {
                Ok(record) => out.push(record),
                Err(err) => {
                    tracing::warn!(increment = %id, error = %err, "skipping unreadable metadata")
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    pub fn list_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let mut out = Vec::new();
        for area in StorageArea::ALL {
            out.extend(self.list_area(area)?);
        }
        Ok(out)
    }

    pub fn list_by_status(&self, status: Status) -> Result<Vec<MetadataRecord>, StoreError> {
        let mut records = self.list_all()?;
        records.retain(|r| r.status == status);
        Ok(records)
    }

    /// Active-area records whose status is active.
    pub fn get_active(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let mut records = self.list_area(StorageArea::Active)?;
        records.retain(|r| r.status == Status::Active);
        Ok(records)
    }

    pub fn stale(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let now = self.clock.now_ms();
        let mut records = self.list_area(StorageArea::Active)?;
        records.retain(|r| is_stale(r.status, r.last_activity_ms, now));
        Ok(records)
    }

    /// Moves the whole increment directory into `area`.
    pub fn relocate(&self, id: &IncrementId, area: StorageArea) -> Result<PathBuf, StoreError> {
        let Some((current, dir)) = self.layout.locate(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        if current == area {
            return Ok(dir);
        }
        let target = self.layout.increment_dir(area, id);
        if target.exists() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        fs::create_dir_all(self.layout.area_dir(area))?;
        fs::rename(&dir, &target)?;
        tracing::info!(
            increment = %id,
            from = current.as_str(),
            to = area.as_str(),
            "increment relocated"
        );
        self.refresh_active_set();
        Ok(target)
    }

    fn refresh_active_set(&self) {
        if let Err(err) = ActiveSetTracker::new(self.clone()).smart_update() {
            tracing::warn!(error = %err, "active increment cache refresh failed");
        }
    }
}
