#![forbid(unsafe_code)]

//! Append-only sync audit trail: `logs/sync-events.json` (JSON array of sync and conflict
//! records) plus `logs/conflicts.log` (one conflict per line).

use serde::{Deserialize, Serialize};
use sw_storage::config::ConflictStrategy;
use sw_storage::{ProjectLayout, StoreError, codec, fsio};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    ToExternal,
    FromExternal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOperation {
    CreateItem,
    UpdateItem,
    ReadStatus,
    UpdateStatus,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::CreateItem => "create-item",
            SyncOperation::UpdateItem => "update-item",
            SyncOperation::ReadStatus => "read-status",
            SyncOperation::UpdateStatus => "update-status",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    UseLocal,
    UseRemote,
    Deferred,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::UseLocal => "use-local",
            Resolution::UseRemote => "use-remote",
            Resolution::Deferred => "deferred",
        }
    }
}

/// One remote call chain (all retries included).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub increment_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<SyncOperation>,
    pub from_status: String,
    pub to_status: String,
    #[serde(with = "codec::timestamp")]
    pub timestamp: i64,
    pub triggered_by: String,
    pub success: bool,
    pub direction: SyncDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEvent {
    pub increment_id: String,
    pub tool: String,
    pub local_status: String,
    pub remote_status: String,
    #[serde(with = "codec::timestamp")]
    pub local_timestamp: i64,
    #[serde(with = "codec::timestamp")]
    pub remote_timestamp: i64,
    pub resolution_strategy: ConflictStrategy,
    pub resolved_to: Resolution,
    #[serde(with = "codec::timestamp")]
    pub timestamp: i64,
    pub triggered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_choice: Option<String>,
    /// False when the winning status could not be written.
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Conflict is listed first: its required fields never appear on a plain sync event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Conflict(ConflictEvent),
    Sync(SyncEvent),
}

impl LogRecord {
    pub fn increment_id(&self) -> &str {
        match self {
            LogRecord::Conflict(event) => &event.increment_id,
            LogRecord::Sync(event) => &event.increment_id,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            LogRecord::Conflict(event) => &event.tool,
            LogRecord::Sync(event) => &event.tool,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            LogRecord::Conflict(event) => event.timestamp,
            LogRecord::Sync(event) => event.timestamp,
        }
    }

    /// Conflicts count as successful when their resolution was applied.
    pub fn success(&self) -> bool {
        match self {
            LogRecord::Conflict(event) => event.applied,
            LogRecord::Sync(event) => event.success,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub increment_id: Option<String>,
    pub tool: Option<String>,
    pub success: Option<bool>,
}

impl HistoryFilter {
    fn matches(&self, record: &LogRecord) -> bool {
        if let Some(id) = self.increment_id.as_deref()
            && record.increment_id() != id
        {
            return false;
        }
        if let Some(tool) = self.tool.as_deref()
            && record.tool() != tool
        {
            return false;
        }
        if let Some(success) = self.success
            && record.success() != success
        {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct SyncEventLog {
    layout: ProjectLayout,
}

impl SyncEventLog {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn append_sync(&self, event: SyncEvent) -> Result<(), StoreError> {
        self.append(LogRecord::Sync(event))
    }

    pub fn append_conflict(&self, event: ConflictEvent) -> Result<(), StoreError> {
        let line = serde_json::to_string(&event)?;
        self.append(LogRecord::Conflict(event))?;
        fsio::append_line(&self.layout.conflicts_log_path(), &line)?;
        Ok(())
    }

    /// All records in append order. A missing log is empty; a corrupt one is an error.
    pub fn load(&self) -> Result<Vec<LogRecord>, StoreError> {
        let path = self.layout.sync_events_path();
        let Some(raw) = fsio::read_optional(&path)? else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|err| StoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Matching records, newest first.
    pub fn history(&self, filter: &HistoryFilter) -> Result<Vec<LogRecord>, StoreError> {
        let mut records: Vec<LogRecord> = self
            .load()?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        records.reverse();
        records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(records)
    }

    fn append(&self, record: LogRecord) -> Result<(), StoreError> {
        let mut records = match self.load() {
            Ok(records) => records,
            Err(StoreError::Parse { path, message }) => {
                tracing::warn!(path = %path.display(), error = %message, "sync event log unreadable; starting a new one");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        records.push(record);
        fsio::write_json_atomic(&self.layout.sync_events_path(), &records)
    }
}
