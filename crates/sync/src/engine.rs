#![forbid(unsafe_code)]

//! One-increment synchronization against an external tracker.
//!
//! Each call to [`ExternalSyncEngine::sync`] runs two steps: content (create or update the
//! tracker item) and status (compare local and remote status, resolving divergence with the
//! configured [`ConflictStrategy`]). Every step is gated by [`SyncSettings`]; a closed gate is
//! reported as [`SyncStep::Skipped`], never as an error. Remote failures end up in the report
//! and the event log; only local storage failures are returned as `Err`.

use crate::SyncError;
use crate::cache::{DEFAULT_TTL_MS, SharedStatusCache, StatusCache};
use crate::event_log::{
    ConflictEvent, Resolution, SyncDirection, SyncEvent, SyncEventLog, SyncOperation,
};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::tracker::{
    ConflictContext, ConflictPrompt, IssueTracker, ItemPayload, PromptChoice, RemoteStatus,
    content_hash,
};
use std::sync::{Arc, MutexGuard};
use sw_core::Status;
use sw_core::ids::IncrementId;
use sw_core::retry::{BackoffConfig, RemoteError};
use sw_storage::config::{ConflictStrategy, ProjectConfig, SyncSettings};
use sw_storage::{ExternalLink, FrontMatter, MetadataRecord, MetadataStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    UpsertInternalItems,
    UpdateExternalItems,
    UpdateStatus,
}

impl Gate {
    /// Config key that opens this gate.
    pub fn as_str(self) -> &'static str {
        match self {
            Gate::UpsertInternalItems => "canUpsertInternalItems",
            Gate::UpdateExternalItems => "canUpdateExternalItems",
            Gate::UpdateStatus => "canUpdateStatus",
        }
    }

    fn is_open(self, settings: &SyncSettings) -> bool {
        match self {
            Gate::UpsertInternalItems => settings.can_upsert_internal_items,
            Gate::UpdateExternalItems => settings.can_update_external_items,
            Gate::UpdateStatus => settings.can_update_status,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStep {
    Skipped { gate: Gate },
    Created { item_id: String },
    Updated { item_id: String },
    /// Content hash matches what was last pushed.
    Unchanged { item_id: String },
    /// No tracker item for this tool; external-origin items are never created from here.
    NotLinked,
    StatusInSync { status: Status },
    StatusConflict { resolution: Resolution, applied: bool },
    Failed { operation: SyncOperation, error: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub increment_id: String,
    pub steps: Vec<SyncStep>,
    /// Tracker calls made, retries included.
    pub remote_calls: u32,
    pub events_appended: u32,
    pub conflict: Option<ConflictEvent>,
}

impl SyncReport {
    fn new(id: &IncrementId) -> Self {
        Self {
            increment_id: id.to_string(),
            steps: Vec::new(),
            remote_calls: 0,
            events_appended: 0,
            conflict: None,
        }
    }

    pub fn noop(id: &IncrementId) -> Self {
        Self::new(id)
    }

    pub fn is_noop(&self) -> bool {
        self.steps.is_empty() && self.remote_calls == 0 && self.events_appended == 0
    }

    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step, SyncStep::Failed { .. }))
            || self.conflict.as_ref().is_some_and(|c| !c.applied && c.error.is_some())
    }

    pub fn first_error(&self) -> Option<String> {
        self.steps
            .iter()
            .find_map(|step| match step {
                SyncStep::Failed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .or_else(|| self.conflict.as_ref().and_then(|c| c.error.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    pub settings: SyncSettings,
    pub strategy: ConflictStrategy,
    pub cache_ttl_ms: i64,
    /// Recorded as `triggeredBy` on every event.
    pub triggered_by: String,
    pub backoff: BackoffConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings: SyncSettings::default(),
            strategy: ConflictStrategy::default(),
            cache_ttl_ms: DEFAULT_TTL_MS,
            triggered_by: "sync".to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &ProjectConfig) -> Self {
        let ttl_ms = config
            .sync
            .status_sync
            .cache_ttl_secs
            .saturating_mul(1000)
            .min(i64::MAX as u64) as i64;
        Self {
            settings: config.sync.settings,
            strategy: config.sync.status_sync.conflict_resolution,
            cache_ttl_ms: ttl_ms,
            ..Self::default()
        }
    }
}

pub struct ExternalSyncEngine {
    metadata: MetadataStore,
    tracker: Arc<dyn IssueTracker>,
    options: EngineOptions,
    retry: RetryPolicy,
    cache: SharedStatusCache<RemoteStatus>,
    events: SyncEventLog,
    prompt: Option<Arc<dyn ConflictPrompt>>,
}

impl ExternalSyncEngine {
    pub fn new(
        metadata: MetadataStore,
        tracker: Arc<dyn IssueTracker>,
        options: EngineOptions,
    ) -> Self {
        let retry = RetryPolicy::new(options.backoff, Arc::new(ThreadSleeper));
        let cache = StatusCache::new(metadata.clock(), options.cache_ttl_ms).shared();
        let events = SyncEventLog::new(metadata.layout().clone());
        Self {
            metadata,
            tracker,
            options,
            retry,
            cache,
            events,
            prompt: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = RetryPolicy::new(self.options.backoff, sleeper);
        self
    }

    /// Replaces the retry policy, including its backoff settings.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.options.backoff = retry.config();
        self.retry = retry;
        self
    }

    /// Uses `cache` for remote statuses, so engines built from clones share lookups.
    pub fn with_cache(mut self, cache: SharedStatusCache<RemoteStatus>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConflictPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn events(&self) -> &SyncEventLog {
        &self.events
    }

    pub fn cache(&self) -> SharedStatusCache<RemoteStatus> {
        Arc::clone(&self.cache)
    }

    fn lock_cache(&self) -> MutexGuard<'_, StatusCache<RemoteStatus>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sync(&mut self, id: &IncrementId) -> Result<SyncReport, SyncError> {
        let settings = self.options.settings;
        if settings.all_disabled() {
            tracing::debug!(increment = %id, "all sync gates closed; nothing to do");
            return Ok(SyncReport::noop(id));
        }

        let mut report = SyncReport::new(id);
        let record = self.metadata.read(id)?;
        let record = self.sync_content(id, record, &mut report)?;
        self.sync_status(id, &record, &mut report)?;

        tracing::info!(
            increment = %id,
            tool = self.tracker.tool(),
            remote_calls = report.remote_calls,
            events = report.events_appended,
            failed = report.has_failures(),
            "sync finished"
        );
        Ok(report)
    }

    fn link_for_tool<'a>(&self, record: &'a MetadataRecord) -> Option<&'a ExternalLink> {
        record
            .external
            .as_ref()
            .filter(|link| link.tool == self.tracker.tool())
    }

    fn sync_content(
        &mut self,
        id: &IncrementId,
        record: MetadataRecord,
        report: &mut SyncReport,
    ) -> Result<MetadataRecord, SyncError> {
        let gate = if id.origin().is_external() {
            Gate::UpdateExternalItems
        } else {
            Gate::UpsertInternalItems
        };
        if !gate.is_open(&self.options.settings) {
            report.steps.push(SyncStep::Skipped { gate });
            return Ok(record);
        }

        let text = self.metadata.mirror().read_text(id)?;
        let hash = content_hash(&text);
        let payload = ItemPayload {
            increment_id: id.to_string(),
            title: document_title(&text).unwrap_or_else(|| id.to_string()),
            body: text,
            status: record.status,
            content_hash: hash.clone(),
        };
        let status = record.status.as_str();

        let Some(link) = self.link_for_tool(&record).cloned() else {
            if id.origin().is_external() {
                report.steps.push(SyncStep::NotLinked);
                return Ok(record);
            }
            let outcome = self.retry.execute(|_| self.tracker.create_item(&payload));
            let result = outcome.result;
            self.record_call(
                report,
                id,
                SyncOperation::CreateItem,
                SyncDirection::ToExternal,
                (status, status),
                outcome.attempts,
                result.as_ref().err(),
            )?;
            return match result {
                Ok(item) => {
                    let link = ExternalLink {
                        tool: self.tracker.tool().to_string(),
                        item_id: item.item_id.clone(),
                        url: item.url,
                        content_hash: Some(hash),
                    };
                    let record = self.metadata.set_external_link(id, Some(link))?;
                    report.steps.push(SyncStep::Created {
                        item_id: item.item_id,
                    });
                    Ok(record)
                }
                Err(err) => {
                    report.steps.push(failed(SyncOperation::CreateItem, &err));
                    Ok(record)
                }
            };
        };

        if link.content_hash.as_deref() == Some(hash.as_str()) {
            report.steps.push(SyncStep::Unchanged {
                item_id: link.item_id,
            });
            return Ok(record);
        }

        let outcome = self
            .retry
            .execute(|_| self.tracker.update_item(&link.item_id, &payload));
        let result = outcome.result;
        self.record_call(
            report,
            id,
            SyncOperation::UpdateItem,
            SyncDirection::ToExternal,
            (status, status),
            outcome.attempts,
            result.as_ref().err(),
        )?;
        match result {
            Ok(()) => {
                let item_id = link.item_id.clone();
                let record = self.metadata.set_external_link(
                    id,
                    Some(ExternalLink {
                        content_hash: Some(hash),
                        ..link
                    }),
                )?;
                report.steps.push(SyncStep::Updated { item_id });
                Ok(record)
            }
            Err(err) => {
                report.steps.push(failed(SyncOperation::UpdateItem, &err));
                Ok(record)
            }
        }
    }

    fn sync_status(
        &mut self,
        id: &IncrementId,
        record: &MetadataRecord,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if !Gate::UpdateStatus.is_open(&self.options.settings) {
            report.steps.push(SyncStep::Skipped {
                gate: Gate::UpdateStatus,
            });
            return Ok(());
        }
        let Some(link) = self.link_for_tool(record).cloned() else {
            if !report.steps.contains(&SyncStep::NotLinked) {
                report.steps.push(SyncStep::NotLinked);
            }
            return Ok(());
        };

        let local = record.status;
        let key = format!("{}:{}", link.tool, link.item_id);
        let cached = self.lock_cache().get(&key);
        let remote = match cached {
            Some(cached) => {
                tracing::debug!(increment = %id, key = %key, "remote status from cache");
                cached
            }
            None => {
                let outcome = self.retry.execute(|_| self.tracker.read_status(&link.item_id));
                let remote_label = outcome
                    .result
                    .as_ref()
                    .map(|remote| remote.status.clone())
                    .unwrap_or_else(|_| local.as_str().to_string());
                self.record_call(
                    report,
                    id,
                    SyncOperation::ReadStatus,
                    SyncDirection::FromExternal,
                    (remote_label.as_str(), local.as_str()),
                    outcome.attempts,
                    outcome.result.as_ref().err(),
                )?;
                match outcome.result {
                    Ok(remote) => {
                        self.lock_cache().set(key.clone(), remote.clone());
                        remote
                    }
                    Err(err) => {
                        report.steps.push(failed(SyncOperation::ReadStatus, &err));
                        return Ok(());
                    }
                }
            }
        };

        if remote.local() == Some(local) {
            report.steps.push(SyncStep::StatusInSync { status: local });
            return Ok(());
        }

        let conflict = ConflictContext {
            increment_id: id.to_string(),
            tool: link.tool.clone(),
            local_status: local,
            local_timestamp_ms: record.last_activity_ms,
            remote: remote.clone(),
            strategy: self.options.strategy,
        };
        let (resolution, user_choice) = self.resolve(&conflict);
        tracing::info!(
            increment = %id,
            local = %local,
            remote = %remote.status,
            strategy = self.options.strategy.as_str(),
            resolution = resolution.as_str(),
            "status conflict"
        );

        let mut error = None;
        let applied = match resolution {
            Resolution::Deferred => false,
            Resolution::UseLocal => {
                let outcome = self
                    .retry
                    .execute(|_| self.tracker.update_status(&link.item_id, local));
                self.record_call(
                    report,
                    id,
                    SyncOperation::UpdateStatus,
                    SyncDirection::ToExternal,
                    (remote.status.as_str(), local.as_str()),
                    outcome.attempts,
                    outcome.result.as_ref().err(),
                )?;
                self.lock_cache().invalidate(&key);
                match outcome.result {
                    Ok(()) => true,
                    Err(err) => {
                        error = Some(err.to_string());
                        false
                    }
                }
            }
            Resolution::UseRemote => match remote.local() {
                None => {
                    error = Some(format!("unrecognized remote status {:?}", remote.status));
                    false
                }
                Some(target) => match self.metadata.update_status(id, target, None) {
                    Ok(_) => true,
                    Err(err @ StoreError::InvalidTransition(_)) => {
                        tracing::warn!(increment = %id, error = %err, "remote status not applied");
                        error = Some(err.to_string());
                        false
                    }
                    Err(err) => return Err(err.into()),
                },
            },
        };

        let event = ConflictEvent {
            increment_id: id.to_string(),
            tool: link.tool.clone(),
            local_status: local.as_str().to_string(),
            remote_status: remote.status.clone(),
            local_timestamp: record.last_activity_ms,
            remote_timestamp: remote.updated_at_ms,
            resolution_strategy: self.options.strategy,
            resolved_to: resolution,
            timestamp: self.metadata.now_ms(),
            triggered_by: self.options.triggered_by.clone(),
            user_choice,
            applied,
            error,
        };
        self.events.append_conflict(event.clone())?;
        report.events_appended += 1;
        report.conflict = Some(event);
        report.steps.push(SyncStep::StatusConflict {
            resolution,
            applied,
        });
        Ok(())
    }

    fn resolve(&self, conflict: &ConflictContext) -> (Resolution, Option<String>) {
        match conflict.strategy {
            ConflictStrategy::SpecweaveWins => (Resolution::UseLocal, None),
            ConflictStrategy::ExternalWins => (Resolution::UseRemote, None),
            ConflictStrategy::LastWriteWins => {
                if conflict.remote.updated_at_ms > conflict.local_timestamp_ms {
                    (Resolution::UseRemote, None)
                } else {
                    (Resolution::UseLocal, None)
                }
            }
            ConflictStrategy::Prompt => {
                let Some(prompt) = self.prompt.as_ref() else {
                    return (Resolution::Deferred, None);
                };
                let choice = prompt.choose(conflict);
                let resolution = match choice {
                    PromptChoice::UseLocal => Resolution::UseLocal,
                    PromptChoice::UseRemote => Resolution::UseRemote,
                    PromptChoice::Skip => Resolution::Deferred,
                };
                (resolution, Some(resolution.as_str().to_string()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_call(
        &self,
        report: &mut SyncReport,
        id: &IncrementId,
        operation: SyncOperation,
        direction: SyncDirection,
        (from_status, to_status): (&str, &str),
        attempts: u32,
        error: Option<&RemoteError>,
    ) -> Result<(), SyncError> {
        report.remote_calls += attempts;
        if let Some(err) = error {
            tracing::warn!(
                increment = %id,
                operation = operation.as_str(),
                attempts,
                error = %err,
                "tracker call failed"
            );
        }
        self.events.append_sync(SyncEvent {
            increment_id: id.to_string(),
            tool: self.tracker.tool().to_string(),
            operation: Some(operation),
            from_status: from_status.to_string(),
            to_status: to_status.to_string(),
            timestamp: self.metadata.now_ms(),
            triggered_by: self.options.triggered_by.clone(),
            success: error.is_none(),
            direction,
            error: error.map(ToString::to_string),
            attempts: Some(attempts),
        })?;
        report.events_appended += 1;
        Ok(())
    }
}

fn failed(operation: SyncOperation, err: &RemoteError) -> SyncStep {
    SyncStep::Failed {
        operation,
        error: err.to_string(),
    }
}

/// `title` from the front-matter, else the first `# ` heading of the body.
fn document_title(text: &str) -> Option<String> {
    let (fields, body) = match FrontMatter::parse(text) {
        Ok(front) => {
            let body = text.get(front.body_offset..).unwrap_or_default();
            (Some(front.fields), body)
        }
        Err(_) => (None, text),
    };
    if let Some(title) = fields
        .as_ref()
        .and_then(|fields| fields.get("title"))
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|title| !title.is_empty())
    {
        return Some(title.to_string());
    }
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_front_matter() {
        let text = "---\nstatus: active\ntitle: \"Login flow\"\n---\n# Other\n";
        assert_eq!(document_title(text).as_deref(), Some("Login flow"));
    }

    #[test]
    fn title_falls_back_to_heading() {
        let text = "---\nstatus: active\n---\n\nintro\n# Checkout redesign\n";
        assert_eq!(document_title(text).as_deref(), Some("Checkout redesign"));
        assert_eq!(document_title("no heading here"), None);
    }

    #[test]
    fn options_follow_project_config() {
        let mut config = ProjectConfig::default();
        config.sync.settings.can_update_status = true;
        config.sync.status_sync.conflict_resolution = ConflictStrategy::ExternalWins;
        config.sync.status_sync.cache_ttl_secs = 2;
        let options = EngineOptions::from_config(&config);
        assert!(options.settings.can_update_status);
        assert_eq!(options.strategy, ConflictStrategy::ExternalWins);
        assert_eq!(options.cache_ttl_ms, 2_000);
    }
}
