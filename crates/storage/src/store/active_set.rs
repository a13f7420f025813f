#![forbid(unsafe_code)]

use super::error::StoreError;
use super::metadata::MetadataStore;
use crate::{codec, fsio};
use serde::{Deserialize, Serialize};
use sw_core::Status;
use sw_core::ids::IncrementId;

/// Upper bound on concurrently active increments kept in the cache.
pub const MAX_ACTIVE: usize = 2;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveStateFile {
    #[serde(default)]
    ids: Vec<String>,
    /// Single-id shape written by older versions; also kept as "primary" for them.
    #[serde(default)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

/// Derived cache of the (at most two) active increments. Always rebuilt, never patched.
#[derive(Clone, Debug)]
pub struct ActiveSetTracker {
    metadata: MetadataStore,
}

impl ActiveSetTracker {
    pub fn new(metadata: MetadataStore) -> Self {
        Self { metadata }
    }

    pub fn get_active(&self) -> Vec<String> {
        let path = self.metadata.layout().active_state_path();
        let text = match fsio::read_optional(&path) {
            Ok(Some(text)) => text,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "active increment cache unreadable");
                return Vec::new();
            }
        };
        let state = match serde_json::from_str::<ActiveStateFile>(&text) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "active increment cache malformed");
                return Vec::new();
            }
        };
        let mut ids = state.ids;
        if ids.is_empty()
            && let Some(id) = state.id
        {
            ids.push(id);
        }
        ids.truncate(MAX_ACTIVE);
        ids
    }

    pub fn get_primary(&self) -> Option<String> {
        self.get_active().into_iter().next()
    }

    /// Recomputes the set from metadata: active records, most recent activity first, ids
    /// ascending on ties, truncated to [`MAX_ACTIVE`].
    pub fn smart_update(&self) -> Result<Vec<String>, StoreError> {
        let mut active = self.metadata.get_active()?;
        active.sort_by(|a, b| {
            b.last_activity_ms
                .cmp(&a.last_activity_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        let ids: Vec<String> = active
            .into_iter()
            .take(MAX_ACTIVE)
            .map(|record| record.id)
            .collect();

        let state = ActiveStateFile {
            id: ids.first().cloned(),
            ids: ids.clone(),
            last_updated: Some(codec::ms_to_rfc3339(self.metadata.now_ms())),
        };
        fsio::write_json_atomic(&self.metadata.layout().active_state_path(), &state)?;
        Ok(ids)
    }

    /// `true` when every cached id is still active. Otherwise rebuilds and returns `false`.
    pub fn validate(&self) -> Result<bool, StoreError> {
        let cached = self.get_active();
        let stale = cached.iter().find(|raw| {
            let Ok(id) = IncrementId::try_new(raw.as_str()) else {
                return true;
            };
            !matches!(self.metadata.read(&id), Ok(record) if record.status == Status::Active)
        });
        if let Some(stale) = stale {
            tracing::info!(increment = %stale, "active cache out of date; rebuilding");
            self.smart_update()?;
            return Ok(false);
        }
        Ok(true)
    }
}
