#![forbid(unsafe_code)]

use super::error::StoreError;
use crate::layout::ProjectLayout;
use crate::{codec, fsio};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sw_core::clock::{Clock, SystemClock};

/// Saved batch progress is discarded after a day.
pub const BATCH_STATE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub id: String,
    pub error: String,
    #[serde(default, with = "codec::timestamp")]
    pub timestamp: i64,
}

/// Progress of an interrupted multi-increment sync (`state/sync-batch.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub errors: Vec<BatchError>,
    #[serde(with = "codec::timestamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_id: Option<String>,
}

#[derive(Clone)]
pub struct BatchStateStore {
    layout: ProjectLayout,
    clock: Arc<dyn Clock>,
}

impl BatchStateStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self::with_clock(layout, Arc::new(SystemClock))
    }

    pub fn with_clock(layout: ProjectLayout, clock: Arc<dyn Clock>) -> Self {
        Self { layout, clock }
    }

    pub fn save(&self, state: &BatchState) -> Result<(), StoreError> {
        fsio::write_json_atomic(&self.layout.batch_state_path(), state)
    }

    /// Saved state, unless missing, unreadable or older than [`BATCH_STATE_TTL_MS`]
    /// (the latter two are deleted).
    pub fn load(&self) -> Result<Option<BatchState>, StoreError> {
        let path = self.layout.batch_state_path();
        let Some(text) = fsio::read_optional(&path)? else {
            return Ok(None);
        };
        let state = match serde_json::from_str::<BatchState>(&text) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "discarding unreadable batch state");
                self.clear()?;
                return Ok(None);
            }
        };
        let age_ms = self.clock.now_ms().saturating_sub(state.timestamp);
        if age_ms > BATCH_STATE_TTL_MS {
            tracing::info!(age_ms, "discarding expired batch state");
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(state))
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        fsio::remove_if_exists(&self.layout.batch_state_path())?;
        Ok(())
    }
}
