#![forbid(unsafe_code)]

use crate::layout::ProjectLayout;
use crate::{StoreError, fsio};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Permission gates for outbound tracker writes. Everything is off unless configured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub can_upsert_internal_items: bool,
    pub can_update_external_items: bool,
    pub can_update_status: bool,
}

impl SyncSettings {
    pub fn all_disabled(&self) -> bool {
        !(self.can_upsert_internal_items || self.can_update_external_items || self.can_update_status)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    Prompt,
    #[default]
    LastWriteWins,
    SpecweaveWins,
    ExternalWins,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::Prompt => "prompt",
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::SpecweaveWins => "specweave-wins",
            ConflictStrategy::ExternalWins => "external-wins",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSyncConfig {
    pub conflict_resolution: ConflictStrategy,
    pub cache_ttl_secs: u64,
}

impl Default for StatusSyncConfig {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictStrategy::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub settings: SyncSettings,
    pub status_sync: StatusSyncConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub sync: SyncConfig,
}

impl ProjectConfig {
    /// Strict load: missing file gives defaults, a malformed one is an error.
    pub fn try_load(layout: &ProjectLayout) -> Result<Self, StoreError> {
        let path = layout.config_path();
        let Some(text) = fsio::read_optional(&path)? else {
            return Ok(Self::default());
        };
        serde_json::from_str(&text).map_err(|err| StoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    pub fn load(layout: &ProjectLayout) -> Self {
        match Self::try_load(layout) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!("config load failed, using defaults: {err}");
                Self::default()
            }
        }
    }

    pub fn save(&self, layout: &ProjectLayout) -> Result<(), StoreError> {
        fsio::write_json_atomic(&layout.config_path(), self)
    }
}
