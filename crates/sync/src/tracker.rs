#![forbid(unsafe_code)]

use sha2::Digest as _;
use std::fmt::Write as _;
use sw_core::Status;
use sw_core::retry::RemoteError;
use sw_storage::config::ConflictStrategy;

/// What gets pushed to the tracker for one increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemPayload {
    pub increment_id: String,
    pub title: String,
    pub body: String,
    pub status: Status,
    pub content_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteItem {
    pub item_id: String,
    pub url: Option<String>,
}

/// Tracker-side status. Kept as the tracker's own label; mapping to [`Status`] is done by
/// [`RemoteStatus::local`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteStatus {
    pub status: String,
    pub updated_at_ms: i64,
}

impl RemoteStatus {
    pub fn new(status: impl Into<String>, updated_at_ms: i64) -> Self {
        Self {
            status: status.into(),
            updated_at_ms,
        }
    }

    /// Local status equivalent, when the label is one we know.
    pub fn local(&self) -> Option<Status> {
        let normalized = self.status.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "planning" | "open" | "todo" | "to-do" | "backlog" => Some(Status::Planning),
            "active" | "in-progress" | "doing" => Some(Status::Active),
            "paused" | "on-hold" | "blocked" => Some(Status::Paused),
            "completed" | "closed" | "done" | "resolved" => Some(Status::Completed),
            "abandoned" | "won't-do" | "wont-do" | "cancelled" | "canceled" => {
                Some(Status::Abandoned)
            }
            _ => None,
        }
    }
}

/// Client for one external tracker (GitHub, Jira, ...). Implementations perform a single
/// attempt; retries are applied by the engine.
pub trait IssueTracker: Send + Sync {
    fn tool(&self) -> &str;
    fn create_item(&self, payload: &ItemPayload) -> Result<RemoteItem, RemoteError>;
    fn update_item(&self, item_id: &str, payload: &ItemPayload) -> Result<(), RemoteError>;
    fn read_status(&self, item_id: &str) -> Result<RemoteStatus, RemoteError>;
    fn update_status(&self, item_id: &str, status: Status) -> Result<(), RemoteError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictContext {
    pub increment_id: String,
    pub tool: String,
    pub local_status: Status,
    pub local_timestamp_ms: i64,
    pub remote: RemoteStatus,
    pub strategy: ConflictStrategy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptChoice {
    UseLocal,
    UseRemote,
    Skip,
}

/// Interactive resolver for the `prompt` strategy.
pub trait ConflictPrompt: Send + Sync {
    fn choose(&self, conflict: &ConflictContext) -> PromptChoice;
}

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let digest = sha2::Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_hex() {
        let hash = content_hash("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(content_hash("abc "), hash);
    }

    #[test]
    fn remote_labels_map_to_local_status() {
        assert_eq!(RemoteStatus::new("In Progress", 0).local(), Some(Status::Active));
        assert_eq!(RemoteStatus::new("closed", 0).local(), Some(Status::Completed));
        assert_eq!(RemoteStatus::new("on_hold", 0).local(), Some(Status::Paused));
        assert_eq!(RemoteStatus::new("triage", 0).local(), None);
    }
}
