#![forbid(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod engine;
mod error;
pub mod event_log;
pub mod retry;
pub mod tracker;

pub use engine::{EngineOptions, ExternalSyncEngine, Gate, SyncReport, SyncStep};
pub use error::SyncError;
