#![forbid(unsafe_code)]

mod active_set;
mod batch_state;
mod desync;
mod duplicates;
mod error;
mod ledger;
mod metadata;
mod mirror;
mod requests;

pub use active_set::{ActiveSetTracker, MAX_ACTIVE};
pub use batch_state::{BATCH_STATE_TTL_MS, BatchError, BatchState, BatchStateStore};
pub use desync::{DesyncReport, detect_desync, repair_all, scan_desyncs};
pub use duplicates::{DuplicateDetector, ResolutionOutcome, ResolveOptions};
pub use error::StoreError;
pub use ledger::{
    LedgerScan, SpecLedger, TaskLedger, parse_spec, parse_tasks, scan_completion,
    sync_criteria_checkboxes,
};
pub use metadata::{
    DEFAULT_PAUSED_REASON, ExternalLink, MetadataRecord, MetadataStore, MirrorOutcome,
    StatusUpdate,
};
pub use mirror::{DocumentMirror, FrontMatter};
pub use requests::*;
