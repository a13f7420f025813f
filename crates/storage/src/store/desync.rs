#![forbid(unsafe_code)]

use super::error::StoreError;
use super::metadata::MetadataStore;
use sw_core::Status;
use sw_core::duplicates::StorageArea;
use sw_core::ids::IncrementId;

/// Metadata and spec.md disagree about an increment's status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesyncReport {
    pub id: String,
    pub metadata_status: Status,
    /// `None` when the document status could not be read at all.
    pub mirror_status: Option<Status>,
    pub mirror_error: Option<String>,
}

/// `Ok(None)` when both copies agree. A missing or broken document counts as a desync.
pub fn detect_desync(
    metadata: &MetadataStore,
    id: &IncrementId,
) -> Result<Option<DesyncReport>, StoreError> {
    let record = metadata.read(id)?;
    let report = match metadata.mirror().read_status(id) {
        Ok(status) if status == record.status => return Ok(None),
        Ok(status) => DesyncReport {
            id: record.id,
            metadata_status: record.status,
            mirror_status: Some(status),
            mirror_error: None,
        },
        Err(err) => DesyncReport {
            id: record.id,
            metadata_status: record.status,
            mirror_status: None,
            mirror_error: Some(err.to_string()),
        },
    };
    Ok(Some(report))
}

pub fn scan_desyncs(metadata: &MetadataStore) -> Result<Vec<DesyncReport>, StoreError> {
    let mut out = Vec::new();
    for record in metadata.list_area(StorageArea::Active)? {
        let id = record.increment_id()?;
        if let Some(report) = detect_desync(metadata, &id)? {
            out.push(report);
        }
    }
    Ok(out)
}

/// Repairs every desynced document in the active area from metadata. Returns repaired ids;
/// documents that cannot be rewritten are logged and left as they are.
pub fn repair_all(metadata: &MetadataStore) -> Result<Vec<String>, StoreError> {
    let mut repaired = Vec::new();
    for report in scan_desyncs(metadata)? {
        let id = IncrementId::try_new(report.id.as_str())?;
        match metadata.mirror().repair(metadata, &id) {
            Ok(_) => repaired.push(report.id),
            Err(err) => tracing::warn!(increment = %id, error = %err, "spec.md repair failed"),
        }
    }
    Ok(repaired)
}
