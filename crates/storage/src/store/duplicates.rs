#![forbid(unsafe_code)]

use super::error::StoreError;
use super::metadata::{ExternalLink, MetadataRecord};
use crate::layout::{METADATA_FILE, ProjectLayout, REPORTS_DIR, SPECWEAVE_DIR};
use crate::{codec, fsio};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use sw_core::Status;
use sw_core::clock::{Clock, SystemClock};
use sw_core::duplicates::{DuplicateLocation, DuplicateResolution, StorageArea, resolve};
use sw_core::ids::IncrementNumber;
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Must be set for anything to be deleted.
    pub confirm: bool,
    /// Copy conflicting copies' reports and unknown metadata keys into the canonical copy.
    pub merge: bool,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub number: IncrementNumber,
    pub canonical: PathBuf,
    pub merged: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub dry_run: bool,
}

/// Finds increments whose number occurs in more than one folder across the storage areas.
#[derive(Clone)]
pub struct DuplicateDetector {
    layout: ProjectLayout,
    clock: Arc<dyn Clock>,
}

impl DuplicateDetector {
    pub fn new(layout: ProjectLayout) -> Self {
        Self::with_clock(layout, Arc::new(SystemClock))
    }

    pub fn with_clock(layout: ProjectLayout, clock: Arc<dyn Clock>) -> Self {
        Self { layout, clock }
    }

    /// Every increment folder, grouped by number. Groups of one are included.
    pub fn locations(&self) -> Result<BTreeMap<IncrementNumber, Vec<DuplicateLocation>>, StoreError> {
        let mut groups: BTreeMap<IncrementNumber, Vec<DuplicateLocation>> = BTreeMap::new();
        for area in StorageArea::ALL {
            let dir = self.layout.area_dir(area);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(['.', '_']) || !name.contains('-') {
                    continue;
                }
                let Some(number) = IncrementNumber::from_name(&name) else {
                    continue;
                };
                let location = inspect(&entry.path(), name, area)?;
                groups.entry(number).or_default().push(location);
            }
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Ok(groups)
    }

    /// Dry-run verdicts for every duplicated number. Nothing is modified.
    pub fn scan(&self) -> Result<Vec<DuplicateResolution>, StoreError> {
        let groups = self.locations()?;
        let out: Vec<DuplicateResolution> = groups
            .into_iter()
            .filter_map(|(number, locations)| resolve(number, locations))
            .collect();
        if !out.is_empty() {
            tracing::warn!(count = out.len(), "duplicate increments detected");
        }
        Ok(out)
    }

    /// All folders for one number (`42`, `0042`, `0042E`), even when there is only one.
    pub fn detect_by_number(&self, raw: &str) -> Result<Vec<DuplicateLocation>, StoreError> {
        let number = IncrementNumber::parse_loose(raw)
            .ok_or(StoreError::InvalidInput("increment number must be 1-4 digits"))?;
        Ok(self.locations()?.remove(&number).unwrap_or_default())
    }

    pub fn execute(
        &self,
        resolution: &DuplicateResolution,
        options: ResolveOptions,
    ) -> Result<ResolutionOutcome, StoreError> {
        if !options.dry_run && !options.confirm {
            return Err(StoreError::ConfirmationRequired);
        }
        let increments_dir = self.layout.increments_dir();
        let canonical = &resolution.canonical;
        if resolution
            .conflicting
            .iter()
            .any(|loc| !loc.path.starts_with(&increments_dir) || loc.path == canonical.path)
        {
            return Err(StoreError::InvalidInput(
                "conflicting copies must live under the increments directory",
            ));
        }

        let mut merged = Vec::new();
        if options.merge {
            let mut planned = HashSet::new();
            for loser in &resolution.conflicting {
                merged.extend(merge_reports(
                    &canonical.path,
                    loser,
                    &mut planned,
                    options.dry_run,
                )?);
                merge_metadata_keys(&canonical.path, &loser.path, options.dry_run)?;
            }
        }

        let mut deleted = Vec::new();
        for loser in &resolution.conflicting {
            if !options.dry_run {
                fs::remove_dir_all(&loser.path)?;
                tracing::info!(path = %loser.path.display(), "removed duplicate increment copy");
            }
            deleted.push(loser.path.clone());
        }

        let report_path = if options.dry_run {
            None
        } else {
            let now = self.clock.now_ms();
            let path = canonical
                .path
                .join(REPORTS_DIR)
                .join(format!("DUPLICATE-RESOLUTION-{now}.md"));
            let text = render_report(resolution, &merged, &codec::ms_to_rfc3339(now));
            fsio::write_atomic(&path, text.as_bytes())?;
            Some(path)
        };

        Ok(ResolutionOutcome {
            number: resolution.number,
            canonical: canonical.path.clone(),
            merged,
            deleted,
            report_path,
            dry_run: options.dry_run,
        })
    }
}

fn read_metadata_value(dir: &Path) -> Option<Value> {
    let path = dir.join(METADATA_FILE);
    let text = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<Value>(&text) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "corrupt metadata; treating status as unknown");
            None
        }
    }
}

fn has_link(meta: &Value) -> bool {
    let external = meta
        .pointer("/external/itemId")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    let legacy = meta
        .pointer("/github/issue")
        .is_some_and(|issue| !issue.is_null());
    external || legacy
}

fn modified_ms(path: &Path) -> Result<i64, StoreError> {
    let modified = fs::metadata(path)?.modified()?;
    let ms = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Ok(i64::try_from(ms).unwrap_or(i64::MAX))
}

fn walk_files(root: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != SPECWEAVE_DIR)
}

fn inspect(path: &Path, name: String, area: StorageArea) -> Result<DuplicateLocation, StoreError> {
    let meta = read_metadata_value(path);
    let status = meta
        .as_ref()
        .and_then(|m| m.get("status"))
        .and_then(Value::as_str)
        .and_then(Status::parse);
    let last_activity_ms = match meta
        .as_ref()
        .and_then(|m| m.get("lastActivity"))
        .and_then(|v| match v {
            Value::String(s) => codec::rfc3339_to_ms(s),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }) {
        Some(ms) => ms,
        None => modified_ms(path)?,
    };
    let has_external_link = meta.as_ref().is_some_and(has_link);

    let mut file_count = 0usize;
    let mut total_size = 0u64;
    for entry in walk_files(path) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            file_count += 1;
            total_size += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }

    let reports = path.join(REPORTS_DIR);
    let has_reports = reports.is_dir()
        && walk_files(&reports)
            .filter_map(Result::ok)
            .any(|e| e.file_type().is_file());

    Ok(DuplicateLocation {
        path: path.to_path_buf(),
        name,
        area,
        status,
        last_activity_ms,
        file_count,
        total_size,
        has_reports,
        has_external_link,
    })
}

/// Target for a report copied from `loser`. Names already on disk or already planned get a
/// `-MERGED-<loser>` suffix, then a counter.
fn merge_target(target: PathBuf, loser_name: &str, planned: &mut HashSet<PathBuf>) -> PathBuf {
    let taken = |path: &Path, planned: &HashSet<PathBuf>| path.exists() || planned.contains(path);
    if !taken(&target, planned) {
        planned.insert(target.clone());
        return target;
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut attempt = 1u32;
    loop {
        let suffix = match attempt {
            1 => format!("-MERGED-{loser_name}"),
            n => format!("-MERGED-{loser_name}-{n}"),
        };
        let candidate = target.with_file_name(format!("{stem}{suffix}{ext}"));
        if !taken(&candidate, planned) {
            planned.insert(candidate.clone());
            return candidate;
        }
        attempt += 1;
    }
}

fn merge_reports(
    canonical: &Path,
    loser: &DuplicateLocation,
    planned: &mut HashSet<PathBuf>,
    dry_run: bool,
) -> Result<Vec<PathBuf>, StoreError> {
    let source = loser.path.join(REPORTS_DIR);
    if !source.is_dir() {
        return Ok(Vec::new());
    }
    let dest_root = canonical.join(REPORTS_DIR);
    let mut merged = Vec::new();
    for entry in walk_files(&source) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&source) else {
            continue;
        };
        let target = merge_target(dest_root.join(relative), &loser.name, planned);
        if !dry_run {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
        merged.push(target);
    }
    Ok(merged)
}

fn read_metadata_record(dir: &Path) -> Option<MetadataRecord> {
    let path = dir.join(METADATA_FILE);
    let text = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&text)
        .inspect_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "canonical metadata unreadable; keys not merged");
        })
        .ok()
}

/// Adds metadata keys the canonical copy lacks (e.g. a second tracker link). Existing keys and
/// their order are kept.
fn merge_metadata_keys(canonical: &Path, loser: &Path, dry_run: bool) -> Result<(), StoreError> {
    let Some(Value::Object(source)) = read_metadata_value(loser) else {
        return Ok(());
    };
    let Some(mut record) = read_metadata_record(canonical) else {
        return Ok(());
    };
    let Value::Object(present) = serde_json::to_value(&record)? else {
        return Ok(());
    };
    let mut changed = false;
    for (key, value) in source {
        if present.contains_key(&key) {
            continue;
        }
        match key.as_str() {
            "external" => match serde_json::from_value::<ExternalLink>(value) {
                Ok(link) => record.external = Some(link),
                Err(_) => continue,
            },
            "pausedReason" => match value {
                Value::String(reason) => record.paused_reason = Some(reason),
                _ => continue,
            },
            _ => {
                record.extra.insert(key, value);
            }
        }
        changed = true;
    }
    if changed && !dry_run {
        fsio::write_json_atomic(&canonical.join(METADATA_FILE), &record)?;
    }
    Ok(())
}

fn describe(loc: &DuplicateLocation) -> String {
    let status = loc.status.map(Status::as_str).unwrap_or("unknown");
    format!(
        "- `{}` ({} area, status {status}, {} files, last activity {})",
        loc.name,
        loc.area.as_str(),
        loc.file_count,
        codec::ms_to_rfc3339(loc.last_activity_ms)
    )
}

fn render_report(resolution: &DuplicateResolution, merged: &[PathBuf], resolved_at: &str) -> String {
    let mut out = String::new();
    out.push_str("# Duplicate Resolution Report\n\n");
    out.push_str(&format!("**Increment**: {}\n", resolution.number));
    out.push_str(&format!("**Resolved**: {resolved_at}\n"));
    out.push_str(&format!("**Reason**: {}\n", resolution.reason()));
    out.push_str(&format!(
        "**Action**: {}\n\n",
        resolution.suggested_action.as_str()
    ));
    out.push_str("## Kept\n\n");
    out.push_str(&describe(&resolution.canonical));
    out.push_str("\n\n## Removed\n\n");
    for loser in &resolution.conflicting {
        out.push_str(&describe(loser));
        out.push('\n');
    }
    if !merged.is_empty() {
        out.push_str("\n## Merged files\n\n");
        for path in merged {
            out.push_str(&format!("- {}\n", path.display()));
        }
    }
    out
}
