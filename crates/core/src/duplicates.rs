#![forbid(unsafe_code)]

//! Canonical-copy selection when one increment number lives in several storage areas.

use crate::ids::IncrementNumber;
use crate::lifecycle::Status;
use std::cmp::Ordering;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageArea {
    Active,
    Archive,
    Abandoned,
}

impl StorageArea {
    pub const ALL: [StorageArea; 3] = [
        StorageArea::Active,
        StorageArea::Archive,
        StorageArea::Abandoned,
    ];

    /// Sub-directory of the increments root; the active area is the root itself.
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            StorageArea::Active => None,
            StorageArea::Archive => Some("_archive"),
            StorageArea::Abandoned => Some("_abandoned"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageArea::Active => "active",
            StorageArea::Archive => "archive",
            StorageArea::Abandoned => "abandoned",
        }
    }

    fn preference(self) -> u8 {
        match self {
            StorageArea::Active => 3,
            StorageArea::Archive => 2,
            StorageArea::Abandoned => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateLocation {
    pub path: PathBuf,
    pub name: String,
    pub area: StorageArea,
    /// `None` when the copy has no readable metadata.
    pub status: Option<Status>,
    pub last_activity_ms: i64,
    pub file_count: usize,
    pub total_size: u64,
    pub has_reports: bool,
    pub has_external_link: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionRule {
    ExternalLink,
    MostRecentActivity,
    MostComplete { file_count: usize },
    PreferredArea(StorageArea),
    FirstFound,
}

impl ResolutionRule {
    pub fn describe(self) -> String {
        match self {
            ResolutionRule::ExternalLink => "only copy linked to the external tracker".to_string(),
            ResolutionRule::MostRecentActivity => "most recent activity".to_string(),
            ResolutionRule::MostComplete { file_count } => {
                format!("most complete ({file_count} files)")
            }
            ResolutionRule::PreferredArea(area) => format!("in {} location", area.as_str()),
            ResolutionRule::FirstFound => "default selection".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuggestedAction {
    /// Fold the conflicting copies' reports into the canonical copy, then remove them.
    MergeIntoCanonical,
    RemoveConflicting,
}

impl SuggestedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestedAction::MergeIntoCanonical => "merge-into-canonical",
            SuggestedAction::RemoveConflicting => "remove-conflicting",
        }
    }
}

/// Dry-run verdict for one increment number. Nothing has been touched when this exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateResolution {
    pub number: IncrementNumber,
    pub canonical: DuplicateLocation,
    pub conflicting: Vec<DuplicateLocation>,
    pub suggested_action: SuggestedAction,
    pub rule: ResolutionRule,
}

impl DuplicateResolution {
    pub fn reason(&self) -> String {
        self.rule.describe()
    }
}

/// Orders locations best-first.
///
/// 1. a copy holding the single external-tracker link wins outright;
/// 2. then most recent activity;
/// 3. then more files;
/// 4. then area preference (active > archive > abandoned), then path.
pub fn select_canonical(locations: &[DuplicateLocation]) -> Option<(usize, ResolutionRule)> {
    if locations.is_empty() {
        return None;
    }

    let linked: Vec<usize> = locations
        .iter()
        .enumerate()
        .filter(|(_, loc)| loc.has_external_link)
        .map(|(idx, _)| idx)
        .collect();
    if let [only] = linked.as_slice() {
        return Some((*only, ResolutionRule::ExternalLink));
    }

    let mut order: Vec<usize> = (0..locations.len()).collect();
    order.sort_by(|a, b| compare_without_link(&locations[*a], &locations[*b]));
    let winner = order[0];
    let rule = explain(&locations[winner], locations, winner);
    Some((winner, rule))
}

fn compare_without_link(a: &DuplicateLocation, b: &DuplicateLocation) -> Ordering {
    b.last_activity_ms
        .cmp(&a.last_activity_ms)
        .then_with(|| b.file_count.cmp(&a.file_count))
        .then_with(|| b.area.preference().cmp(&a.area.preference()))
        .then_with(|| a.path.cmp(&b.path))
}

fn explain(
    winner: &DuplicateLocation,
    all: &[DuplicateLocation],
    winner_idx: usize,
) -> ResolutionRule {
    let others = || {
        all.iter()
            .enumerate()
            .filter(move |(idx, _)| *idx != winner_idx)
            .map(|(_, loc)| loc)
    };
    if others().all(|loc| loc.last_activity_ms < winner.last_activity_ms) {
        return ResolutionRule::MostRecentActivity;
    }
    let tied: Vec<&DuplicateLocation> = others()
        .filter(|loc| loc.last_activity_ms == winner.last_activity_ms)
        .collect();
    if tied.iter().all(|loc| loc.file_count < winner.file_count) {
        return ResolutionRule::MostComplete {
            file_count: winner.file_count,
        };
    }
    if tied
        .iter()
        .filter(|loc| loc.file_count == winner.file_count)
        .all(|loc| loc.area.preference() < winner.area.preference())
    {
        return ResolutionRule::PreferredArea(winner.area);
    }
    ResolutionRule::FirstFound
}

/// Builds the dry-run report for one group. Groups with fewer than two copies are not duplicates.
pub fn resolve(
    number: IncrementNumber,
    locations: Vec<DuplicateLocation>,
) -> Option<DuplicateResolution> {
    if locations.len() < 2 {
        return None;
    }
    let (winner, rule) = select_canonical(&locations)?;
    let mut conflicting = locations;
    let canonical = conflicting.remove(winner);
    let suggested_action = if conflicting.iter().any(|loc| loc.has_reports) {
        SuggestedAction::MergeIntoCanonical
    } else {
        SuggestedAction::RemoveConflicting
    };
    Some(DuplicateResolution {
        number,
        canonical,
        conflicting,
        suggested_action,
        rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(name: &str, area: StorageArea, last_activity_ms: i64) -> DuplicateLocation {
        let dir = area.dir_name().unwrap_or("");
        DuplicateLocation {
            path: PathBuf::from(format!("/p/increments/{dir}/{name}")),
            name: name.to_string(),
            area,
            status: Some(Status::Active),
            last_activity_ms,
            file_count: 4,
            total_size: 100,
            has_reports: false,
            has_external_link: false,
        }
    }

    fn number() -> IncrementNumber {
        IncrementNumber::parse_loose("1").expect("number")
    }

    #[test]
    fn external_link_beats_recency() {
        let a = loc("0001-test", StorageArea::Active, 2_000);
        let mut b = loc("0001-test", StorageArea::Archive, 1_000);
        b.has_external_link = true;

        let report = resolve(number(), vec![a, b]).expect("duplicate");
        assert_eq!(report.canonical.area, StorageArea::Archive);
        assert_eq!(report.rule, ResolutionRule::ExternalLink);
        assert_eq!(report.conflicting.len(), 1);
    }

    #[test]
    fn two_linked_copies_fall_back_to_recency() {
        let mut a = loc("0001-a", StorageArea::Active, 1_000);
        let mut b = loc("0001-b", StorageArea::Archive, 2_000);
        a.has_external_link = true;
        b.has_external_link = true;
        let report = resolve(number(), vec![a, b]).expect("duplicate");
        assert_eq!(report.canonical.name, "0001-b");
        assert_eq!(report.rule, ResolutionRule::MostRecentActivity);
    }

    #[test]
    fn file_count_breaks_recency_ties() {
        let mut small = loc("0006-small", StorageArea::Active, 5_000);
        let mut large = loc("0006-large", StorageArea::Active, 5_000);
        small.file_count = 6;
        large.file_count = 21;
        let report = resolve(number(), vec![small, large]).expect("duplicate");
        assert_eq!(report.canonical.name, "0006-large");
        assert_eq!(report.reason(), "most complete (21 files)");
    }

    #[test]
    fn area_breaks_remaining_ties() {
        let archived = loc("0009-a", StorageArea::Archive, 5_000);
        let active = loc("0009-b", StorageArea::Active, 5_000);
        let abandoned = loc("0009-c", StorageArea::Abandoned, 5_000);
        let report = resolve(number(), vec![archived, abandoned, active]).expect("duplicate");
        assert_eq!(report.canonical.area, StorageArea::Active);
        assert_eq!(report.rule, ResolutionRule::PreferredArea(StorageArea::Active));
    }

    #[test]
    fn reports_on_conflicting_copy_suggest_merge() {
        let a = loc("0002-a", StorageArea::Active, 2_000);
        let mut b = loc("0002-b", StorageArea::Archive, 1_000);
        b.has_reports = true;
        let report = resolve(number(), vec![a, b]).expect("duplicate");
        assert_eq!(report.suggested_action, SuggestedAction::MergeIntoCanonical);
    }

    #[test]
    fn single_copy_is_not_a_duplicate() {
        assert!(resolve(number(), vec![loc("0003-a", StorageArea::Active, 1)]).is_none());
    }
}
