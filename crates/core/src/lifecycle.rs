#![forbid(unsafe_code)]

use std::fmt;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const PAUSED_STALE_AFTER_MS: i64 = 7 * DAY_MS;
pub const ACTIVE_STALE_AFTER_MS: i64 = 30 * DAY_MS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Planning,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Planning,
        Status::Active,
        Status::Paused,
        Status::Completed,
        Status::Abandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Planning => "planning",
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value))
    }

    /// Edges of the lifecycle graph. Everything not listed here is rejected,
    /// including self-transitions and every edge touching `abandoned`.
    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Planning, Status::Active)
                | (Status::Active, Status::Paused)
                | (Status::Active, Status::Completed)
                | (Status::Paused, Status::Active)
                | (Status::Completed, Status::Active)
        )
    }

    /// Statuses an increment may be created with.
    pub fn is_initial(self) -> bool {
        matches!(self, Status::Planning | Status::Active)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Status,
    pub to: Status,
}

impl TransitionError {
    pub fn message(&self) -> String {
        match (self.from, self.to) {
            (Status::Abandoned, _) => format!(
                "cannot leave abandoned state ({} -> {})",
                self.from, self.to
            ),
            (_, Status::Completed) => format!(
                "only an active increment can be completed ({} -> {})",
                self.from, self.to
            ),
            (from, to) if from == to => format!("increment is already {to}"),
            (from, to) => format!("invalid status transition: {from} -> {to}"),
        }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for TransitionError {}

pub fn validate_transition(from: Status, to: Status) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Paused for more than a week, or active for more than a month without activity.
pub fn is_stale(status: Status, last_activity_ms: i64, now_ms: i64) -> bool {
    let idle_ms = now_ms.saturating_sub(last_activity_ms);
    match status {
        Status::Paused => idle_ms > PAUSED_STALE_AFTER_MS,
        Status::Active => idle_ms > ACTIVE_STALE_AFTER_MS,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: [(Status, Status); 5] = [
        (Status::Planning, Status::Active),
        (Status::Active, Status::Paused),
        (Status::Active, Status::Completed),
        (Status::Paused, Status::Active),
        (Status::Completed, Status::Active),
    ];

    #[test]
    fn transition_grid_matches_lifecycle_graph() {
        for from in Status::ALL {
            for to in Status::ALL {
                let expected = VALID.contains(&(from, to));
                assert_eq!(
                    validate_transition(from, to).is_ok(),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn completed_is_only_reachable_from_active() {
        for from in Status::ALL {
            if from != Status::Active {
                assert!(!from.can_transition_to(Status::Completed), "{from}");
            }
        }
    }

    #[test]
    fn transition_error_messages_are_specific() {
        let err = validate_transition(Status::Planning, Status::Completed).unwrap_err();
        assert!(err.to_string().contains("only an active increment"));
        let err = validate_transition(Status::Active, Status::Active).unwrap_err();
        assert_eq!(err.to_string(), "increment is already active");
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(Status::parse(" Active "), Some(Status::Active));
        assert_eq!(Status::parse("backlog"), None);
    }

    #[test]
    fn staleness_thresholds() {
        let now = 100 * DAY_MS;
        assert!(is_stale(Status::Paused, now - 8 * DAY_MS, now));
        assert!(!is_stale(Status::Paused, now - 6 * DAY_MS, now));
        assert!(is_stale(Status::Active, now - 31 * DAY_MS, now));
        assert!(!is_stale(Status::Completed, 0, now));
    }
}
