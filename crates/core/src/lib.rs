#![forbid(unsafe_code)]

pub mod completion;
pub mod duplicates;
pub mod lifecycle;
pub mod retry;

pub use lifecycle::{Status, TransitionError};

pub mod ids {
    use std::fmt;

    /// Stable increment identifier, `NNNN-slug` (`NNNNE-slug` for items imported from a tracker).
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct IncrementId(String);

    impl IncrementId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn into_string(self) -> String {
            self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IncrementIdError> {
            let value = value.into();
            validate_increment_id(&value)?;
            Ok(Self(value))
        }

        pub fn number(&self) -> IncrementNumber {
            // Validated on construction.
            IncrementNumber::from_name(&self.0).unwrap_or(IncrementNumber {
                origin: ItemOrigin::Internal(0),
            })
        }

        pub fn origin(&self) -> ItemOrigin {
            self.number().origin
        }
    }

    impl fmt::Display for IncrementId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IncrementIdError {
        Empty,
        TooLong,
        MissingNumber,
        InvalidChar { ch: char, index: usize },
    }

    impl IncrementIdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "increment id must not be empty",
                Self::TooLong => "increment id is too long",
                Self::MissingNumber => "increment id must start with a 4-digit number",
                Self::InvalidChar { .. } => "increment id contains an invalid character",
            }
        }
    }

    impl fmt::Display for IncrementIdError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::InvalidChar { ch, index } => {
                    write!(f, "{} ({ch:?} at {index})", self.message())
                }
                _ => f.write_str(self.message()),
            }
        }
    }

    impl std::error::Error for IncrementIdError {}

    fn validate_increment_id(value: &str) -> Result<(), IncrementIdError> {
        if value.is_empty() {
            return Err(IncrementIdError::Empty);
        }
        if value.len() > 128 {
            return Err(IncrementIdError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(IncrementIdError::InvalidChar { ch, index });
        }
        if IncrementNumber::from_name(value).is_none() {
            return Err(IncrementIdError::MissingNumber);
        }
        Ok(())
    }

    /// Where a tracked item was born: inside this system, or imported from an external tracker.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum ItemOrigin {
        Internal(u32),
        External(u32),
    }

    impl ItemOrigin {
        pub fn number(self) -> u32 {
            match self {
                Self::Internal(n) | Self::External(n) => n,
            }
        }

        pub fn is_external(self) -> bool {
            matches!(self, Self::External(_))
        }

        /// Parses the provenance suffix convention: `0012` is internal, `0012E` external.
        pub fn parse(raw: &str) -> Option<Self> {
            let raw = raw.trim();
            let (digits, external) = match raw.strip_suffix(['E', 'e']) {
                Some(rest) => (rest, true),
                None => (raw, false),
            };
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let n = digits.parse::<u32>().ok()?;
            Some(if external {
                Self::External(n)
            } else {
                Self::Internal(n)
            })
        }
    }

    /// Normalized numeric part of an increment folder name, used to group copies of one increment.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct IncrementNumber {
        pub origin: ItemOrigin,
    }

    impl IncrementNumber {
        /// Accepts `0001-slug`, `0001E-slug` and a bare `0001` / `0001E`.
        pub fn from_name(name: &str) -> Option<Self> {
            let prefix = name.split('-').next()?;
            let digits = prefix.trim_end_matches(['E', 'e']);
            if digits.len() != 4 || prefix.len() > 5 {
                return None;
            }
            let origin = ItemOrigin::parse(prefix)?;
            Some(Self { origin })
        }

        /// Lenient form for user input: `42` and `0042` both name increment 42.
        pub fn parse_loose(raw: &str) -> Option<Self> {
            let origin = ItemOrigin::parse(raw)?;
            if origin.number() > 9999 {
                return None;
            }
            Some(Self { origin })
        }
    }

    impl fmt::Display for IncrementNumber {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.origin {
                ItemOrigin::Internal(n) => write!(f, "{n:04}"),
                ItemOrigin::External(n) => write!(f, "{n:04}E"),
            }
        }
    }
}

pub mod model {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub enum IncrementType {
        #[default]
        Feature,
        Hotfix,
        Bug,
        ChangeRequest,
        Refactor,
        Experiment,
    }

    impl IncrementType {
        pub const ALL: [IncrementType; 6] = [
            IncrementType::Feature,
            IncrementType::Hotfix,
            IncrementType::Bug,
            IncrementType::ChangeRequest,
            IncrementType::Refactor,
            IncrementType::Experiment,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                IncrementType::Feature => "feature",
                IncrementType::Hotfix => "hotfix",
                IncrementType::Bug => "bug",
                IncrementType::ChangeRequest => "change-request",
                IncrementType::Refactor => "refactor",
                IncrementType::Experiment => "experiment",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            let value = value.trim();
            Self::ALL
                .iter()
                .copied()
                .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value))
        }
    }
}

pub mod clock {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// Millisecond wall clock. Injected everywhere a timestamp or TTL is involved.
    pub trait Clock: Send + Sync {
        fn now_ms(&self) -> i64;
    }

    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now_ms(&self) -> i64 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::from_secs(0))
                .as_millis()
                .min(i64::MAX as u128) as i64
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now_ms: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self {
                now_ms: AtomicI64::new(start_ms),
            }
        }

        pub fn set(&self, now_ms: i64) {
            self.now_ms.store(now_ms, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_ms: i64) {
            self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now_ms.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ids::*;
    use super::model::IncrementType;

    #[test]
    fn increment_id_validation() {
        assert_eq!(IncrementId::try_new("").unwrap_err(), IncrementIdError::Empty);
        assert_eq!(
            IncrementId::try_new("feature-x").unwrap_err(),
            IncrementIdError::MissingNumber
        );
        assert_eq!(
            IncrementId::try_new("001-short").unwrap_err(),
            IncrementIdError::MissingNumber
        );
        assert!(matches!(
            IncrementId::try_new("0001-bad/slash").unwrap_err(),
            IncrementIdError::InvalidChar { ch: '/', .. }
        ));
        let id = IncrementId::try_new("0001-test").expect("valid id");
        assert_eq!(id.origin(), ItemOrigin::Internal(1));
        assert_eq!(id.number().to_string(), "0001");
    }

    #[test]
    fn provenance_suffix_is_a_tagged_variant() {
        let id = IncrementId::try_new("0012E-imported-epic").expect("valid id");
        assert_eq!(id.origin(), ItemOrigin::External(12));
        assert!(id.origin().is_external());
        assert_eq!(id.number().to_string(), "0012E");

        assert_eq!(ItemOrigin::parse("0007"), Some(ItemOrigin::Internal(7)));
        assert_eq!(ItemOrigin::parse("7e"), Some(ItemOrigin::External(7)));
        assert_eq!(ItemOrigin::parse("E"), None);
        assert_eq!(ItemOrigin::parse("12x"), None);
    }

    #[test]
    fn loose_numbers_normalize_to_four_digits() {
        let a = IncrementNumber::parse_loose("42").expect("42");
        let b = IncrementNumber::from_name("0042-test").expect("folder");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0042");
        assert!(IncrementNumber::from_name("some-folder").is_none());
        assert!(IncrementNumber::from_name(".git").is_none());
    }

    #[test]
    fn increment_type_round_trips_through_str() {
        for kind in IncrementType::ALL {
            assert_eq!(IncrementType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(
            IncrementType::parse("Change-Request"),
            Some(IncrementType::ChangeRequest)
        );
        assert_eq!(IncrementType::parse("epic"), None);
    }
}
