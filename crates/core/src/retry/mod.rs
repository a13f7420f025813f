#![forbid(unsafe_code)]

//! Remote failure classification and backoff arithmetic. The retry loop itself lives in the
//! sync crate; everything here is pure.

use std::fmt;


pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Failure reported by an external tracker client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "remote error {status}: {}", self.message),
            None => write!(f, "remote error: {}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network failure, timeout or 5xx.
    Transient,
    /// 429; `hint_ms` is the provider's "retry after" when it could be parsed.
    RateLimited { hint_ms: Option<u64> },
    /// 400/401/403/404 and anything unrecognized.
    Permanent,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::RateLimited { .. } => "rate-limited",
            ErrorClass::Permanent => "permanent",
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "econnaborted",
    "etimedout",
    "enotfound",
    "eai_again",
    "socket hang up",
    "connection reset",
    "connection refused",
    "connection closed",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "internal server error",
];

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate-limit", "too many requests"];

const PERMANENT_MARKERS: &[&str] = &["unauthorized", "forbidden", "not found", "bad request"];

pub fn classify(err: &RemoteError) -> ErrorClass {
    let lower = err.message.to_ascii_lowercase();
    if let Some(status) = err.status {
        match status {
            429 => {
                return ErrorClass::RateLimited {
                    hint_ms: parse_retry_after_ms(&lower),
                };
            }
            408 | 500..=599 => return ErrorClass::Transient,
            400..=499 => return ErrorClass::Permanent,
            _ => {}
        }
    }

    let codes: Vec<u16> = status_codes_in(&lower).collect();
    if codes.contains(&429) || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorClass::RateLimited {
            hint_ms: parse_retry_after_ms(&lower),
        };
    }
    if codes.iter().any(|c| matches!(c, 400 | 401 | 403 | 404))
        || PERMANENT_MARKERS.iter().any(|m| lower.contains(m))
    {
        return ErrorClass::Permanent;
    }
    if codes.iter().any(|c| (500..=599).contains(c))
        || TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
    {
        return ErrorClass::Transient;
    }
    ErrorClass::Permanent
}

/// Three-digit HTTP-looking numbers that stand alone in the message.
fn status_codes_in(text: &str) -> impl Iterator<Item = u16> + '_ {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 3)
        .filter_map(|run| run.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
}

/// Extracts a provider hint such as "retry after 30 seconds", "Retry-After: 5" or
/// "try again in 1500ms". Seconds are assumed when no unit is given.
pub fn parse_retry_after_ms(message: &str) -> Option<u64> {
    let lower = message.to_ascii_lowercase();
    const KEYS: &[&str] = &["retry after", "retry-after", "try again in", "retry in"];
    for key in KEYS {
        let Some(start) = lower.find(key) else {
            continue;
        };
        let rest = lower[start + key.len()..].trim_start_matches([' ', ':', '=']);
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let value = digits.parse::<u64>().ok()?;
        let unit = rest[digits.len()..].trim_start();
        let ms = if unit.starts_with("ms") || unit.starts_with("millisecond") {
            value
        } else {
            value.saturating_mul(1_000)
        };
        return Some(ms);
    }
    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (1-based): `min(initial * 2^(retry-1), max)`.
    /// A provider hint replaces the computed value but is still capped.
    pub fn delay_ms(&self, retry: u32, hint_ms: Option<u64>) -> u64 {
        if let Some(hint) = hint_ms {
            return hint.min(self.max_delay_ms);
        }
        let exponent = retry.saturating_sub(1).min(32);
        self.initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Worst-case wait for one attempt chain without provider hints.
    pub fn max_total_delay_ms(&self) -> u64 {
        (1..=self.max_retries).map(|n| self.delay_ms(n, None)).sum()
    }
}
