#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use sw_core::retry::{BackoffConfig, ErrorClass, RemoteError};

/// Blocking wait between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep_ms(&self, ms: u64);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<u64>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<u64> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep_ms(&self, ms: u64) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(ms);
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RemoteError>,
    /// Calls made, including the first.
    pub attempts: u32,
    pub total_delay_ms: u64,
}

#[derive(Clone)]
pub struct RetryPolicy {
    config: BackoffConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default(), Arc::new(ThreadSleeper))
    }
}

impl RetryPolicy {
    pub fn new(config: BackoffConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> BackoffConfig {
        self.config
    }

    /// Runs `op` until it succeeds, fails permanently, or `max_retries` retries are spent.
    /// `op` receives the 1-based attempt number.
    pub fn execute<T>(&self, mut op: impl FnMut(u32) -> Result<T, RemoteError>) -> RetryOutcome<T> {
        let mut attempts = 0u32;
        let mut total_delay_ms = 0u64;
        loop {
            attempts += 1;
            let err = match op(attempts) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_delay_ms,
                    };
                }
                Err(err) => err,
            };

            let class = err.class();
            let retry = attempts;
            if !class.is_retryable() || retry > self.config.max_retries {
                if class.is_retryable() {
                    tracing::warn!(attempts, error = %err, "giving up after retries");
                }
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                    total_delay_ms,
                };
            }

            let hint = match class {
                ErrorClass::RateLimited { hint_ms } => hint_ms,
                _ => None,
            };
            let delay = self.config.delay_ms(retry, hint);
            tracing::debug!(
                attempt = attempts,
                class = class.as_str(),
                delay_ms = delay,
                error = %err,
                "retrying remote call"
            );
            self.sleeper.sleep_ms(delay);
            total_delay_ms += delay;
        }
    }
}
