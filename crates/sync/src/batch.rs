#![forbid(unsafe_code)]

//! Multi-increment sync with cooperative cancellation and resumable progress.

use crate::SyncError;
use crate::engine::ExternalSyncEngine;
use std::sync::{Arc, Mutex, MutexGuard};
use sw_core::clock::Clock;
use sw_core::ids::IncrementId;
use sw_storage::{BatchError, BatchState, BatchStateStore};

/// A second interrupt within this window forces termination.
pub const FORCE_WINDOW_MS: i64 = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelState {
    Running,
    /// Stop before the next item and save progress.
    Requested,
    /// Stop now; progress is not saved.
    Forced,
}

#[derive(Debug, Default)]
struct CancelInner {
    requested_at_ms: Option<i64>,
    forced: bool,
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Mutex<CancelInner>>,
    clock: Arc<dyn Clock>,
}

impl CancelToken {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CancelInner::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CancelInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn interrupt(&self) -> CancelState {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        if inner.forced {
            return CancelState::Forced;
        }
        match inner.requested_at_ms {
            Some(first) if now.saturating_sub(first) <= FORCE_WINDOW_MS => {
                inner.forced = true;
                CancelState::Forced
            }
            _ => {
                inner.requested_at_ms = Some(now);
                CancelState::Requested
            }
        }
    }

    pub fn state(&self) -> CancelState {
        let inner = self.lock();
        if inner.forced {
            CancelState::Forced
        } else if inner.requested_at_ms.is_some() {
            CancelState::Requested
        } else {
            CancelState::Running
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state() != CancelState::Running
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed(BatchState),
    /// Progress was saved and can be resumed.
    Canceled(BatchState),
    Forced(BatchState),
}

impl BatchOutcome {
    pub fn state(&self) -> &BatchState {
        match self {
            BatchOutcome::Completed(state)
            | BatchOutcome::Canceled(state)
            | BatchOutcome::Forced(state) => state,
        }
    }
}

pub struct BatchSync<'a> {
    engine: &'a mut ExternalSyncEngine,
    store: BatchStateStore,
    token: CancelToken,
    clock: Arc<dyn Clock>,
}

impl<'a> BatchSync<'a> {
    pub fn new(engine: &'a mut ExternalSyncEngine, token: CancelToken) -> Self {
        let metadata = engine.metadata();
        let clock = metadata.clock();
        let store = BatchStateStore::with_clock(metadata.layout().clone(), Arc::clone(&clock));
        Self {
            engine,
            store,
            token,
            clock,
        }
    }

    pub fn store(&self) -> &BatchStateStore {
        &self.store
    }

    pub fn run(&mut self, ids: &[IncrementId], resume: bool) -> Result<BatchOutcome, SyncError> {
        self.run_with_progress(ids, resume, |_| {})
    }

    /// Syncs `ids` in order. A failing item is recorded in `errors` and the batch moves on.
    /// With `resume`, saved progress is reused and ids up to `lastProcessedId` are skipped.
    pub fn run_with_progress(
        &mut self,
        ids: &[IncrementId],
        resume: bool,
        mut on_item: impl FnMut(&BatchState),
    ) -> Result<BatchOutcome, SyncError> {
        let (mut state, start) = self.starting_point(ids, resume)?;

        for id in &ids[start..] {
            match self.token.state() {
                CancelState::Running => {}
                CancelState::Requested => return self.cancel(state),
                CancelState::Forced => {
                    tracing::warn!(completed = state.completed, "batch sync force-stopped");
                    return Ok(BatchOutcome::Forced(state));
                }
            }

            match self.engine.sync(id) {
                Ok(report) if !report.has_failures() => state.succeeded += 1,
                Ok(report) => {
                    state.failed += 1;
                    state.errors.push(BatchError {
                        id: id.to_string(),
                        error: report
                            .first_error()
                            .unwrap_or_else(|| "sync failed".to_string()),
                        timestamp: self.clock.now_ms(),
                    });
                }
                Err(err) => {
                    tracing::warn!(increment = %id, error = %err, "batch item failed");
                    state.failed += 1;
                    state.errors.push(BatchError {
                        id: id.to_string(),
                        error: err.to_string(),
                        timestamp: self.clock.now_ms(),
                    });
                }
            }
            state.completed += 1;
            state.last_processed_id = Some(id.to_string());
            state.timestamp = self.clock.now_ms();
            on_item(&state);
        }

        if self.token.state() == CancelState::Forced {
            return Ok(BatchOutcome::Forced(state));
        }
        self.store.clear()?;
        tracing::info!(
            total = state.total,
            succeeded = state.succeeded,
            failed = state.failed,
            "batch sync finished"
        );
        Ok(BatchOutcome::Completed(state))
    }

    fn starting_point(
        &self,
        ids: &[IncrementId],
        resume: bool,
    ) -> Result<(BatchState, usize), SyncError> {
        let fresh = BatchState {
            total: ids.len(),
            timestamp: self.clock.now_ms(),
            ..BatchState::default()
        };
        if !resume {
            return Ok((fresh, 0));
        }
        let Some(saved) = self.store.load()? else {
            return Ok((fresh, 0));
        };
        let position = saved
            .last_processed_id
            .as_deref()
            .and_then(|last| ids.iter().position(|id| id.as_str() == last));
        let Some(position) = position else {
            tracing::info!("saved batch does not match these ids; starting over");
            return Ok((fresh, 0));
        };
        tracing::info!(
            completed = saved.completed,
            remaining = ids.len() - position - 1,
            "resuming batch sync"
        );
        let state = BatchState {
            total: ids.len(),
            canceled: false,
            timestamp: self.clock.now_ms(),
            ..saved
        };
        Ok((state, position + 1))
    }

    fn cancel(&self, mut state: BatchState) -> Result<BatchOutcome, SyncError> {
        state.canceled = true;
        state.timestamp = self.clock.now_ms();
        self.store.save(&state)?;
        tracing::info!(
            completed = state.completed,
            total = state.total,
            "batch sync canceled; progress saved"
        );
        Ok(BatchOutcome::Canceled(state))
    }
}
