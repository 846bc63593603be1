//! Snapshot cache with a time-to-live.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    clock::{Clock, SystemClock},
    metrics::{CacheOutcome, METRICS},
    Result,
};

#[derive(Debug)]
struct Snapshot<S> {
    computed_at: Instant,
    summary: Arc<S>,
}

/// Holds the most recently computed summary together with the time it was computed.
///
/// The cache never refreshes in the background; [`Self::get_or_refresh()`] recomputes the summary
/// on demand once it is older than the TTL. The lock guarding the snapshot is never held
/// while refreshing, so concurrent requests racing on a miss may each run the refresh. This only
/// duplicates upstream work; the last finished refresh wins.
pub struct SnapshotCache<S> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<Snapshot<S>>>,
}

impl<S> fmt::Debug for SnapshotCache<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let computed_at = self.lock().as_ref().map(|snapshot| snapshot.computed_at);
        formatter
            .debug_struct("SnapshotCache")
            .field("ttl", &self.ttl)
            .field("computed_at", &computed_at)
            .finish_non_exhaustive()
    }
}

impl<S> SnapshotCache<S> {
    /// Creates an empty cache using the system clock. A zero `ttl` disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates an empty cache reading time from the provided clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slot: Mutex::new(None),
        }
    }

    /// Returns the configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Snapshot<S>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current snapshot regardless of its age, without refreshing.
    pub fn peek(&self) -> Option<Arc<S>> {
        self.lock()
            .as_ref()
            .map(|snapshot| Arc::clone(&snapshot.summary))
    }

    /// Returns the cached summary if it is fresh, otherwise awaits `refresh` and stores its output.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `refresh`. In this case, the previously cached snapshot
    /// (if any) is retained as is.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let now = self.clock.now();
        if let Some(summary) = self.fresh_summary(now) {
            METRICS.cache[&CacheOutcome::Hit].inc();
            return Ok(summary);
        }
        METRICS.cache[&CacheOutcome::Miss].inc();

        let latency = METRICS.refresh_latency.start();
        let result = refresh().await;
        let latency = latency.observe();
        let summary = match result {
            Ok(summary) => Arc::new(summary),
            Err(err) => {
                tracing::debug!(
                    latency_sec = latency.as_secs_f64(),
                    %err,
                    "Snapshot refresh failed"
                );
                return Err(err);
            }
        };
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            "Refreshed snapshot in {latency:?}"
        );

        *self.lock() = Some(Snapshot {
            computed_at: now,
            summary: Arc::clone(&summary),
        });
        Ok(summary)
    }

    fn fresh_summary(&self, now: Instant) -> Option<Arc<S>> {
        let slot = self.lock();
        let snapshot = slot.as_ref()?;
        let age = now.saturating_duration_since(snapshot.computed_at);
        (age < self.ttl).then(|| Arc::clone(&snapshot.summary))
    }
}
