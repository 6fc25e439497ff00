//! Background watch loop: replay, expiry sweep, and garbage collection.

use super::Inner;
use crate::notify::ChangeNotifier;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Body of the watch thread.
///
/// Each pass drains newly observable events, sweeps expired leases, and
/// periodically garbage-collects the journal, then blocks on the change
/// notifier. The block is bounded by the max poll interval and shortened
/// to the nearest upcoming lease expiry so expiries are detected promptly
/// even when no new events arrive.
pub(crate) fn watch_loop(inner: Arc<Inner>, mut notifier: Box<dyn ChangeNotifier>) {
    let gc_interval = Duration::from_millis(inner.config.gc_interval_ms.max(1));
    let mut last_gc: Option<Instant> = None;

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        {
            let mut state = inner.state.lock().unwrap();
            if let Err(e) = inner.replay(&mut state) {
                tracing::warn!(error = %e, "watch replay failed; retrying next pass");
            }
        }

        inner.sweep_expired();

        if last_gc.is_none_or(|at| at.elapsed() >= gc_interval) {
            inner.collect_garbage();
            last_gc = Some(Instant::now());
        }

        notifier.wait_for_change(inner.next_wait());
    }
}

impl Inner {
    /// How long the next watch pass may wait.
    ///
    /// Bounded above by the max poll interval and below by one poll slice
    /// (a sweepable entry that refuses to go away must not busy-spin the
    /// loop), and shortened to the instant the nearest lease turns
    /// sweepable.
    fn next_wait(&self) -> Duration {
        let max = Duration::from_millis(self.config.max_poll_interval_ms.max(1));
        let min = Duration::from_millis(self.config.poll_slice_ms.max(1)).min(max);

        let allowance = chrono::Duration::milliseconds(
            (self.config.expiry_offset_ms + self.config.out_of_date_margin_ms) as i64,
        );
        let now = Utc::now();

        let state = self.state.lock().unwrap();
        state
            .table
            .values()
            .filter(|held| held.event.command.grants_lease())
            .map(|held| held.event.expires_at() + allowance - now)
            .min()
            .map_or(max, |until| {
                until.to_std().unwrap_or(Duration::ZERO).clamp(min, max)
            })
    }
}
