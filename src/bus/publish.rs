//! The optimistic-concurrency publish path.
//!
//! Publishing serializes an event into the next journal sequence slot with
//! an exclusive create, then reads the slot back and compares ids before
//! trusting the write. Exclusive create alone would be enough on a local
//! filesystem, but the journal usually lives on a network mount whose
//! consistency under concurrent writers cannot be trusted, so the
//! read-after-write check is what actually confirms the grant.
//!
//! Collisions (another writer took the slot, or the read-back shows someone
//! else's event) drop the instance mutex, back off exponentially, and retry
//! against the refreshed table, up to a bounded attempt count.

use super::table::{LockTable, StoredEvent, apply_event};
use super::{BusState, Inner};
use crate::error::{LockBusError, Result};
use crate::event::Event;
use crate::journal;
use std::io::ErrorKind;
use std::time::Duration;

impl Inner {
    /// Publish one event, validating against the current table first.
    ///
    /// `validate` runs under the instance mutex against a freshly replayed
    /// table on every attempt; its error (e.g. `AlreadyLocked` for `lock`,
    /// an ownership mismatch for `extend`) aborts the publish immediately.
    /// `make_event` is called per attempt so each retry carries a fresh id
    /// and timestamp.
    pub(crate) fn publish<E, V>(
        &self,
        subject: &str,
        make_event: E,
        validate: V,
    ) -> Result<StoredEvent>
    where
        E: Fn(&str) -> Event,
        V: Fn(&LockTable) -> Result<()>,
    {
        let attempts = self.config.publish_retries.max(1);
        let cap = Duration::from_millis(self.config.publish_backoff_cap_ms.max(1));
        let mut backoff = Duration::from_millis(self.config.publish_backoff_ms.max(1));

        for attempt in 0..attempts {
            if attempt > 0 {
                // Backoff happens with the instance mutex released so local
                // queries and the watch loop keep making progress.
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(cap);
            }

            if let Some(stored) = self.try_publish_once(&make_event, &validate)? {
                return Ok(stored);
            }
        }

        Err(LockBusError::RetriesExhausted {
            attempts,
            reason: format!("sequence collision on '{}'", subject),
        })
    }

    /// One publish attempt. `Ok(None)` means "lost a race, try again".
    fn try_publish_once<E, V>(&self, make_event: &E, validate: &V) -> Result<Option<StoredEvent>>
    where
        E: Fn(&str) -> Event,
        V: Fn(&LockTable) -> Result<()>,
    {
        let mut state = self.state.lock().unwrap();

        // Replay does its own bounded trials with cooldown; if events still
        // cannot be loaded the failure surfaces to the caller unchanged.
        self.replay(&mut state)?;
        validate(&state.table)?;

        let seq = state.cursor;
        let path = journal::event_path(&self.events_dir, seq);
        let event = make_event(&self.issuer);
        let text = event.to_json()?;

        match journal::create_exclusive(&path, &text) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Another writer took this sequence number; the next replay
                // pass will apply their event before we retry.
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "event write failed; retrying publish"
                );
                return Ok(None);
            }
        }

        self.confirm_write(&mut state, event, seq, path)
    }

    /// Read the just-written slot back and only then trust the grant.
    fn confirm_write(
        &self,
        state: &mut BusState,
        event: Event,
        seq: u64,
        path: std::path::PathBuf,
    ) -> Result<Option<StoredEvent>> {
        let written = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "read-after-write check failed; retrying publish"
                );
                return Ok(None);
            }
        };

        match Event::from_json(&written) {
            Ok(found) if found.id == event.id => {
                let stored = StoredEvent { event, seq, path };
                apply_event(&mut state.table, &stored);
                state.cursor = seq + 1;
                self.notify_listeners(&stored.event);
                Ok(Some(stored))
            }
            // A different event came back: another writer won the slot
            // despite our exclusive create. Leave the cursor alone so the
            // next replay pass applies the winner, then retry.
            Ok(_) | Err(_) => Ok(None),
        }
    }
}
