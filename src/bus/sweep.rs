//! Expiry sweeping and journal garbage collection.
//!
//! Both run from the watch loop and are best-effort housekeeping: failures
//! are logged and retried on the next cycle, never surfaced to callers.

use super::Inner;
use crate::error::LockBusError;
use crate::event::{Command, Event};
use crate::journal;
use std::time::Duration;

impl Inner {
    /// Publish RELEASE on behalf of holders that crashed without releasing.
    ///
    /// Every instance runs this, so all instances converge on "unlocked"
    /// for a stale subject even though only one sweep RELEASE wins the
    /// journal slot; the others notice their entry was superseded and skip.
    pub(crate) fn sweep_expired(&self) {
        let stale: Vec<(String, String)> = {
            let mut state = self.state.lock().unwrap();
            if let Err(e) = self.replay(&mut state) {
                tracing::warn!(error = %e, "replay before expiry sweep failed");
            }
            state
                .table
                .values()
                .filter(|held| self.surely_out_of_date(&held.event))
                .map(|held| (held.event.subject.clone(), held.event.id.clone()))
                .collect()
        };

        for (subject, id) in stale {
            let result = self.publish(
                &subject,
                |issuer| {
                    Event::new(Command::Release, subject.as_str(), 0, issuer).with_id(id.clone())
                },
                |table| match table.get(&subject) {
                    Some(held)
                        if held.event.id == id && self.surely_out_of_date(&held.event) =>
                    {
                        Ok(())
                    }
                    _ => Err(LockBusError::Protocol("lease superseded".to_string())),
                },
            );

            match result {
                Ok(_) => tracing::debug!(subject = %subject, "swept expired lock"),
                // Someone released, re-granted, or swept it first.
                Err(LockBusError::Protocol(_)) => {}
                Err(e) => {
                    tracing::warn!(subject = %subject, error = %e, "expiry sweep failed")
                }
            }
        }
    }

    /// Delete journal files no longer needed to reconstruct active state.
    ///
    /// A file is deleted only when it sits below every protected floor:
    /// the retention floor (the most recent `retain_min_events` files stay
    /// for audit and diagnostics), the lowest sequence backing a table
    /// entry, and the read cursor. Files that never parse are corruption-
    /// tolerated: they are deleted only once older than the unreadable-age
    /// threshold so a slow writer is not raced.
    pub(crate) fn collect_garbage(&self) {
        let (cursor, table_floor) = {
            let state = self.state.lock().unwrap();
            let floor = state.table.values().map(|held| held.seq).min();
            (state.cursor, floor)
        };

        let files = match journal::list_event_files(&self.events_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "garbage collection could not list journal");
                return;
            }
        };

        let retain = self.config.retain_min_events;
        if files.len() <= retain {
            return;
        }
        let retention_floor = files[files.len() - retain].0;
        let cutoff = table_floor
            .map_or(retention_floor, |floor| floor.min(retention_floor))
            .min(cursor);

        for (seq, path) in files {
            if seq >= cutoff {
                break;
            }

            let parsed = std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| Event::from_json(&text).ok());

            let deletable = match parsed {
                Some(event) => self.surely_out_of_date(&event),
                None => journal::file_older_than(
                    &path,
                    Duration::from_millis(self.config.unreadable_max_age_ms),
                ),
            };
            if !deletable {
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "collected journal file"),
                // Another instance usually got there first.
                Err(e) => tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "journal file already gone or undeletable"
                ),
            }
        }
    }
}
