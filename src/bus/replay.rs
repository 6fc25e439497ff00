//! Sequential journal replay into the local lock table.

use super::table::{StoredEvent, apply_event};
use super::{BusState, Inner};
use crate::error::{LockBusError, Result};
use crate::event::Event;
use crate::journal;
use std::io::ErrorKind;
use std::time::Duration;

/// What a single journal slot looked like when replay tried to load it.
enum ReadOutcome {
    /// No file yet; replay is caught up.
    Missing,
    /// This slot will never yield an event — garbage-collected out from
    /// under a lagging cursor, abandoned mid-write, or poisoned by a writer
    /// that died after creating the file. Skip it.
    Skipped,
    /// Parsed cleanly.
    Parsed(Event),
}

impl Inner {
    /// Drain every observable journal file at and past the cursor.
    ///
    /// The absence of the next file ends the pass; that is the normal idle
    /// case, not an error. Called with the instance mutex held.
    pub(crate) fn replay(&self, state: &mut BusState) -> Result<()> {
        loop {
            let seq = state.cursor;
            let path = journal::event_path(&self.events_dir, seq);

            let event = match self.read_event_file(&path, seq)? {
                ReadOutcome::Missing => return Ok(()),
                ReadOutcome::Skipped => {
                    tracing::warn!(
                        path = %path.display(),
                        "skipping collected or abandoned journal slot"
                    );
                    state.cursor = seq + 1;
                    continue;
                }
                ReadOutcome::Parsed(event) => event,
            };

            let stored = StoredEvent { event, seq, path };
            apply_event(&mut state.table, &stored);
            state.cursor = seq + 1;
            self.notify_listeners(&stored.event);
        }
    }

    /// Load one journal slot, tolerating files that are still being written.
    ///
    /// A file that exists but does not parse is assumed to be mid-write by a
    /// concurrent process: it is retried after a fixed cooldown, up to the
    /// configured trial count. If a later sequence file already exists the
    /// earlier writer clearly moved on, so the file is abandoned instead of
    /// retried indefinitely. Transient read errors share the same trial
    /// budget; exhausting it surfaces an error.
    fn read_event_file(&self, path: &std::path::Path, seq: u64) -> Result<ReadOutcome> {
        let trials = self.config.replay_trials.max(1);
        let cooldown = Duration::from_millis(self.config.replay_cooldown_ms);

        for trial in 0..trials {
            if trial > 0 {
                std::thread::sleep(cooldown);
            }

            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // The sequence is dense, so a hole with files beyond it
                    // means garbage collection outran this cursor.
                    if journal::has_file_after(&self.events_dir, seq) {
                        return Ok(ReadOutcome::Skipped);
                    }
                    return Ok(ReadOutcome::Missing);
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "transient read failure during replay"
                    );
                    continue;
                }
            };

            match Event::from_json(&content) {
                Ok(event) => return Ok(ReadOutcome::Parsed(event)),
                Err(_) if journal::has_file_after(&self.events_dir, seq) => {
                    return Ok(ReadOutcome::Skipped);
                }
                // Structurally incomplete and nothing newer on disk: the
                // writer is presumably still flushing. Wait out the cooldown.
                Err(_) => {}
            }
        }

        // A slot whose writer died after creating the file would wedge the
        // whole journal (nobody can re-create it); past the unreadable-age
        // threshold it is written off instead.
        if journal::file_older_than(
            path,
            Duration::from_millis(self.config.unreadable_max_age_ms),
        ) {
            return Ok(ReadOutcome::Skipped);
        }

        Err(LockBusError::Protocol(format!(
            "event file '{}' still unreadable after {} trials",
            path.display(),
            trials
        )))
    }
}
