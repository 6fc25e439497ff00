//! Directory-change notification for the watch loop.
//!
//! The bus does not talk to the filesystem watcher APIs directly; it depends
//! on the small [`ChangeNotifier`] capability so tests can substitute a fake
//! instead of touching real shared storage. The default implementation polls
//! the journal directory, which is the only portable option on the network
//! mounts this crate targets.

use crate::journal;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Capability the watch loop uses to learn that the journal directory may
/// have changed.
pub trait ChangeNotifier: Send + 'static {
    /// Block until the directory may have changed or `timeout` elapses.
    ///
    /// Returns true when a change was observed before the timeout. Spurious
    /// wakeups are allowed; the watch loop re-checks actual state either way.
    fn wait_for_change(&mut self, timeout: Duration) -> bool;
}

/// Polling notifier: watches the highest journal sequence number in short
/// sleep slices.
pub struct PollingNotifier {
    dir: PathBuf,
    slice: Duration,
    last_seen: Option<u64>,
}

impl PollingNotifier {
    pub fn new(dir: impl Into<PathBuf>, slice: Duration) -> Self {
        Self {
            dir: dir.into(),
            slice: slice.max(Duration::from_millis(1)),
            last_seen: None,
        }
    }

    fn highest_seq(&self) -> Option<u64> {
        journal::list_event_files(&self.dir)
            .ok()?
            .last()
            .map(|(seq, _)| *seq)
    }
}

impl ChangeNotifier for PollingNotifier {
    fn wait_for_change(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let current = self.highest_seq();
            if current != self.last_seen {
                self.last_seen = current;
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.slice.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_polling_notifier_times_out_quietly() {
        let temp_dir = TempDir::new().unwrap();
        let mut notifier = PollingNotifier::new(temp_dir.path(), Duration::from_millis(5));

        // Consume the initial observation of the (empty) directory.
        notifier.wait_for_change(Duration::from_millis(5));

        let started = Instant::now();
        let changed = notifier.wait_for_change(Duration::from_millis(30));
        assert!(!changed);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_polling_notifier_sees_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let mut notifier = PollingNotifier::new(&dir, Duration::from_millis(5));
        notifier.wait_for_change(Duration::from_millis(5));

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            fs::write(journal::event_path(&dir, 0), "{}").unwrap();
        });

        let changed = notifier.wait_for_change(Duration::from_secs(2));
        writer.join().unwrap();
        assert!(changed);
    }
}
