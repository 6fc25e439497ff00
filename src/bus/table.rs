//! In-memory lock table and the event-application transition.
//!
//! The table maps each subject to the latest lease-relevant event seen for
//! it. It is rebuilt by replaying the journal and is the only state an
//! instance needs to answer `is_locked`. The transition itself is a pure
//! function over (table, event) so it can be tested without any I/O or
//! notification concerns.

use crate::event::{Command, Event};
use crate::token::Token;
use std::collections::HashMap;
use std::path::PathBuf;

/// A journal event together with its position on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event: Event,
    pub seq: u64,
    pub path: PathBuf,
}

impl StoredEvent {
    /// Token proving ownership of the lease this event granted.
    pub fn token(&self) -> Token {
        Token {
            id: self.event.id.clone(),
            origin_path: self.path.clone(),
            subject: self.event.subject.clone(),
            time: self.event.time,
        }
    }
}

/// Mapping from subject to the latest lease-relevant event.
pub type LockTable = HashMap<String, StoredEvent>;

/// Apply one event to the table. Returns true when the table changed.
///
/// LOCK and EXTEND install or replace the subject's entry. RELEASE removes
/// the entry only when its id matches the stored one, so releasing a lease
/// that has since been re-granted to someone else is a no-op. KILL is a
/// notification-only command with no table effect.
pub fn apply_event(table: &mut LockTable, stored: &StoredEvent) -> bool {
    match stored.event.command {
        Command::Lock | Command::Extend => {
            table.insert(stored.event.subject.clone(), stored.clone());
            true
        }
        Command::Release => {
            let matches = table
                .get(&stored.event.subject)
                .is_some_and(|held| held.event.id == stored.event.id);
            if matches {
                table.remove(&stored.event.subject);
            }
            matches
        }
        Command::Kill => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal;
    use std::path::Path;

    fn stored(event: Event, seq: u64) -> StoredEvent {
        let path = journal::event_path(Path::new("/bus"), seq);
        StoredEvent { event, seq, path }
    }

    #[test]
    fn test_lock_inserts_entry() {
        let mut table = LockTable::new();
        let grant = stored(Event::new(Command::Lock, "proj-1", 1000, "a"), 0);

        assert!(apply_event(&mut table, &grant));
        assert_eq!(table.get("proj-1"), Some(&grant));
    }

    #[test]
    fn test_extend_replaces_entry() {
        let mut table = LockTable::new();
        let grant = stored(Event::new(Command::Lock, "proj-1", 1000, "a"), 0);
        let renew = stored(Event::new(Command::Extend, "proj-1", 1000, "a"), 1);

        apply_event(&mut table, &grant);
        apply_event(&mut table, &renew);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("proj-1"), Some(&renew));
    }

    #[test]
    fn test_release_with_matching_id_removes_entry() {
        let mut table = LockTable::new();
        let grant = stored(Event::new(Command::Lock, "proj-1", 1000, "a"), 0);
        let end = stored(
            Event::new(Command::Release, "proj-1", 0, "a").with_id(grant.event.id.clone()),
            1,
        );

        apply_event(&mut table, &grant);
        assert!(apply_event(&mut table, &end));
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_with_stale_id_keeps_entry() {
        let mut table = LockTable::new();
        let first = stored(Event::new(Command::Lock, "proj-1", 1000, "a"), 0);
        let regrant = stored(Event::new(Command::Lock, "proj-1", 1000, "b"), 1);
        // Holder "a" releases after "b" already re-acquired the subject.
        let stale_release = stored(
            Event::new(Command::Release, "proj-1", 0, "a").with_id(first.event.id.clone()),
            2,
        );

        apply_event(&mut table, &first);
        apply_event(&mut table, &regrant);
        assert!(!apply_event(&mut table, &stale_release));
        assert_eq!(table.get("proj-1"), Some(&regrant));
    }

    #[test]
    fn test_release_of_unknown_subject_is_noop() {
        let mut table = LockTable::new();
        let end = stored(Event::new(Command::Release, "proj-1", 0, "a"), 0);

        assert!(!apply_event(&mut table, &end));
        assert!(table.is_empty());
    }

    #[test]
    fn test_kill_has_no_table_effect() {
        let mut table = LockTable::new();
        let grant = stored(Event::new(Command::Lock, "proj-1", 1000, "a"), 0);
        let kill = stored(Event::new(Command::Kill, "proj-1", 0, "b"), 1);

        apply_event(&mut table, &grant);
        assert!(!apply_event(&mut table, &kill));
        assert_eq!(table.get("proj-1"), Some(&grant));
    }

    #[test]
    fn test_replayed_sequence_yields_latest_grant() {
        // Replaying any event sequence leaves exactly the most recent
        // LOCK/EXTEND per subject in the table.
        let mut table = LockTable::new();
        let a1 = stored(Event::new(Command::Lock, "a", 1000, "x"), 0);
        let b1 = stored(Event::new(Command::Lock, "b", 1000, "y"), 1);
        let a2 = stored(Event::new(Command::Extend, "a", 2000, "x"), 2);
        let b2 = stored(
            Event::new(Command::Release, "b", 0, "y").with_id(b1.event.id.clone()),
            3,
        );

        for ev in [&a1, &b1, &a2, &b2] {
            apply_event(&mut table, ev);
        }

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a"), Some(&a2));
        assert!(!table.contains_key("b"));
    }
}
