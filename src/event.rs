//! Lock event model and its persisted JSON form.
//!
//! Every lock operation is recorded as an immutable `Event` written to its
//! own journal file (see [`crate::journal`]). Events are small human-readable
//! JSON documents with the fields `id`, `command`, `time`, `duration`,
//! `subject`, and `issuer`. Once written, an event's content never changes;
//! later events for the same subject supersede it, and garbage collection
//! eventually deletes it.
//!
//! # Event Format
//!
//! - `id`: UUID of the event; RELEASE events carry the id of the lease they end
//! - `command`: LOCK, EXTEND, RELEASE, or KILL
//! - `time`: creation instant, milliseconds since epoch
//! - `duration`: lease length in milliseconds (0 for RELEASE/KILL)
//! - `subject`: string key identifying the protected resource
//! - `issuer`: identifier of the publishing bus instance

use crate::error::{LockBusError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Commands that can be recorded in the event journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Grant a fresh lease on a subject.
    Lock,
    /// Renew the lease currently held on a subject.
    Extend,
    /// End a lease (explicitly, or swept on behalf of a crashed holder).
    Release,
    /// Notification-only signal to whoever is working under the subject.
    Kill,
}

impl Command {
    /// Whether this command grants or renews a lease.
    pub fn grants_lease(&self) -> bool {
        matches!(self, Command::Lock | Command::Extend)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Lock => write!(f, "LOCK"),
            Command::Extend => write!(f, "EXTEND"),
            Command::Release => write!(f, "RELEASE"),
            Command::Kill => write!(f, "KILL"),
        }
    }
}

/// An immutable record of one lock operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id of this event.
    pub id: String,

    /// The operation this event records.
    pub command: Command,

    /// Creation instant. Persisted as milliseconds since epoch.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,

    /// Lease length in milliseconds; 0 for RELEASE/KILL.
    #[serde(rename = "duration")]
    pub duration_ms: u64,

    /// The resource the operation targets.
    pub subject: String,

    /// Identifier of the bus instance that published this event.
    pub issuer: String,
}

impl Event {
    /// Create a new event with a fresh id and the current time.
    ///
    /// The timestamp is truncated to millisecond precision so an event
    /// survives a serialize/parse round trip field-for-field.
    pub fn new(
        command: Command,
        subject: impl Into<String>,
        duration_ms: u64,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command,
            time: now_millis(),
            duration_ms,
            subject: subject.into(),
            issuer: issuer.into(),
        }
    }

    /// Replace the generated id.
    ///
    /// RELEASE events carry the id of the LOCK/EXTEND event they end, so the
    /// removal only applies if the lease has not been re-granted since.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The instant this event's lease runs out (ignoring any offset).
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.time + Duration::milliseconds(self.duration_ms as i64)
    }

    /// Whether this event currently holds the subject locked.
    ///
    /// `offset_ms` is the clock-skew allowance granted on top of the lease:
    /// a subject counts as locked while `time + duration + offset >= now`.
    pub fn is_live(&self, offset_ms: u64) -> bool {
        self.command.grants_lease()
            && Utc::now() <= self.expires_at() + Duration::milliseconds(offset_ms as i64)
    }

    /// Serialize the event to its persisted JSON document.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LockBusError::Protocol(format!("failed to serialize event: {}", e)))
    }

    /// Parse an event from its persisted JSON document.
    ///
    /// A parse failure here usually means the file is still being written by
    /// a concurrent process, not that it is corrupt; replay treats it that way.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| LockBusError::Protocol(format!("failed to parse event: {}", e)))
    }
}

/// Current time truncated to millisecond precision.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new(Command::Lock, "proj-1", 5000, "a@host:1");

        assert_eq!(event.command, Command::Lock);
        assert_eq!(event.subject, "proj-1");
        assert_eq!(event.duration_ms, 5000);
        assert_eq!(event.issuer, "a@host:1");
        assert!(!event.id.is_empty());
        // Timestamp should be recent (within last minute)
        let age = Utc::now().signed_duration_since(event.time);
        assert!(age.num_minutes() < 1);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new(Command::Lock, "proj-1", 1000, "a");
        let b = Event::new(Command::Lock, "proj-1", 1000, "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_with_id_replaces_generated_id() {
        let grant = Event::new(Command::Lock, "proj-1", 1000, "a");
        let release = Event::new(Command::Release, "proj-1", 0, "a").with_id(grant.id.clone());
        assert_eq!(release.id, grant.id);
    }

    #[test]
    fn test_command_serialization_is_uppercase() {
        let event = Event::new(Command::Release, "proj-1", 0, "a");
        let json = event.to_json().unwrap();
        assert!(json.contains("\"RELEASE\""));

        let event = Event::new(Command::Extend, "proj-1", 1000, "a");
        let json = event.to_json().unwrap();
        assert!(json.contains("\"EXTEND\""));
    }

    #[test]
    fn test_time_persisted_as_epoch_millis() {
        let event = Event::new(Command::Lock, "proj-1", 1000, "a");
        let json = event.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["time"].as_i64(), Some(event.time.timestamp_millis()));
        // Lease length is persisted under the short field name.
        assert_eq!(value["duration"].as_u64(), Some(1000));
    }

    #[test]
    fn test_json_roundtrip_is_field_for_field_equal() {
        let event = Event::new(Command::Extend, "proj-1", 2500, "worker@node7:42:ab12cd34");
        let json = event.to_json().unwrap();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_partial_document_fails_to_parse() {
        let event = Event::new(Command::Lock, "proj-1", 1000, "a");
        let json = event.to_json().unwrap();
        let truncated = &json[..json.len() / 2];
        assert!(Event::from_json(truncated).is_err());
    }

    #[test]
    fn test_expiry_math() {
        let event = Event::new(Command::Lock, "proj-1", 5000, "a");
        assert_eq!(
            event.expires_at(),
            event.time + Duration::milliseconds(5000)
        );
        assert!(event.is_live(0));

        let mut stale = event.clone();
        stale.time = Utc::now() - Duration::milliseconds(6000);
        assert!(!stale.is_live(0));
        // A large enough offset keeps the stale event live.
        assert!(stale.is_live(2000));
    }

    #[test]
    fn test_release_is_never_live() {
        let mut event = Event::new(Command::Release, "proj-1", 0, "a");
        event.duration_ms = 60_000;
        assert!(!event.is_live(0));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(format!("{}", Command::Lock), "LOCK");
        assert_eq!(format!("{}", Command::Extend), "EXTEND");
        assert_eq!(format!("{}", Command::Release), "RELEASE");
        assert_eq!(format!("{}", Command::Kill), "KILL");
    }

    #[test]
    fn test_now_millis_has_no_submillisecond_part() {
        let now = now_millis();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
