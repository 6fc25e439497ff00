//! Error types for the lockbus crate.
//!
//! Uses thiserror for derive macros and provides caller-actionable messages.
//! The taxonomy mirrors the protocol: a lock that is validly held
//! (`AlreadyLocked`), a lease the holder failed to renew (`Expired`),
//! publish contention that outlasted the retry budget (`RetriesExhausted`),
//! and everything else (`Protocol`) — unknown tokens, ownership mismatches,
//! unreadable event files, I/O failures. A caller receiving any error must
//! treat the attempted operation as not having taken effect.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for lockbus operations.
#[derive(Error, Debug)]
pub enum LockBusError {
    /// The subject is already covered by an unexpired lease.
    #[error("subject '{subject}' is already locked until {locked_until}")]
    AlreadyLocked {
        subject: String,
        locked_until: DateTime<Utc>,
    },

    /// The holder failed to renew its lease before the deadline.
    #[error("lock on '{subject}' has expired")]
    Expired { subject: String },

    /// Publishing kept colliding with concurrent writers until the retry
    /// budget ran out.
    #[error("gave up publishing after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    /// Protocol, parsing, or I/O failure.
    #[error("{0}")]
    Protocol(String),
}

/// Result type alias for lockbus operations.
pub type Result<T> = std::result::Result<T, LockBusError>;
