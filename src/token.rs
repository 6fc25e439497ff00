//! Proof-of-ownership tokens for granted leases.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Capability proving which event granted the caller's current lease.
///
/// Returned by a successful `lock` or `extend`. The bus compares a token's
/// `id` against its authoritative table entry on every extend/release, so
/// stale tokens (from a lease that expired and was re-granted) and forged
/// ownership claims are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Id of the granting LOCK/EXTEND event.
    pub id: String,

    /// Journal file that holds the granting event.
    pub origin_path: PathBuf,

    /// The subject the lease covers.
    pub subject: String,

    /// Grant instant (the granting event's time).
    pub time: DateTime<Utc>,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on '{}' granted {}", self.id, self.subject, self.time)
    }
}
