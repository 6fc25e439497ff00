//! Scoped lease handle over a bus-granted lock.
//!
//! A [`Lock`] is acquired on construction and released on every exit path:
//! explicitly via [`Lock::release`], or by the drop guard when the
//! protected section unwinds. While the protected resource is in use the
//! holder must call [`Lock::heartbeat`] on a cadence faster than half the
//! lease duration; the bus only detects and sweeps expiry, it never renews
//! a lease on the holder's behalf.
//!
//! All methods take `&self` so one handle can be shared across threads:
//! a worker heartbeating through I/O while another thread blocks in
//! [`Lock::wait_for_release`].

use crate::bus::LockBus;
use crate::error::{LockBusError, Result};
use crate::token::Token;
use chrono::Utc;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// How often `wait_for_release` re-checks lease state.
const WAIT_RECHECK_MS: u64 = 100;

/// A held lease on one subject.
///
/// State machine: Active → Active (successful heartbeat) → Released
/// (terminal, via `release` or drop). There is no way back from Released.
pub struct Lock<'bus> {
    bus: &'bus LockBus,
    subject: String,
    duration_ms: u64,
    state: Mutex<LeaseState>,
    released_cond: Condvar,
}

struct LeaseState {
    token: Token,
    released: bool,
}

impl<'bus> Lock<'bus> {
    /// Acquire a lease on `subject`, failing if it is already held.
    pub fn acquire(bus: &'bus LockBus, subject: &str, duration_ms: u64) -> Result<Self> {
        let token = bus.lock(subject, duration_ms)?;
        Ok(Self {
            bus,
            subject: subject.to_string(),
            duration_ms,
            state: Mutex::new(LeaseState {
                token,
                released: false,
            }),
            released_cond: Condvar::new(),
        })
    }

    /// The subject this lease covers.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The negotiated lease duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// A copy of the token currently proving ownership.
    pub fn token(&self) -> Token {
        self.state.lock().unwrap().token.clone()
    }

    /// Keep the lease alive.
    ///
    /// Fails with [`LockBusError::Expired`] when the lease already ran out;
    /// the caller must assume it no longer owns the resource and abort the
    /// critical section. Once past a third of the duration the lease is
    /// transparently extended on the bus and the fresh token adopted.
    pub fn heartbeat(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.released {
            return Err(LockBusError::Protocol(format!(
                "lock on '{}' was already released",
                self.subject
            )));
        }

        let age_ms = Utc::now()
            .signed_duration_since(state.token.time)
            .num_milliseconds();

        if age_ms > self.duration_ms as i64 {
            return Err(LockBusError::Expired {
                subject: self.subject.clone(),
            });
        }

        if age_ms > (self.duration_ms / 3) as i64 {
            state.token = self.bus.extend(&state.token, self.duration_ms)?;
        }

        Ok(())
    }

    /// Release the lease.
    ///
    /// Idempotent-guarded: a second call logs a warning and is a no-op.
    /// Wakes every thread blocked in [`Lock::wait_for_release`].
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if state.released {
            tracing::warn!(subject = %self.subject, "lock already released");
            return;
        }

        state.released = true;
        self.bus.release(&state.token);
        self.released_cond.notify_all();
    }

    /// Block until this instance no longer holds the lock.
    ///
    /// Returns when the lease is released, or once it has expired without
    /// renewal (either way the resource is no longer held here). A plain
    /// blocking wait with periodic re-checks; cancellation is expressed
    /// purely through `release`.
    pub fn wait_for_release(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.released || self.remaining_ms(&state) <= 0 {
                return;
            }
            state = self
                .released_cond
                .wait_timeout(state, Duration::from_millis(WAIT_RECHECK_MS))
                .unwrap()
                .0;
        }
    }

    /// Whether the lease is still held and unexpired.
    pub fn is_alive(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.released && self.remaining_ms(&state) > 0
    }

    /// Milliseconds until the current lease turns invalid without renewal.
    pub fn time_ms_until_invalid(&self) -> i64 {
        let state = self.state.lock().unwrap();
        if state.released {
            0
        } else {
            self.remaining_ms(&state).max(0)
        }
    }

    fn remaining_ms(&self, state: &LeaseState) -> i64 {
        let deadline = state.token.time + chrono::Duration::milliseconds(self.duration_ms as i64);
        deadline.signed_duration_since(Utc::now()).num_milliseconds()
    }
}

impl Drop for Lock<'_> {
    /// Guaranteed-cleanup path: the lease is released however the protected
    /// section exits.
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if !state.released {
            state.released = true;
            self.bus.release(&state.token);
            self.released_cond.notify_all();
        }
    }
}

impl std::fmt::Debug for Lock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Lock")
            .field("subject", &self.subject)
            .field("duration_ms", &self.duration_ms)
            .field("released", &state.released)
            .finish()
    }
}
