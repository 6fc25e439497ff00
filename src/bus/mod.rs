//! Per-process lock bus over a shared journal directory.
//!
//! Each orchestrator node runs one `LockBus` against the same shared
//! (possibly network-mounted) directory. The bus publishes lock operations
//! as journal events, replays events other instances publish into a local
//! lock table, notifies registered listeners, sweeps leases whose holder
//! crashed without releasing, and garbage-collects journal files that are
//! no longer needed to reconstruct active lock state.
//!
//! # Concurrency
//!
//! Within one instance, every table mutation and every publish/replay
//! sequence is serialized through a single internal mutex. That makes local
//! reads consistent but does nothing for cross-instance races: those are
//! resolved by the optimistic create-then-verify publish protocol (see
//! `publish.rs`), because the shared filesystem's consistency under
//! concurrent writers cannot be trusted.
//!
//! Two background threads run per instance: a watch loop (replay, expiry
//! sweep, garbage collection) and a listener dispatch loop that keeps slow
//! or failing callbacks off the publish path. Both are joined when the bus
//! is dropped or explicitly shut down.

mod listeners;
mod publish;
mod replay;
mod sweep;
pub(crate) mod table;
mod watch;


pub use listeners::ListenerOptions;

use crate::config::BusConfig;
use crate::error::{LockBusError, Result};
use crate::event::{Command, Event};
use crate::journal;
use crate::notify::{ChangeNotifier, PollingNotifier};
use crate::token::Token;
use listeners::Listener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;
use table::LockTable;

/// Handle to a running lock bus.
///
/// Obtained via [`LockBus::open`]; background threads stop when the handle
/// is dropped or [`LockBus::shutdown`] is called.
pub struct LockBus {
    inner: Arc<Inner>,
    watch: Option<thread::JoinHandle<()>>,
    dispatch: Option<thread::JoinHandle<()>>,
}

/// State shared between the client-facing handle and the background threads.
pub(crate) struct Inner {
    pub(crate) events_dir: PathBuf,
    pub(crate) issuer: String,
    pub(crate) config: BusConfig,
    pub(crate) state: Mutex<BusState>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) dispatch_tx: Mutex<Option<mpsc::Sender<Event>>>,
    pub(crate) listeners: Mutex<Vec<Listener>>,
}

/// Mutex-guarded mutable state: the lock table and the journal read cursor.
pub(crate) struct BusState {
    pub(crate) table: LockTable,
    /// Sequence number of the next journal file to read (and, once replay
    /// has drained, the next one to write).
    pub(crate) cursor: u64,
}

impl LockBus {
    /// Open a bus over the given journal directory.
    ///
    /// Creates the directory if needed and starts the watch and dispatch
    /// threads. The directory is typically shared with other instances on
    /// other machines; nothing about opening it is exclusive.
    pub fn open<P: AsRef<Path>>(events_dir: P, config: BusConfig) -> Result<Self> {
        let slice = Duration::from_millis(config.poll_slice_ms);
        let notifier = PollingNotifier::new(events_dir.as_ref(), slice);
        Self::open_with_notifier(events_dir, config, Box::new(notifier))
    }

    /// Open a bus with a caller-supplied change notifier.
    ///
    /// Tests use this to drive the watch loop without real shared storage.
    pub fn open_with_notifier<P: AsRef<Path>>(
        events_dir: P,
        config: BusConfig,
        notifier: Box<dyn ChangeNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let events_dir = events_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&events_dir).map_err(|e| {
            LockBusError::Protocol(format!(
                "failed to create event directory '{}': {}",
                events_dir.display(),
                e
            ))
        })?;

        // Old journal files below the lowest surviving sequence number have
        // been garbage-collected; start the cursor where the journal starts.
        let cursor = journal::lowest_seq(&events_dir)
            .map_err(|e| {
                LockBusError::Protocol(format!(
                    "failed to scan event directory '{}': {}",
                    events_dir.display(),
                    e
                ))
            })?
            .unwrap_or(0);

        let (tx, rx) = mpsc::channel();

        let inner = Arc::new(Inner {
            events_dir,
            issuer: make_issuer(),
            config,
            state: Mutex::new(BusState {
                table: LockTable::new(),
                cursor,
            }),
            shutdown: AtomicBool::new(false),
            dispatch_tx: Mutex::new(Some(tx)),
            listeners: Mutex::new(Vec::new()),
        });

        let watch_inner = Arc::clone(&inner);
        let watch = thread::spawn(move || watch::watch_loop(watch_inner, notifier));

        let dispatch_inner = Arc::clone(&inner);
        let dispatch = thread::spawn(move || listeners::dispatch_loop(dispatch_inner, rx));

        Ok(Self {
            inner,
            watch: Some(watch),
            dispatch: Some(dispatch),
        })
    }

    /// Identifier this instance stamps into every event it publishes.
    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    /// The shared journal directory this bus operates on.
    pub fn events_dir(&self) -> &Path {
        &self.inner.events_dir
    }

    /// Acquire a lease on `subject` for `duration_ms` milliseconds.
    ///
    /// # Returns
    ///
    /// * `Ok(Token)` - Proof of ownership for the granted lease
    /// * `Err(LockBusError::AlreadyLocked)` - An unexpired lease exists
    /// * `Err(LockBusError::RetriesExhausted)` - Sustained publish contention
    pub fn lock(&self, subject: &str, duration_ms: u64) -> Result<Token> {
        let offset = self.inner.config.expiry_offset_ms;
        let stored = self.inner.publish(
            subject,
            |issuer| Event::new(Command::Lock, subject, duration_ms, issuer),
            |table| match table.get(subject) {
                Some(held) if held.event.is_live(offset) => Err(LockBusError::AlreadyLocked {
                    subject: subject.to_string(),
                    locked_until: held.event.expires_at(),
                }),
                _ => Ok(()),
            },
        )?;
        Ok(stored.token())
    }

    /// Renew the lease proven by `token` for another `duration_ms`.
    ///
    /// Fails when the subject has no table entry or the entry's id differs
    /// from the token's (the lease expired and was re-granted, or the token
    /// was never valid). On success the returned token supersedes the old
    /// one.
    pub fn extend(&self, token: &Token, duration_ms: u64) -> Result<Token> {
        let subject = token.subject.clone();
        let id = token.id.clone();
        let stored = self.inner.publish(
            &subject,
            |issuer| Event::new(Command::Extend, subject.as_str(), duration_ms, issuer),
            |table| match table.get(&subject) {
                Some(held) if held.event.id == id => Ok(()),
                Some(_) => Err(LockBusError::Protocol(format!(
                    "cannot extend '{}': lease is held by a different token",
                    subject
                ))),
                None => Err(LockBusError::Protocol(format!(
                    "cannot extend '{}': no lease is currently held",
                    subject
                ))),
            },
        )?;
        Ok(stored.token())
    }

    /// End the lease proven by `token`.
    ///
    /// Never fails: internal errors degrade to a best-effort answer. Returns
    /// whether this instance's own view now shows the subject unlocked.
    pub fn release(&self, token: &Token) -> bool {
        let subject = token.subject.clone();
        let id = token.id.clone();

        let result = self.inner.publish(
            &subject,
            |issuer| Event::new(Command::Release, subject.as_str(), 0, issuer).with_id(id.clone()),
            |table| match table.get(&subject) {
                Some(held) if held.event.id == id => Ok(()),
                _ => Err(LockBusError::Protocol(format!(
                    "subject '{}' is not held by this token",
                    subject
                ))),
            },
        );

        if let Err(e) = result {
            tracing::debug!(subject = %subject, error = %e, "release fell back to cached view");
        }

        !self.is_locked(&subject)
    }

    /// Publish the notification-only KILL command for `subject`.
    ///
    /// Listeners registered for [`Command::Kill`] on every instance will see
    /// it; the lock table is unaffected.
    pub fn kill(&self, subject: &str) -> Result<()> {
        self.inner.publish(
            subject,
            |issuer| Event::new(Command::Kill, subject, 0, issuer),
            |_table| Ok(()),
        )?;
        Ok(())
    }

    /// Whether any instance currently holds `subject`.
    pub fn is_locked(&self, subject: &str) -> bool {
        self.live_entry_issuer(subject).is_some()
    }

    /// Whether this instance currently holds `subject`.
    pub fn is_locked_by_this_instance(&self, subject: &str) -> bool {
        self.live_entry_issuer(subject)
            .is_some_and(|issuer| issuer == self.inner.issuer)
    }

    /// Whether a different instance currently holds `subject`.
    pub fn is_locked_by_another_instance(&self, subject: &str) -> bool {
        self.live_entry_issuer(subject)
            .is_some_and(|issuer| issuer != self.inner.issuer)
    }

    /// Subscribe `callback` to every applied event of the given command.
    ///
    /// Callbacks run on the dispatch thread, decoupled from publish and
    /// replay; failures are isolated and logged, never propagated. Ordering
    /// relative to subsequent events is not guaranteed.
    pub fn register_event_listener<F>(&self, command: Command, callback: F, options: ListenerOptions)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().unwrap().push(Listener {
            command,
            options,
            callback: Arc::new(callback),
        });
    }

    /// Stop the background threads and wait for them to exit.
    ///
    /// Dropping the bus does the same; this form just makes the stop
    /// explicit at the call site.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Issuer of the live lease on `subject`, refreshing the table first.
    ///
    /// Queries answer from the cached table when the lazy refresh fails;
    /// a stale answer here is no worse than one computed a moment earlier.
    fn live_entry_issuer(&self, subject: &str) -> Option<String> {
        let mut state = self.inner.state.lock().unwrap();
        if let Err(e) = self.inner.replay(&mut state) {
            tracing::debug!(error = %e, "lazy table refresh failed; using cached view");
        }
        state
            .table
            .get(subject)
            .filter(|held| held.event.is_live(self.inner.config.expiry_offset_ms))
            .map(|held| held.event.issuer.clone())
    }

    fn stop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // Closing the channel lets the dispatch loop drain and exit.
        self.inner.dispatch_tx.lock().unwrap().take();

        if let Some(handle) = self.watch.take()
            && handle.join().is_err()
        {
            tracing::warn!("watch thread exited abnormally");
        }
        if let Some(handle) = self.dispatch.take()
            && handle.join().is_err()
        {
            tracing::warn!("listener dispatch thread exited abnormally");
        }
    }
}

impl Drop for LockBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Hand an applied event to the dispatch thread.
    pub(crate) fn notify_listeners(&self, event: &Event) {
        let guard = self.dispatch_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref()
            && tx.send(event.clone()).is_err()
        {
            tracing::debug!("listener dispatch channel closed");
        }
    }

    /// Whether `event` is expired past every allowance and safe to sweep
    /// or garbage-collect.
    pub(crate) fn surely_out_of_date(&self, event: &Event) -> bool {
        let allowance = chrono::Duration::milliseconds(
            (self.config.expiry_offset_ms + self.config.out_of_date_margin_ms) as i64,
        );
        let reference = if event.command.grants_lease() {
            event.expires_at()
        } else {
            event.time
        };
        chrono::Utc::now() > reference + allowance
    }
}

/// Identifier for this bus instance: `user@host:pid:nonce`.
///
/// The pid and random nonce keep two instances on the same host distinct.
fn make_issuer() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let mut nonce = uuid::Uuid::new_v4().simple().to_string();
    nonce.truncate(8);

    format!("{}@{}:{}:{}", user, host, std::process::id(), nonce)
}
