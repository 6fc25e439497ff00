//! lockbus: file-based lock and lease bus for orchestrator nodes that share
//! mutable state over a common filesystem.
//!
//! Multiple orchestrator instances — typically on different machines with
//! the same network mount — coordinate through an append-only journal of
//! lock events, one file per event, named by a dense zero-padded sequence
//! number. Publishing an event is an exclusive file create followed by a
//! read-after-write check; replaying the journal rebuilds a local lock
//! table that answers `is_locked` without any server in the picture.
//!
//! The bus provides advisory, lease-based mutual exclusion over named
//! "subjects" with at-most-one-granted-lock semantics per subject. It does
//! not provide transactions, leader election, or consensus.
//!
//! # Usage
//!
//! ```no_run
//! use lockbus::{BusConfig, Lock, LockBus};
//!
//! let bus = LockBus::open("/mnt/shared/orchestrator/events", BusConfig::default())?;
//!
//! {
//!     let lock = Lock::acquire(&bus, "proj-1", 30_000)?;
//!     // ... mutate proj-1's shared on-disk state, calling
//!     // lock.heartbeat() across long-running I/O ...
//!     lock.release();
//! } // dropped locks release themselves on every other exit path
//! # Ok::<(), lockbus::LockBusError>(())
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod journal;
pub mod lock;
pub mod notify;
pub mod stream;
pub mod token;

pub use bus::{ListenerOptions, LockBus};
pub use config::BusConfig;
pub use error::{LockBusError, Result};
pub use event::{Command, Event};
pub use lock::Lock;
pub use notify::{ChangeNotifier, PollingNotifier};
pub use stream::{LockedReader, LockedWriter};
pub use token::Token;
