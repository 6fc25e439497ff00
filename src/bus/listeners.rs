//! Listener registry and the off-critical-path dispatch loop.
//!
//! Applied events are cloned onto a channel and fanned out by one dedicated
//! dispatch thread, so a slow or panicking callback can never stall event
//! publication or replay. The trade-off is ordering: a listener may observe
//! an event after later events have already been applied to the table.

use super::Inner;
use crate::event::{Command, Event};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};

/// Options controlling when a registered listener fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Skip events this bus instance published itself.
    ///
    /// Collaborators reacting to lock releases set this so they do not
    /// respond to their own writes.
    pub skip_own_events: bool,
}

pub(crate) type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// One registered subscription.
pub(crate) struct Listener {
    pub(crate) command: Command,
    pub(crate) options: ListenerOptions,
    pub(crate) callback: Callback,
}

/// Body of the dispatch thread. Exits when the sending side closes.
pub(crate) fn dispatch_loop(inner: Arc<Inner>, rx: mpsc::Receiver<Event>) {
    while let Ok(event) = rx.recv() {
        let matching: Vec<(Callback, ListenerOptions)> = {
            let listeners = inner.listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|listener| listener.command == event.command)
                .map(|listener| (Arc::clone(&listener.callback), listener.options))
                .collect()
        };

        for (callback, options) in matching {
            if options.skip_own_events && event.issuer == inner.issuer {
                continue;
            }
            // Listener failures are isolated: logged, never propagated.
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::warn!(
                    command = %event.command,
                    subject = %event.subject,
                    "event listener panicked"
                );
            }
        }
    }
}
