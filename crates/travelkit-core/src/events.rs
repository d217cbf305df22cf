//! Revocation notifications for the host application.
//!
//! The [`EventsHub`] holds at most one handler. The session manager fires it
//! when the backend invalidates the current session's credentials, so the
//! host can send the user back through sign-in.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

/// Zero-argument callback fired on session revocation.
pub type RevocationHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct EventsHub {
    revocation_handler: Mutex<Option<RevocationHandler>>,
}

impl EventsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered handler. `None` clears it.
    pub fn register_revocation_handler(&self, handler: Option<RevocationHandler>) {
        debug!(registered = handler.is_some(), "Revocation handler updated");
        *self.slot() = handler;
    }

    #[cfg(test)]
    fn has_revocation_handler(&self) -> bool {
        self.slot().is_some()
    }

    /// Invoke the registered handler once, if any.
    ///
    /// The handler runs outside the slot lock, so it may re-register. A panic
    /// inside it is caught and logged instead of unwinding into the caller.
    pub fn notify_revocation(&self) {
        let handler = self.slot().clone();
        let Some(handler) = handler else {
            debug!("Session revoked with no handler registered");
            return;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
            error!("Revocation handler panicked");
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RevocationHandler>> {
        // The slot only ever holds a fully written Option, so a poisoned lock
        // is still safe to reuse.
        self.revocation_handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> RevocationHandler {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notify_without_handler_is_noop() {
        let hub = EventsHub::new();
        assert!(!hub.has_revocation_handler());
        hub.notify_revocation();
    }

    #[test]
    fn test_notify_calls_handler_once() {
        let hub = EventsHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        hub.register_revocation_handler(Some(counting_handler(&count)));

        hub.notify_revocation();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let hub = EventsHub::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        hub.register_revocation_handler(Some(counting_handler(&first)));
        hub.register_revocation_handler(Some(counting_handler(&second)));
        hub.notify_revocation();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_none_clears_handler() {
        let hub = EventsHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        hub.register_revocation_handler(Some(counting_handler(&count)));
        hub.register_revocation_handler(None);

        hub.notify_revocation();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!hub.has_revocation_handler());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let hub = EventsHub::new();
        hub.register_revocation_handler(Some(Arc::new(|| panic!("host bug"))));

        hub.notify_revocation();
        // Hub is still usable afterwards
        let count = Arc::new(AtomicUsize::new(0));
        hub.register_revocation_handler(Some(counting_handler(&count)));
        hub.notify_revocation();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_reregister_during_notify() {
        let hub = Arc::new(EventsHub::new());
        let inner = Arc::clone(&hub);
        hub.register_revocation_handler(Some(Arc::new(move || {
            inner.register_revocation_handler(None);
        })));

        hub.notify_revocation();
        assert!(!hub.has_revocation_handler());
    }
}
