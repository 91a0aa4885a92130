//! The "unauthorized" signal raised when the server rejects our token.

use parking_lot::Mutex;
use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Weak},
};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// A process-wide notification that the current credentials were rejected.
///
/// Cloning gives another handle to the same set of listeners.
#[derive(Clone, Default)]
pub struct UnauthorizedSignal {
    inner: Arc<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next_id: Mutex<u64>,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl UnauthorizedSignal {
    pub fn new() -> Self { UnauthorizedSignal::default() }

    /// Register a listener which is called every time the signal is raised.
    ///
    /// The listener stays registered for as long as the returned
    /// [`Subscription`] is alive.
    #[must_use = "the listener is removed as soon as the subscription is dropped"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = {
            let mut next_id = self.inner.next_id.lock();
            *next_id += 1;
            *next_id
        };

        let listener: Listener = Arc::new(listener);
        self.inner.entries.lock().push((id, listener));
        log::trace!("Registered unauthorized listener #{}", id);

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// Notify every listener, in the order they subscribed.
    pub fn raise(&self) {
        // listeners may subscribe or unsubscribe while we're notifying
        let listeners: Vec<Listener> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        log::debug!(
            "Raising the unauthorized signal for {} listener(s)",
            listeners.len()
        );

        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize { self.inner.entries.lock().len() }
}

impl Debug for UnauthorizedSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnauthorizedSignal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered with an [`UnauthorizedSignal`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.lock().retain(|(id, _)| *id != self.id);
            log::trace!("Removed unauthorized listener #{}", self.id);
        }
    }
}
