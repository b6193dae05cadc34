//! # Subscriber Registry
//!
//! Tracks every downstream client currently connected to the relay. Each client
//! gets an unbounded channel; the `Dispatcher` pushes frames into it and the
//! client's own socket task drains it. Membership only ever reflects liveness as
//! observed by this process: a client leaves when its task unregisters or when a
//! send into its channel fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::sync::mpsc;

/// Identifier handed out to every registered subscriber.
pub type SubscriberId = u64;

/// Text of the greeting sent to every new subscriber.
pub const GREETING_TEXT: &str = "Connected to the AIS relay. Waiting for data...";

/// Readiness of a subscriber's transport. Only `Open` subscribers receive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Accepting frames.
    Open,
    /// A close handshake is in progress; frames are skipped.
    Closing,
    /// The transport is gone; frames are skipped until the entry is removed.
    Closed,
}

/// An entry in the live set.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) ready: ReadyState,
    pub(crate) sender: mpsc::UnboundedSender<Arc<str>>,
}

/// # Registry
///
/// The live set of subscribers, guarded by a mutex so that concurrent
/// register/unregister calls and broadcasts never see a half-updated list.
pub struct Registry {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    greeting: Arc<str>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry using the standard greeting.
    pub fn new() -> Self {
        Self::with_greeting(GREETING_TEXT)
    }

    /// Creates an empty registry with a custom greeting text.
    pub fn with_greeting(text: &str) -> Self {
        let envelope = json!({ "type": "info", "message": text }).to_string();
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            greeting: Arc::from(envelope),
        }
    }

    /// The serialized greeting envelope.
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// # Register
    ///
    /// Admits a new subscriber and returns its id and the receiving half of its
    /// channel. The greeting is queued before the subscriber joins the live set,
    /// so it is always the first frame the client sees, whatever the upstream
    /// is doing at the time.
    pub fn register(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // `rx` is still alive here, this send cannot fail.
        let _ = tx.send(Arc::clone(&self.greeting));

        let mut subscribers = self.lock();
        subscribers.push(Subscriber {
            id,
            ready: ReadyState::Open,
            sender: tx,
        });
        log::info!("Subscriber {} registered ({} connected)", id, subscribers.len());
        (id, rx)
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            log::info!("Subscriber {} unregistered ({} connected)", id, subscribers.len());
        }
        removed
    }

    /// Updates a subscriber's readiness. Returns `false` if it is not registered.
    pub fn set_ready_state(&self, id: SubscriberId, state: ReadyState) -> bool {
        match self.lock().iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                subscriber.ready = state;
                true
            }
            None => false,
        }
    }

    /// Current readiness of a subscriber, if registered.
    pub fn ready_state(&self, id: SubscriberId) -> Option<ReadyState> {
        self.lock().iter().find(|s| s.id == id).map(|s| s.ready)
    }

    /// Whether the subscriber is in the live set.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().iter().any(|s| s.id == id)
    }

    /// Number of registered subscribers, whatever their readiness.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` with exclusive access to the live set.
    pub(crate) fn with_members<R>(&self, f: impl FnOnce(&mut Vec<Subscriber>) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
