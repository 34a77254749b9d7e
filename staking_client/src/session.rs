//! Wallet session: which identity is connected, and who wants to know
//!
//! The session is the single dispatch point for connection changes. Handlers
//! are registered with [`WalletSession::on_connection_change`] and stay
//! registered until the returned [`Subscription`] is dropped or
//! unsubscribed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

/// Connection change delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(Pubkey),
    /// The wallet switched accounts without disconnecting
    AccountChanged { previous: Pubkey, current: Pubkey },
    Disconnected(Pubkey),
}

type Handler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connected identity for one user session
#[derive(Default)]
pub struct WalletSession {
    current: RwLock<Option<Pubkey>>,
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("current", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl WalletSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that starts out connected to `pubkey`
    pub fn connected(pubkey: Pubkey) -> Self {
        let session = Self::new();
        session.connect(pubkey);
        session
    }

    /// Currently connected identity, if any
    pub fn current(&self) -> Option<Pubkey> {
        *self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Connect `pubkey`, replacing any previous identity
    pub fn connect(&self, pubkey: Pubkey) {
        let previous = self.replace(Some(pubkey));
        let event = match previous {
            Some(previous) if previous == pubkey => return,
            Some(previous) => ConnectionEvent::AccountChanged { previous, current: pubkey },
            None => ConnectionEvent::Connected(pubkey),
        };
        info!(wallet = %pubkey, "Wallet connected");
        self.dispatch(event);
    }

    pub fn disconnect(&self) {
        if let Some(previous) = self.replace(None) {
            info!(wallet = %previous, "Wallet disconnected");
            self.dispatch(ConnectionEvent::Disconnected(previous));
        }
    }

    /// Register `handler` for connection changes
    pub fn on_connection_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, Arc::new(handler));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.len()
    }

    fn replace(&self, next: Option<Pubkey>) -> Option<Pubkey> {
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, next)
    }

    fn dispatch(&self, event: ConnectionEvent) {
        // Handlers run outside the lock so they may unsubscribe themselves
        let handlers: Vec<Handler> = lock(&self.registry).handlers.values().cloned().collect();
        debug!(?event, subscribers = handlers.len(), "Dispatching connection event");
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Keeps a connection handler registered; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).handlers.remove(&self.id);
        }
    }
}
