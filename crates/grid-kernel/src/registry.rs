//! Subscription registry — protocol identifier to handler.
//!
//! Keys are the lowercase hex form of the protocol bytes, so any two
//! messages with byte-equal protocols reach the same handler. Each key holds
//! exactly one handler; subscribing again replaces it.

use grid_wire::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A handler invoked with every message whose protocol it subscribed to.
pub type Handler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// Registry key for a protocol identifier.
pub fn protocol_key(protocol: &[u8]) -> String {
    hex::encode(protocol)
}

/// Thread-safe protocol → handler map.
///
/// Lookups take the read lock and may run concurrently; `subscribe` and
/// `unsubscribe` take the write lock.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl SubscriptionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `protocol`. Returns true if a previous handler
    /// was replaced.
    pub fn subscribe(&self, protocol: &[u8], handler: Handler) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(protocol_key(protocol), handler).is_some()
    }

    /// Remove the handler for `protocol`. Returns true if one was registered.
    pub fn unsubscribe(&self, protocol: &[u8]) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(&protocol_key(protocol)).is_some()
    }

    /// The handler for `protocol`, if any.
    ///
    /// The lock is released before the handler is returned, so a handler may
    /// itself subscribe or unsubscribe.
    pub fn lookup(&self, protocol: &[u8]) -> Option<Handler> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&protocol_key(protocol)).cloned()
    }

    pub fn contains(&self, protocol: &[u8]) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(&protocol_key(protocol))
    }

    /// Keys of all current subscriptions.
    pub fn protocols(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}
