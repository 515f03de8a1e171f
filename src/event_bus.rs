//! Single-threaded in-process publisher of typed domain events (§5)
//!
//! Delivery is synchronous on the publisher's thread; listeners must be
//! non-blocking or dispatch to their own workers. Ordering is per-publisher
//! FIFO; across publishers there is no ordering guarantee.

use std::sync::{Arc, Mutex};

/// Events published by core components for other components to react to.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The active CA was rotated (new type, or first-time generation).
    CAChanged {
        /// The new CA's fingerprint.
        fingerprint: String,
    },
    /// A leaf certificate was issued or rotated for a generator.
    CertificateIssued {
        /// The issuing generator's id, as `Display`-formatted by the caller.
        generator_id: u64,
        /// The new certificate's fingerprint.
        fingerprint: String,
    },
    /// The background reconciler completed a run.
    ReconciliationCompleted {
        /// Things removed during this run.
        orphaned_things: usize,
        /// Certificates removed during this run.
        orphaned_certificates: usize,
    },
}

/// A listener callback. Must be non-blocking (§5); long-running work should
/// be dispatched to the listener's own task/thread.
pub type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Synchronous, in-process pub/sub for [`DomainEvent`]s.
#[derive(Default, Clone)]
pub struct DomainEventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl DomainEventBus {
    /// An event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, invoked synchronously on every future `publish`.
    pub fn subscribe(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Deliver `event` to every current listener, in subscription order.
    pub fn publish(&self, event: DomainEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    /// Current subscriber count.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}
