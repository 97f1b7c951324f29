//! ChangeBroadcaster - "assistant capabilities changed" fan-out
//!
//! One broadcaster lives per page (tab). `publish` delivers synchronously to
//! every in-process subscriber, then hands the notification to each attached
//! [`ChangeTransport`] so other tabs and non-Rust page code hear about it.
//!
//! # Delivery rules
//!
//! - Every subscriber sees every notification; filtering by entity is the
//!   subscriber's job.
//! - No replay: a subscriber added after a publish never sees it.
//! - A panicking subscriber is logged and skipped; the rest still run.
//! - Handlers run with no lock held, so they may subscribe or unsubscribe.
//! - Notifications arriving from another tab are delivered locally only and
//!   are never forwarded again.

use shared_types::ChangeNotification;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::error::TransportError;

type Handler = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

/// Carries notifications beyond this broadcaster's own subscribers
pub trait ChangeTransport: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, notification: &ChangeNotification) -> Result<(), TransportError>;
}

/// Wire form of a notification as carried between tabs and to page code.
pub fn encode_signal(notification: &ChangeNotification) -> Result<String, TransportError> {
    serde_json::to_string(notification).map_err(|e| TransportError::new(e.to_string()))
}

/// Parse a signal written by another tab. Malformed payloads are logged and dropped.
pub fn decode_signal(raw: &str) -> Option<ChangeNotification> {
    match serde_json::from_str(raw) {
        Ok(notification) => Some(notification),
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring malformed cross-tab capability signal");
            None
        }
    }
}

struct Hub {
    origin: String,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Handler)>>,
    transports: RwLock<Vec<Arc<dyn ChangeTransport>>>,
}

impl Hub {
    fn dispatch(&self, notification: &ChangeNotification) {
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(notification)));
            if outcome.is_err() {
                tracing::warn!(
                    entity_id = %notification.entity_id,
                    origin = %self.origin,
                    "Capability change subscriber panicked; continuing delivery"
                );
            }
        }
    }

    fn remove(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(subscriber_id, _)| *subscriber_id != id);
    }
}

#[derive(Clone)]
pub struct ChangeBroadcaster {
    hub: Arc<Hub>,
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("origin", &self.hub.origin)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::with_origin(ulid::Ulid::new().to_string())
    }

    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            hub: Arc::new(Hub {
                origin: origin.into(),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                transports: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Id stamped on every notification this broadcaster emits
    pub fn origin(&self) -> &str {
        &self.hub.origin
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChangeNotification) + Send + Sync + 'static,
    {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        self.hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            hub: Arc::downgrade(&self.hub),
            id,
            active: true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn attach_transport(&self, transport: Arc<dyn ChangeTransport>) {
        tracing::debug!(origin = %self.hub.origin, transport = transport.name(), "Attached change transport");
        self.hub
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    /// Notify local subscribers, then every attached transport.
    ///
    /// Callers write the override store first, so handlers that re-resolve
    /// see the new value.
    pub fn publish(&self, entity_id: &str, capability_ids: &[String]) -> ChangeNotification {
        let notification =
            ChangeNotification::new(entity_id, capability_ids.to_vec(), self.hub.origin.clone());
        tracing::debug!(
            entity_id = %entity_id,
            count = capability_ids.len(),
            "Publishing capability change"
        );

        self.hub.dispatch(&notification);

        let transports = self
            .hub
            .transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for transport in transports {
            if let Err(e) = transport.send(&notification) {
                tracing::warn!(
                    entity_id = %entity_id,
                    transport = transport.name(),
                    error = %e,
                    "Failed to forward capability change"
                );
            }
        }

        notification
    }

    /// Entry point for notifications that arrived from another tab.
    /// Echoes of this broadcaster's own publishes are ignored.
    pub fn deliver_remote(&self, notification: &ChangeNotification) {
        if notification.origin == self.hub.origin {
            return;
        }
        self.hub.dispatch(notification);
    }
}

/// Handle for one registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    hub: Weak<Hub>,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the handler registered for the broadcaster's whole lifetime.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// In-memory stand-in for same-origin tabs.
///
/// Each connected broadcaster is one tab. A publish in one tab reaches every
/// other connected tab; the publishing tab is skipped, matching how browsers
/// fire `storage` events.
#[derive(Clone, Default)]
pub struct TabBus {
    tabs: Arc<Mutex<Vec<Weak<Hub>>>>,
}

impl TabBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, broadcaster: &ChangeBroadcaster) {
        self.tabs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&broadcaster.hub));
        broadcaster.attach_transport(Arc::new(TabLink {
            bus: self.clone(),
            origin: broadcaster.origin().to_string(),
        }));
    }

    /// Number of tabs still alive
    pub fn tab_count(&self) -> usize {
        let mut tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        tabs.retain(|tab| tab.strong_count() > 0);
        tabs.len()
    }
}

struct TabLink {
    bus: TabBus,
    origin: String,
}

impl ChangeTransport for TabLink {
    fn name(&self) -> &str {
        "tab-bus"
    }

    fn send(&self, notification: &ChangeNotification) -> Result<(), TransportError> {
        let peers: Vec<Arc<Hub>> = {
            let mut tabs = self
                .bus
                .tabs
                .lock()
                .map_err(|_| TransportError::new("tab bus lock poisoned"))?;
            tabs.retain(|tab| tab.strong_count() > 0);
            tabs.iter()
                .filter_map(Weak::upgrade)
                .filter(|hub| hub.origin != self.origin)
                .collect()
        };

        for hub in peers {
            hub.dispatch(notification);
        }
        Ok(())
    }
}
