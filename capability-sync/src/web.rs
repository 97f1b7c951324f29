//! Browser bindings: `localStorage` as override storage, the cross-tab
//! storage signal, and the page-level `assistant-tools-updated` event.
//!
//! Nothing here holds a JS handle across calls except [`SignalListener`];
//! the window and storage objects are looked up on every use.

use shared_types::{ChangeNotification, CROSS_TAB_SIGNAL_KEY, EVENT_ASSISTANT_TOOLS_UPDATED};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CustomEvent, CustomEventInit, DomException, StorageEvent};

use crate::broadcast::{decode_signal, encode_signal, ChangeBroadcaster, ChangeTransport};
use crate::error::{StorageError, TransportError};
use crate::storage::KeyValueStorage;

fn browser_storage() -> Result<web_sys::Storage, StorageError> {
    web_sys::window()
        .and_then(|w| w.local_storage().ok().flatten())
        .ok_or(StorageError::Disabled)
}

fn describe(err: &JsValue) -> String {
    if let Some(dom) = err.dyn_ref::<DomException>() {
        return format!("{}: {}", dom.name(), dom.message());
    }
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

fn is_quota_error(err: &JsValue) -> bool {
    err.dyn_ref::<DomException>().is_some_and(|dom| {
        let name = dom.name();
        name == "QuotaExceededError" || name == "NS_ERROR_DOM_QUOTA_REACHED"
    })
}

/// `window.localStorage`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    /// False in private modes or sandboxed frames that block storage.
    pub fn is_available() -> bool {
        browser_storage().is_ok()
    }
}

impl KeyValueStorage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        browser_storage()?
            .get_item(key)
            .map_err(|e| StorageError::Backend(describe(&e)))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        browser_storage()?.set_item(key, value).map_err(|e| {
            if is_quota_error(&e) {
                StorageError::QuotaExceeded {
                    key: key.to_string(),
                }
            } else {
                StorageError::Backend(describe(&e))
            }
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        browser_storage()?
            .remove_item(key)
            .map_err(|e| StorageError::Backend(describe(&e)))
    }
}

/// Writes each notification under the signal key so other tabs get a
/// `storage` event.
#[derive(Debug, Clone)]
pub struct StorageSignalTransport {
    key: String,
}

impl Default for StorageSignalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageSignalTransport {
    pub fn new() -> Self {
        Self::with_key(CROSS_TAB_SIGNAL_KEY)
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Feed `storage` events for the signal key into `broadcaster`.
    ///
    /// The listener stays registered until the returned handle is dropped.
    pub fn listen(&self, broadcaster: &ChangeBroadcaster) -> Result<SignalListener, TransportError> {
        let window =
            web_sys::window().ok_or_else(|| TransportError::new("no window object"))?;

        let key = self.key.clone();
        let target = broadcaster.clone();
        let on_storage = Closure::wrap(Box::new(move |e: StorageEvent| {
            if e.key().as_deref() != Some(key.as_str()) {
                return;
            }
            let Some(raw) = e.new_value() else {
                return;
            };
            if let Some(notification) = decode_signal(&raw) {
                target.deliver_remote(&notification);
            }
        }) as Box<dyn FnMut(StorageEvent)>);

        window
            .add_event_listener_with_callback("storage", on_storage.as_ref().unchecked_ref())
            .map_err(|e| TransportError::new(describe(&e)))?;

        Ok(SignalListener {
            window,
            on_storage,
        })
    }
}

impl ChangeTransport for StorageSignalTransport {
    fn name(&self) -> &str {
        "storage-signal"
    }

    fn send(&self, notification: &ChangeNotification) -> Result<(), TransportError> {
        let payload = encode_signal(notification)?;
        let storage = browser_storage().map_err(|e| TransportError::new(e.to_string()))?;
        storage
            .set_item(&self.key, &payload)
            .map_err(|e| TransportError::new(describe(&e)))
    }
}

/// Registered `storage` listener. Dropping it removes the listener.
pub struct SignalListener {
    window: web_sys::Window,
    on_storage: Closure<dyn FnMut(StorageEvent)>,
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("storage", self.on_storage.as_ref().unchecked_ref());
    }
}

/// Re-emits notifications as a `CustomEvent` on `window` for page code
/// outside this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageEventTransport;

impl ChangeTransport for PageEventTransport {
    fn name(&self) -> &str {
        EVENT_ASSISTANT_TOOLS_UPDATED
    }

    fn send(&self, notification: &ChangeNotification) -> Result<(), TransportError> {
        dispatch_page_event(notification)
    }
}

pub fn dispatch_page_event(notification: &ChangeNotification) -> Result<(), TransportError> {
    let window = web_sys::window().ok_or_else(|| TransportError::new("no window object"))?;
    let json = encode_signal(notification)?;
    let detail = js_sys::JSON::parse(&json).map_err(|e| TransportError::new(describe(&e)))?;

    let init = CustomEventInit::new();
    init.set_detail(&detail);
    let event = CustomEvent::new_with_event_init_dict(EVENT_ASSISTANT_TOOLS_UPDATED, &init)
        .map_err(|e| TransportError::new(describe(&e)))?;

    window
        .dispatch_event(&event)
        .map(|_| ())
        .map_err(|e| TransportError::new(describe(&e)))
}

/// Wire a page broadcaster to the other tabs and to page-level listeners.
pub fn connect_page(broadcaster: &ChangeBroadcaster) -> Result<SignalListener, TransportError> {
    let signal = StorageSignalTransport::new();
    let listener = signal.listen(broadcaster)?;
    broadcaster.attach_transport(std::sync::Arc::new(signal));
    broadcaster.attach_transport(std::sync::Arc::new(PageEventTransport));
    Ok(listener)
}
