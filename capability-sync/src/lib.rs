//! Capability Sync - which tools an assistant may use, right now
//!
//! Combines the server's capability registry, the assistant's persisted
//! allow-list and a local optimistic override cache into one effective
//! capability set, and keeps every open view of an assistant in step when
//! that set is edited.
//!
//! The pieces:
//! - [`registry`] fetches the active capability catalogue
//! - [`override_store`] caches unsaved-to-server edits per assistant
//! - [`resolver`] merges everything into an [`EffectiveCapabilitySet`]
//! - [`broadcast`] tells other views (and tabs) that a set changed
//! - [`editor`] ties the write path together

pub mod broadcast;
pub mod categories;
pub mod config;
pub mod editor;
pub mod entity;
pub mod error;
pub mod override_store;
pub mod registry;
pub mod resolver;
pub mod snapshot;
pub mod storage;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use broadcast::{
    decode_signal, encode_signal, ChangeBroadcaster, ChangeTransport, Subscription, TabBus,
};
pub use config::{EmptyOverridePolicy, OverrideKeys, SyncConfig};
pub use editor::{CapabilityEditor, SaveOutcome, ServerSync};
pub use entity::{EntityBackend, HttpEntityBackend};
pub use error::{
    ConfigError, EntityError, RegistryFailureKind, RegistryUnavailable, StorageError, StoreError,
    TransportError,
};
pub use override_store::OverrideStore;
pub use registry::{CapabilityRegistryClient, CapabilitySource, RegistryStatus, SnapshotSlot};
pub use resolver::{CapabilitySetResolver, CapabilityWatch, EffectiveCapabilitySet, ResolutionSource};
pub use snapshot::{Capability, CapabilitySnapshot};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
