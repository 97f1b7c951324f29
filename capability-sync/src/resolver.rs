//! CapabilitySetResolver - what an assistant may use right now
//!
//! Precedence, applied in order:
//!
//! 1. the server's `allowed_capabilities`;
//! 2. a cached override replaces it outright (never merged);
//! 3. an active category selection replaces the flat set with the union of
//!    its categories, expanded against the current registry snapshot;
//! 4. the environment toggle adds the configured grants on top.
//!
//! Resolution never blocks. Before the registry has loaded, category
//! expansion is empty and the result is flagged `awaiting_registry`; the
//! answer converges once the snapshot lands and the caller resolves again.

use shared_types::AssistantRecord;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::broadcast::{ChangeBroadcaster, Subscription};
use crate::categories;
use crate::config::{EmptyOverridePolicy, SyncConfig};
use crate::override_store::OverrideStore;
use crate::registry::SnapshotSlot;
use crate::snapshot::CapabilitySnapshot;

/// Which rule produced the base set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Server,
    Override,
    Categories,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Override => "override",
            Self::Categories => "categories",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveCapabilitySet {
    ids: BTreeSet<String>,
    source: ResolutionSource,
    environment_granted: bool,
    awaiting_registry: bool,
}

impl EffectiveCapabilitySet {
    pub fn contains(&self, capability_id: &str) -> bool {
        self.ids.contains(capability_id)
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn source(&self) -> ResolutionSource {
        self.source
    }

    pub fn environment_granted(&self) -> bool {
        self.environment_granted
    }

    /// Category mode is active but no snapshot has loaded yet
    pub fn awaiting_registry(&self) -> bool {
        self.awaiting_registry
    }
}

#[derive(Debug)]
pub struct CapabilitySetResolver {
    store: OverrideStore,
    registry: Arc<SnapshotSlot>,
    environment_grants: Vec<String>,
    empty_override: EmptyOverridePolicy,
}

impl CapabilitySetResolver {
    pub fn new(store: OverrideStore, registry: Arc<SnapshotSlot>, config: &SyncConfig) -> Self {
        Self {
            store,
            registry,
            environment_grants: config.environment_grants.clone(),
            empty_override: config.empty_override,
        }
    }

    pub fn store(&self) -> &OverrideStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SnapshotSlot> {
        &self.registry
    }

    pub fn environment_grants(&self) -> &[String] {
        &self.environment_grants
    }

    pub fn resolve(&self, entity: &AssistantRecord) -> EffectiveCapabilitySet {
        let selection = self.store.categories(&entity.id);
        self.resolve_inner(entity, selection.as_deref(), self.registry.snapshot().as_deref())
    }

    /// Resolve as if `categories` were the saved selection (unsaved picker state).
    pub fn resolve_with_categories(
        &self,
        entity: &AssistantRecord,
        categories: &[String],
    ) -> EffectiveCapabilitySet {
        self.resolve_inner(entity, Some(categories), self.registry.snapshot().as_deref())
    }

    pub fn is_authorized(&self, entity: &AssistantRecord, capability_id: &str) -> bool {
        self.resolve(entity).contains(capability_id)
    }

    fn resolve_inner(
        &self,
        entity: &AssistantRecord,
        selection: Option<&[String]>,
        snapshot: Option<&CapabilitySnapshot>,
    ) -> EffectiveCapabilitySet {
        let mut ids: BTreeSet<String> = entity.allowed_capabilities.iter().cloned().collect();
        let mut source = ResolutionSource::Server;

        if let Some(cached) = self.store.get(&entity.id) {
            let honoured = !cached.is_empty() || self.empty_override == EmptyOverridePolicy::Suppress;
            if honoured {
                ids = cached.into_iter().collect();
                source = ResolutionSource::Override;
            }
        }

        let mut awaiting_registry = false;
        if let Some(selected) = selection {
            source = ResolutionSource::Categories;
            ids = match snapshot {
                Some(snapshot) => categories::expand(snapshot, selected).into_iter().collect(),
                None => {
                    awaiting_registry = true;
                    BTreeSet::new()
                }
            };
        }

        let environment_granted = self.store.environment_toggle(&entity.id);
        if environment_granted {
            ids.extend(self.environment_grants.iter().cloned());
        }

        tracing::trace!(
            entity_id = %entity.id,
            source = source.as_str(),
            count = ids.len(),
            awaiting_registry,
            "Resolved capability set"
        );

        EffectiveCapabilitySet {
            ids,
            source,
            environment_granted,
            awaiting_registry,
        }
    }
}

#[derive(Debug, Default)]
struct WatchCache {
    resolved: Option<EffectiveCapabilitySet>,
    snapshot: Option<Arc<CapabilitySnapshot>>,
}

/// Cached effective set for one assistant that drops itself whenever a
/// change notification for that assistant arrives, in this tab or another.
///
/// This is what a chat composer holds to decide whether a tool toggle is
/// shown as available.
pub struct CapabilityWatch {
    resolver: Arc<CapabilitySetResolver>,
    entity: Arc<Mutex<AssistantRecord>>,
    cache: Arc<Mutex<WatchCache>>,
    version: Arc<AtomicU64>,
    subscription: Option<Subscription>,
}

impl CapabilityWatch {
    pub fn new(
        resolver: Arc<CapabilitySetResolver>,
        broadcaster: &ChangeBroadcaster,
        entity: AssistantRecord,
    ) -> Self {
        let cache = Arc::new(Mutex::new(WatchCache::default()));
        let version = Arc::new(AtomicU64::new(0));

        let entity = Arc::new(Mutex::new(entity));

        let handler_entity = entity.clone();
        let handler_cache = cache.clone();
        let handler_version = version.clone();
        let subscription = broadcaster.subscribe(move |notification| {
            let watched = handler_entity
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .id
                .clone();
            if !notification.concerns(&watched) {
                return;
            }
            handler_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .resolved = None;
            handler_version.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            resolver,
            entity,
            cache,
            version,
            subscription: Some(subscription),
        }
    }

    pub fn entity_id(&self) -> String {
        self.entity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone()
    }

    /// Replace the server projection (e.g. after re-fetching the assistant).
    pub fn set_entity(&self, entity: AssistantRecord) {
        *self.entity.lock().unwrap_or_else(PoisonError::into_inner) = entity;
        self.invalidate();
    }

    pub fn current(&self) -> EffectiveCapabilitySet {
        let latest_snapshot = self.resolver.registry().snapshot();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot_changed = match (&cache.snapshot, &latest_snapshot) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if let (Some(resolved), false) = (&cache.resolved, snapshot_changed) {
            return resolved.clone();
        }

        let entity = self
            .entity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let resolved = self.resolver.resolve(&entity);
        cache.resolved = Some(resolved.clone());
        cache.snapshot = latest_snapshot;
        resolved
    }

    pub fn is_authorized(&self, capability_id: &str) -> bool {
        self.current().contains(capability_id)
    }

    pub fn invalidate(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolved = None;
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of invalidations seen so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
