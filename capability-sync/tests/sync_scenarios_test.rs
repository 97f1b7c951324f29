//! End-to-end resolution scenarios across the store, resolver, editor and
//! cross-tab broadcast, with in-process fakes for the registry and server.

#![cfg(not(target_arch = "wasm32"))]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use capability_sync::{
    CapabilityEditor, CapabilitySetResolver, CapabilitySnapshot, CapabilitySource,
    CapabilityWatch, ChangeBroadcaster, EntityBackend, EntityError, KeyValueStorage,
    MemoryStorage, OverrideStore, RegistryUnavailable, ResolutionSource, SnapshotSlot,
    SyncConfig, TabBus,
};
use shared_types::{AssistantRecord, CapabilityRecord, ChangeNotification};

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn record(name: &str, category: &str) -> CapabilityRecord {
    CapabilityRecord {
        name: name.to_string(),
        category: category.to_string(),
        description: None,
        display_name: None,
    }
}

struct FakeRegistry(Result<Vec<CapabilityRecord>, RegistryUnavailable>);

#[async_trait]
impl CapabilitySource for FakeRegistry {
    async fn fetch_snapshot(&self) -> Result<CapabilitySnapshot, RegistryUnavailable> {
        let records = self.0.clone()?;
        CapabilitySnapshot::from_records(records, 0)
    }
}

#[derive(Default)]
struct FakeServer {
    saved: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl EntityBackend for FakeServer {
    async fn fetch_entity(&self, entity_id: &str) -> Result<AssistantRecord, EntityError> {
        Ok(AssistantRecord::new(entity_id))
    }

    async fn update_allowed_capabilities(
        &self,
        entity_id: &str,
        capability_ids: &[String],
    ) -> Result<(), EntityError> {
        self.saved
            .lock()
            .unwrap()
            .push((entity_id.to_string(), capability_ids.to_vec()));
        Ok(())
    }
}

/// One browser tab: its own registry slot, broadcaster and resolver over
/// origin-shared storage.
struct Tab {
    broadcaster: ChangeBroadcaster,
    resolver: Arc<CapabilitySetResolver>,
    editor: CapabilityEditor,
}

async fn open_tab(
    storage: &MemoryStorage,
    bus: &TabBus,
    registry: &FakeRegistry,
    server: Arc<FakeServer>,
) -> Tab {
    let slot = Arc::new(SnapshotSlot::new());
    let _ = slot.refresh(registry).await;

    let store = OverrideStore::new(Arc::new(storage.clone()));
    let resolver = Arc::new(CapabilitySetResolver::new(
        store,
        slot,
        &SyncConfig::default(),
    ));
    let broadcaster = ChangeBroadcaster::new();
    bus.connect(&broadcaster);
    let editor = CapabilityEditor::new(resolver.clone(), broadcaster.clone(), server);

    Tab {
        broadcaster,
        resolver,
        editor,
    }
}

fn healthy_registry() -> FakeRegistry {
    FakeRegistry(Ok(vec![record("web_search", "Search"), record("calc", "Math")]))
}

#[tokio::test]
async fn test_category_mode_then_direct_override() {
    let storage = MemoryStorage::new();
    let bus = TabBus::new();
    let server = Arc::new(FakeServer::default());
    let tab = open_tab(&storage, &bus, &healthy_registry(), server.clone()).await;

    let a1 = AssistantRecord::new("a1").with_allowed(["calc"]);
    let resolved = tab.resolver.resolve(&a1);
    assert_eq!(resolved.to_vec(), ids(&["calc"]));
    assert_eq!(resolved.source(), ResolutionSource::Server);

    tab.editor.select_categories("a1", &ids(&["Search"])).await;
    let resolved = tab.resolver.resolve(&a1);
    assert_eq!(resolved.to_vec(), ids(&["web_search"]));
    assert_eq!(resolved.source(), ResolutionSource::Categories);

    let heard: Arc<Mutex<Vec<ChangeNotification>>> = Arc::default();
    let sink = heard.clone();
    let _sub = tab
        .broadcaster
        .subscribe(move |n| sink.lock().unwrap().push(n.clone()));

    tab.editor
        .save_capabilities("a1", &ids(&["calc", "web_search"]))
        .await;
    let resolved = tab.resolver.resolve(&a1);
    assert_eq!(resolved.to_vec(), ids(&["calc", "web_search"]));
    assert_eq!(resolved.source(), ResolutionSource::Override);

    let heard = heard.lock().unwrap();
    assert_eq!(heard.len(), 1);
    assert_eq!(heard[0].entity_id, "a1");
    assert_eq!(heard[0].capability_ids, ids(&["calc", "web_search"]));

    assert_eq!(
        server.saved.lock().unwrap().last(),
        Some(&("a1".to_string(), ids(&["calc", "web_search"])))
    );
}

#[tokio::test]
async fn test_registry_failure_keeps_flat_override() {
    let storage = MemoryStorage::new();
    let bus = TabBus::new();
    let offline = FakeRegistry(Err(RegistryUnavailable::transport("connection refused")));
    let tab = open_tab(&storage, &bus, &offline, Arc::new(FakeServer::default())).await;

    assert!(tab.resolver.registry().snapshot().is_none());
    assert!(tab.resolver.store().set("a1", &ids(&["calc"])));

    let a1 = AssistantRecord::new("a1").with_allowed(["web_search"]);
    assert_eq!(tab.resolver.resolve(&a1).to_vec(), ids(&["calc"]));

    let preview = tab.resolver.resolve_with_categories(&a1, &ids(&["Search"]));
    assert!(preview.is_empty());
    assert!(preview.awaiting_registry());

    assert_eq!(tab.resolver.store().get("a1"), Some(ids(&["calc"])));
}

#[tokio::test]
async fn test_save_in_one_tab_updates_watch_in_another() {
    let storage = MemoryStorage::new();
    let bus = TabBus::new();
    let registry = healthy_registry();
    let server = Arc::new(FakeServer::default());
    let settings = open_tab(&storage, &bus, &registry, server.clone()).await;
    let chat = open_tab(&storage, &bus, &registry, server).await;
    assert_eq!(bus.tab_count(), 2);

    let a1 = AssistantRecord::new("a1").with_allowed(["calc"]);
    let watch = CapabilityWatch::new(chat.resolver.clone(), &chat.broadcaster, a1);
    assert!(!watch.is_authorized("web_search"));
    let before = watch.version();

    settings
        .editor
        .save_capabilities("a1", &ids(&["web_search"]))
        .await;

    assert!(watch.version() > before);
    assert!(watch.is_authorized("web_search"));
    assert!(!watch.is_authorized("calc"));
}

#[tokio::test]
async fn test_unrelated_entity_change_does_not_invalidate_watch() {
    let storage = MemoryStorage::new();
    let bus = TabBus::new();
    let tab = open_tab(
        &storage,
        &bus,
        &healthy_registry(),
        Arc::new(FakeServer::default()),
    )
    .await;

    let watch = CapabilityWatch::new(
        tab.resolver.clone(),
        &tab.broadcaster,
        AssistantRecord::new("a1").with_allowed(["calc"]),
    );
    let before = watch.version();
    tab.editor.save_capabilities("a2", &ids(&["web_search"])).await;
    assert_eq!(watch.version(), before);
    assert_eq!(watch.current().to_vec(), ids(&["calc"]));
}

#[tokio::test]
async fn test_corrupt_cache_entry_falls_back_to_server() {
    let storage = MemoryStorage::new();
    storage.insert_raw("assistant_tools_a1", "{not json");
    let bus = TabBus::new();
    let tab = open_tab(
        &storage,
        &bus,
        &healthy_registry(),
        Arc::new(FakeServer::default()),
    )
    .await;

    let a1 = AssistantRecord::new("a1").with_allowed(["calc"]);
    let resolved = tab.resolver.resolve(&a1);
    assert_eq!(resolved.to_vec(), ids(&["calc"]));
    assert_eq!(resolved.source(), ResolutionSource::Server);

    // the raw value is left for a later save to overwrite
    assert_eq!(
        storage.get_item("assistant_tools_a1").unwrap().as_deref(),
        Some("{not json")
    );
}

#[tokio::test]
async fn test_quota_exceeded_save_still_reaches_server() {
    let storage = MemoryStorage::with_quota(8);
    let bus = TabBus::new();
    let server = Arc::new(FakeServer::default());
    let tab = open_tab(&storage, &bus, &healthy_registry(), server.clone()).await;

    let outcome = tab
        .editor
        .save_capabilities("a1", &ids(&["calc", "web_search"]))
        .await;
    assert!(!outcome.cached);
    assert_eq!(tab.resolver.store().get("a1"), None);
    assert_eq!(server.saved.lock().unwrap().len(), 1);
}
