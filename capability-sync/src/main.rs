//! `capability-sync <assistant-id>`: print the effective capability set of
//! one assistant as this machine would resolve it.

#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;
    use capability_sync::{
        categories, CapabilityRegistryClient, CapabilitySetResolver, EntityBackend, FileStorage,
        HttpEntityBackend, OverrideStore, SnapshotSlot, SyncConfig,
    };
    use tracing::info;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "capability_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let assistant_id = std::env::args()
        .nth(1)
        .context("usage: capability-sync <assistant-id>")?;

    let config = SyncConfig::from_env()?;
    info!(api_base = %config.api_base, assistant_id = %assistant_id, "capability-sync starting");

    let storage = FileStorage::open(&config.storage_dir).with_context(|| {
        format!(
            "failed to open override cache at {}",
            config.storage_dir.display()
        )
    })?;
    let store = OverrideStore::with_keys(Arc::new(storage), config.keys.clone());

    let slot = Arc::new(SnapshotSlot::new());
    let registry = CapabilityRegistryClient::new(&config);
    if let Err(e) = slot.refresh(&registry).await {
        eprintln!("{}", e.user_message());
    }

    let backend = HttpEntityBackend::new(&config);
    let entity = backend
        .fetch_entity(&assistant_id)
        .await
        .with_context(|| format!("failed to load assistant {assistant_id}"))?;

    let resolver = CapabilitySetResolver::new(store, slot.clone(), &config);
    let effective = resolver.resolve(&entity);

    if let Some(snapshot) = slot.snapshot() {
        println!("Registry: {} capabilities", snapshot.len());
        for group in categories::group_by_category(&snapshot) {
            let ids: Vec<&str> = group.capabilities.iter().map(|c| c.id.as_str()).collect();
            println!("  {}: {}", group.category, ids.join(", "));
        }
    }

    println!(
        "Assistant {} ({}): {} capabilities from {}",
        entity.id,
        entity.name.as_deref().unwrap_or("unnamed"),
        effective.len(),
        effective.source().as_str()
    );
    if effective.awaiting_registry() {
        println!("  (category selection pending registry load)");
    }
    if effective.environment_granted() {
        println!("  (environment grants enabled)");
    }
    for id in effective.ids() {
        println!("  - {id}");
    }

    Ok(())
}
