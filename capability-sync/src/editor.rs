//! Optimistic capability editing.
//!
//! A save writes the override cache first, announces the change, and only
//! then talks to the server. The local override stays in place whatever the
//! server says, so every open view reflects the edit immediately. Because
//! the cache write and the publish happen synchronously, any subscriber that
//! re-resolves during the publish already sees the new value.

use shared_types::AssistantRecord;
use std::sync::Arc;

use crate::broadcast::ChangeBroadcaster;
use crate::categories;
use crate::entity::EntityBackend;
use crate::error::EntityError;
use crate::resolver::CapabilitySetResolver;

/// What happened to the server half of an edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSync {
    Saved,
    Failed(EntityError),
    /// Nothing was sent (e.g. category expansion needs a registry snapshot)
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Ids that were cached, announced and sent
    pub capability_ids: Vec<String>,
    /// Whether the optimistic override reached storage
    pub cached: bool,
    pub server: ServerSync,
}

pub struct CapabilityEditor {
    resolver: Arc<CapabilitySetResolver>,
    broadcaster: ChangeBroadcaster,
    backend: Arc<dyn EntityBackend>,
}

impl CapabilityEditor {
    pub fn new(
        resolver: Arc<CapabilitySetResolver>,
        broadcaster: ChangeBroadcaster,
        backend: Arc<dyn EntityBackend>,
    ) -> Self {
        Self {
            resolver,
            broadcaster,
            backend,
        }
    }

    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    /// Save an explicit tool list. Leaves category mode for this assistant.
    pub async fn save_capabilities(&self, entity_id: &str, capability_ids: &[String]) -> SaveOutcome {
        let ids = dedupe(capability_ids);
        let store = self.resolver.store();

        let cached = store.set(entity_id, &ids);
        store.clear_categories(entity_id);
        if cached {
            self.broadcaster.publish(entity_id, &ids);
        }

        let server = self.push(entity_id, &ids).await;
        if !cached && server == ServerSync::Saved {
            // No optimistic copy to announce earlier; tell listeners now.
            self.broadcaster.publish(entity_id, &ids);
        }

        SaveOutcome {
            capability_ids: ids,
            cached,
            server,
        }
    }

    /// Switch the assistant to category mode with `selected` categories.
    pub async fn select_categories(&self, entity_id: &str, selected: &[String]) -> SaveOutcome {
        let selection = dedupe(selected);
        let cached = self.resolver.store().set_categories(entity_id, &selection);

        let Some(snapshot) = self.resolver.registry().snapshot() else {
            tracing::info!(
                entity_id = %entity_id,
                "Category selection saved before registry loaded; server update deferred"
            );
            return SaveOutcome {
                capability_ids: Vec::new(),
                cached,
                server: ServerSync::Skipped,
            };
        };

        let ids = categories::expand(&snapshot, &selection);
        if cached {
            self.broadcaster.publish(entity_id, &ids);
        }
        let server = self.push(entity_id, &ids).await;
        if !cached && server == ServerSync::Saved {
            self.broadcaster.publish(entity_id, &ids);
        }

        SaveOutcome {
            capability_ids: ids,
            cached,
            server,
        }
    }

    /// Flip the environment grant for `entity` and announce the new effective set.
    pub fn set_environment_toggle(&self, entity: &AssistantRecord, enabled: bool) -> bool {
        let persisted = self
            .resolver
            .store()
            .set_environment_toggle(&entity.id, enabled);
        if persisted {
            let resolved = self.resolver.resolve(entity);
            self.broadcaster.publish(&entity.id, &resolved.to_vec());
        }
        persisted
    }

    /// Convert a flat override saved by older builds into a category selection.
    ///
    /// Returns the inferred categories, or `None` when there is nothing to
    /// migrate (selection already present, no override, or no snapshot yet).
    pub fn migrate_legacy_override(&self, entity_id: &str) -> Option<Vec<String>> {
        let store = self.resolver.store();
        if store.categories(entity_id).is_some() {
            return None;
        }
        let legacy = store.get(entity_id)?;
        let snapshot = self.resolver.registry().snapshot()?;

        let inferred = categories::infer_categories(&snapshot, &legacy);
        if inferred.is_empty() || !store.set_categories(entity_id, &inferred) {
            return None;
        }

        tracing::info!(
            entity_id = %entity_id,
            categories = ?inferred,
            "Migrated legacy capability override to category selection"
        );
        let ids = categories::expand(&snapshot, &inferred);
        self.broadcaster.publish(entity_id, &ids);
        Some(inferred)
    }

    async fn push(&self, entity_id: &str, ids: &[String]) -> ServerSync {
        match self.backend.update_allowed_capabilities(entity_id, ids).await {
            Ok(()) => ServerSync::Saved,
            Err(e) => {
                tracing::warn!(
                    entity_id = %entity_id,
                    error = %e,
                    "Failed to persist assistant capabilities; keeping local override"
                );
                ServerSync::Failed(e)
            }
        }
    }
}

fn dedupe(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !out.iter().any(|v| v == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}
