//! Shared types between frontend and backend
//!
//! These types are used by both:
//! - the capability registry / assistant REST API (native Rust)
//! - the assistant settings and chat composer (WASM)
//!
//! Serializable with serde for JSON over HTTP and for the cross-tab signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use ts_rs::TS;

// ============================================================================
// Capability Registry
// ============================================================================

/// Category label applied to registry records that arrive without one
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One record from the active-capabilities endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "capabilities.ts")]
pub struct CapabilityRecord {
    /// Stable tool name, used as the capability id
    pub name: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Optional human-facing label; falls back to `name`
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
}

/// Response body of `GET /api/tools/active`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "capabilities.ts")]
pub struct ActiveCapabilitiesResponse {
    pub tools: Vec<CapabilityRecord>,
    #[serde(default)]
    pub total: u64,
}

// ============================================================================
// Assistants
// ============================================================================

/// Normalized set of capability ids.
///
/// Assistant payloads have carried allowed tools as a list, as a `{id: true}`
/// map and as a map of tool objects. All of them collapse into one sorted set
/// here, so nothing downstream branches on the shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityIdSet(BTreeSet<String>);

impl CapabilityIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn into_inner(self) -> BTreeSet<String> {
        self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Normalize any JSON shape seen on the wire into a set of ids.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        let mut ids = BTreeSet::new();
        match value {
            Value::Null => {}
            Value::String(id) => {
                push_id(&mut ids, id);
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(id) => push_id(&mut ids, id),
                        Value::Object(obj) => {
                            if let Some(id) = obj
                                .get("id")
                                .or_else(|| obj.get("name"))
                                .and_then(Value::as_str)
                            {
                                push_id(&mut ids, id);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Value::Object(map) => {
                for (id, flag) in map {
                    let enabled = match flag {
                        Value::Null => false,
                        Value::Bool(enabled) => *enabled,
                        Value::Object(obj) => obj
                            .get("enabled")
                            .and_then(Value::as_bool)
                            .unwrap_or(true),
                        _ => true,
                    };
                    if enabled {
                        push_id(&mut ids, id);
                    }
                }
            }
            Value::Bool(_) | Value::Number(_) => {}
        }
        Self(ids)
    }
}

fn push_id(ids: &mut BTreeSet<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        ids.insert(trimmed.to_string());
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilityIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut ids = BTreeSet::new();
        for id in iter {
            push_id(&mut ids, &id.into());
        }
        Self(ids)
    }
}

impl Serialize for CapabilityIdSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilityIdSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

/// Read-only projection of an assistant as returned by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "capabilities.ts")]
pub struct AssistantRecord {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, alias = "allowed_tools", alias = "allowedTools")]
    #[ts(type = "string[]")]
    pub allowed_capabilities: CapabilityIdSet,
}

impl AssistantRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            allowed_capabilities: CapabilityIdSet::new(),
        }
    }

    pub fn with_allowed<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_capabilities = ids.into_iter().collect();
        self
    }
}

/// Body of `PATCH /api/assistants/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "capabilities.ts")]
pub struct UpdateAssistantCapabilities {
    pub allowed_capabilities: Vec<String>,
}

// ============================================================================
// Change Signal
// ============================================================================

/// In-page event name carrying a [`ChangeNotification`]
pub const EVENT_ASSISTANT_TOOLS_UPDATED: &str = "assistant-tools-updated";

/// Storage key used to fan a [`ChangeNotification`] out to other tabs
pub const CROSS_TAB_SIGNAL_KEY: &str = "assistant_tools_signal";

/// Ephemeral "an assistant's capability set changed" signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "capabilities.ts")]
pub struct ChangeNotification {
    pub entity_id: String,
    pub capability_ids: Vec<String>,

    /// Publisher id (one per tab), used to drop echoes
    #[serde(default)]
    pub origin: String,

    pub emitted_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(
        entity_id: impl Into<String>,
        capability_ids: Vec<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            capability_ids,
            origin: origin.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn concerns(&self, entity_id: &str) -> bool {
        self.entity_id == entity_id
    }
}
