use chrono::{DateTime, Utc};
use shared_types::{CapabilityRecord, UNCATEGORIZED};
use std::collections::HashSet;

use crate::error::RegistryUnavailable;

/// One invocable tool an assistant may be authorized to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub description: Option<String>,
}

impl Capability {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            category: category.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn from_record(record: CapabilityRecord) -> Result<Self, RegistryUnavailable> {
        let id = record.name.trim().to_string();
        if id.is_empty() {
            return Err(RegistryUnavailable::malformed(
                "capability record with empty name",
            ));
        }
        let category = match record.category.trim() {
            "" => UNCATEGORIZED.to_string(),
            category => category.to_string(),
        };
        let display_name = record
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        Ok(Self {
            id,
            display_name,
            category,
            description: record.description,
        })
    }
}

/// The full registry as fetched at one point in time. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    capabilities: Vec<Capability>,
    categories: Vec<String>,
    total: u64,
    fetched_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    /// Build a snapshot; later duplicates of an id are dropped.
    pub fn new(capabilities: Vec<Capability>) -> Self {
        let mut seen = HashSet::new();
        let capabilities: Vec<Capability> = capabilities
            .into_iter()
            .filter(|capability| seen.insert(capability.id.clone()))
            .collect();

        let mut categories: Vec<String> = Vec::new();
        for capability in &capabilities {
            if !categories.iter().any(|c| c == &capability.category) {
                categories.push(capability.category.clone());
            }
        }

        Self {
            total: capabilities.len() as u64,
            capabilities,
            categories,
            fetched_at: Utc::now(),
        }
    }

    /// Validate registry records. Any invalid record rejects the whole batch.
    pub fn from_records(
        records: Vec<CapabilityRecord>,
        reported_total: u64,
    ) -> Result<Self, RegistryUnavailable> {
        let capabilities = records
            .into_iter()
            .map(Capability::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let mut snapshot = Self::new(capabilities);
        if reported_total > 0 {
            snapshot.total = reported_total;
        }
        Ok(snapshot)
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Unique categories in first-seen order
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.id == id)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Capability> {
        self.capabilities
            .iter()
            .filter(move |c| c.category == category)
    }

    /// Count reported by the registry (falls back to the number of records)
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, category: &str) -> CapabilityRecord {
        CapabilityRecord {
            name: name.to_string(),
            category: category.to_string(),
            description: None,
            display_name: None,
        }
    }

    #[test]
    fn test_categories_unique_in_first_seen_order() {
        let snapshot = CapabilitySnapshot::from_records(
            vec![
                record("web_search", "Search"),
                record("calc", "Math"),
                record("news", "Search"),
                record("read_file", "Files"),
            ],
            4,
        )
        .unwrap();
        assert_eq!(snapshot.categories(), ["Search", "Math", "Files"]);
        assert_eq!(snapshot.in_category("Search").count(), 2);
    }

    #[test]
    fn test_blank_name_rejects_whole_batch() {
        let err = CapabilitySnapshot::from_records(
            vec![record("calc", "Math"), record("  ", "Math")],
            2,
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::error::RegistryFailureKind::Malformed);
    }

    #[test]
    fn test_blank_category_and_display_name_defaults() {
        let mut raw = record("calc", "");
        raw.display_name = Some("Calculator".to_string());
        let snapshot =
            CapabilitySnapshot::from_records(vec![raw, record("misc", "   ")], 0).unwrap();
        let calc = snapshot.get("calc").unwrap();
        assert_eq!(calc.category, UNCATEGORIZED);
        assert_eq!(calc.display_name, "Calculator");
        assert_eq!(snapshot.get("misc").unwrap().display_name, "misc");
        assert_eq!(snapshot.total(), 2);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let snapshot = CapabilitySnapshot::new(vec![
            Capability::new("calc", "Math"),
            Capability::new("calc", "Other"),
        ]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.categories(), ["Math"]);
    }
}
