//! Category grouping and category-level selection.
//!
//! Everything here is a pure function of a [`CapabilitySnapshot`] and the
//! caller's selection: no I/O, inputs are never mutated, and categories are
//! always expanded against the snapshot passed in, so a saved category picks
//! up tools added to it later.

use std::collections::BTreeSet;

use crate::snapshot::{Capability, CapabilitySnapshot};

/// Ids of every capability whose category is selected, in snapshot order.
///
/// A selected category missing from the snapshot contributes nothing.
pub fn expand<S: AsRef<str>>(snapshot: &CapabilitySnapshot, selected: &[S]) -> Vec<String> {
    if selected.is_empty() {
        return Vec::new();
    }

    let wanted: BTreeSet<&str> = selected.iter().map(AsRef::as_ref).collect();
    for category in &wanted {
        if !snapshot.has_category(category) {
            tracing::debug!(category = %category, "Selected category no longer in registry");
        }
    }

    snapshot
        .capabilities()
        .iter()
        .filter(|c| wanted.contains(c.category.as_str()))
        .map(|c| c.id.clone())
        .collect()
}

/// Categories implied (fully or partially) by a flat id list.
///
/// Result follows snapshot category order, so the input order never matters.
/// Ids the snapshot does not know are ignored.
pub fn infer_categories<S: AsRef<str>>(snapshot: &CapabilitySnapshot, ids: &[S]) -> Vec<String> {
    category_coverage(snapshot, ids)
        .into_iter()
        .map(|coverage| coverage.category)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCoverage {
    pub category: String,
    pub selected: usize,
    pub total: usize,
}

impl CategoryCoverage {
    pub fn is_full(&self) -> bool {
        self.selected == self.total
    }
}

/// How much of each category a flat id list covers. Untouched categories are omitted.
pub fn category_coverage<S: AsRef<str>>(
    snapshot: &CapabilitySnapshot,
    ids: &[S],
) -> Vec<CategoryCoverage> {
    let chosen: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();

    snapshot
        .categories()
        .iter()
        .filter_map(|category| {
            let mut total = 0;
            let mut selected = 0;
            for capability in snapshot.in_category(category) {
                total += 1;
                if chosen.contains(capability.id.as_str()) {
                    selected += 1;
                }
            }
            (selected > 0).then(|| CategoryCoverage {
                category: category.clone(),
                selected,
                total,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup<'a> {
    pub category: &'a str,
    pub capabilities: Vec<&'a Capability>,
}

pub fn group_by_category(snapshot: &CapabilitySnapshot) -> Vec<CategoryGroup<'_>> {
    snapshot
        .categories()
        .iter()
        .map(|category| CategoryGroup {
            category: category.as_str(),
            capabilities: snapshot.in_category(category).collect(),
        })
        .collect()
}

/// Add `category` to the selection, or remove it if already present.
pub fn toggle_category<S: AsRef<str>>(selection: &[S], category: &str) -> Vec<String> {
    let present = selection.iter().any(|c| c.as_ref() == category);
    let mut next: Vec<String> = selection
        .iter()
        .map(|c| c.as_ref().to_string())
        .filter(|c| c != category)
        .collect();
    if !present {
        next.push(category.to_string());
    }
    next
}

/// Categories in `selected` that the snapshot no longer has
pub fn stale_categories<S: AsRef<str>>(snapshot: &CapabilitySnapshot, selected: &[S]) -> Vec<String> {
    selected
        .iter()
        .map(AsRef::as_ref)
        .filter(|category| !snapshot.has_category(category))
        .map(ToString::to_string)
        .collect()
}

/// Search box + category dropdown used by the tool picker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFilter {
    pub query: String,
    pub category: Option<String>,
}

impl CapabilityFilter {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: None,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Case-insensitive match on id, display name and description.
    pub fn matches(&self, capability: &Capability) -> bool {
        if let Some(category) = &self.category {
            if &capability.category != category {
                return false;
            }
        }

        let needle = self.query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        capability.id.to_lowercase().contains(&needle)
            || capability.display_name.to_lowercase().contains(&needle)
            || capability
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
    }
}

/// "Select all" for the current filter: `current` plus every matching id.
pub fn select_matching<S: AsRef<str>>(
    snapshot: &CapabilitySnapshot,
    filter: &CapabilityFilter,
    current: &[S],
) -> Vec<String> {
    let mut selected: Vec<String> = current.iter().map(|id| id.as_ref().to_string()).collect();
    for capability in snapshot.capabilities() {
        if filter.matches(capability) && !selected.contains(&capability.id) {
            selected.push(capability.id.clone());
        }
    }
    selected
}

/// "Deselect all" for the current filter: `current` minus every matching id.
pub fn deselect_matching<S: AsRef<str>>(
    snapshot: &CapabilitySnapshot,
    filter: &CapabilityFilter,
    current: &[S],
) -> Vec<String> {
    current
        .iter()
        .map(AsRef::as_ref)
        .filter(|id| {
            snapshot
                .get(id)
                .map_or(true, |capability| !filter.matches(capability))
        })
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CapabilitySnapshot {
        CapabilitySnapshot::new(vec![
            Capability::new("web_search", "Search").with_description("Search the web"),
            Capability::new("calc", "Math"),
            Capability::new("news_search", "Search"),
            Capability::new("read_file", "Files").with_description("Read a workspace file"),
            Capability::new("edit_file", "Files"),
        ])
    }

    #[test]
    fn test_expand_unions_selected_categories() {
        let ids = expand(&snapshot(), &["Files", "Search"]);
        assert_eq!(ids, vec!["web_search", "news_search", "read_file", "edit_file"]);
    }

    #[test]
    fn test_empty_inputs_give_empty_outputs() {
        let empty: [&str; 0] = [];
        assert!(expand(&snapshot(), &empty).is_empty());
        assert!(infer_categories(&snapshot(), &empty).is_empty());
    }

    #[test]
    fn test_stale_category_contributes_nothing() {
        let snap = snapshot();
        assert_eq!(expand(&snap, &["Retired", "Math"]), vec!["calc"]);
        assert_eq!(stale_categories(&snap, &["Retired", "Math"]), vec!["Retired"]);
    }

    #[test]
    fn test_expand_is_a_function_of_snapshot_and_categories() {
        let snap = snapshot();
        let once = expand(&snap, &["Search"]);
        let inferred = infer_categories(&snap, &once);
        let twice = expand(&snap, &inferred);
        let thrice = expand(&snap, &infer_categories(&snap, &twice));
        assert_eq!(once, twice);
        assert_eq!(twice, thrice);
    }

    #[test]
    fn test_infer_ignores_unknown_ids_and_order() {
        let snap = snapshot();
        let a = infer_categories(&snap, &["read_file", "ghost_tool", "calc"]);
        let b = infer_categories(&snap, &["calc", "read_file"]);
        assert_eq!(a, vec!["Math", "Files"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_coverage_distinguishes_full_and_partial() {
        let coverage = category_coverage(&snapshot(), &["read_file", "calc"]);
        assert_eq!(coverage.len(), 2);
        assert_eq!(coverage[0].category, "Math");
        assert!(coverage[0].is_full());
        assert_eq!(coverage[1].category, "Files");
        assert!(!coverage[1].is_full());
    }

    #[test]
    fn test_group_by_category() {
        let snap = snapshot();
        let groups = group_by_category(&snap);
        let names: Vec<_> = groups.iter().map(|g| g.category).collect();
        assert_eq!(names, vec!["Search", "Math", "Files"]);
        assert_eq!(groups[2].capabilities.len(), 2);
    }

    #[test]
    fn test_toggle_category() {
        let on = toggle_category(&["Math"], "Search");
        assert_eq!(on, vec!["Math", "Search"]);
        let off = toggle_category(&on, "Math");
        assert_eq!(off, vec!["Search"]);
    }

    #[test]
    fn test_select_and_deselect_matching_filter() {
        let snap = snapshot();
        let filter = CapabilityFilter::query("FILE");
        let selected = select_matching(&snap, &filter, &["calc", "edit_file"]);
        assert_eq!(selected, vec!["calc", "edit_file", "read_file"]);

        let remaining = deselect_matching(&snap, &filter, &selected);
        assert_eq!(remaining, vec!["calc"]);
    }

    #[test]
    fn test_filter_by_category_and_description() {
        let snap = snapshot();
        let filter = CapabilityFilter::query("web").in_category("Search");
        let ids: Vec<_> = snap
            .capabilities()
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["web_search"]);

        let by_description = CapabilityFilter::query("workspace");
        assert!(by_description.matches(snap.get("read_file").unwrap()));
    }

    #[test]
    fn test_deselect_keeps_ids_unknown_to_snapshot() {
        let snap = snapshot();
        let filter = CapabilityFilter::default();
        let remaining = deselect_matching(&snap, &filter, &["legacy_tool", "calc"]);
        assert_eq!(remaining, vec!["legacy_tool"]);
    }
}
