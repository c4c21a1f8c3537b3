//! Category filters ("advanced filters" of the dashboards).
//!
//! A category with an empty selection means every value is accepted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::Problem;
use crate::storage::{KeyValueStore, StoreError, ZONE_FILTERS_KEY, ZONE_SEARCH_KEY};

/// One entry of the flat filter list handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterItem {
    pub category: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    selections: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_filter_list(items: &[FilterItem]) -> Self {
        let mut set = Self::new();
        for item in items {
            set.selections
                .entry(item.category.clone())
                .or_default()
                .insert(item.value.clone());
        }
        set
    }

    /// Adds the value if absent, removes it otherwise.
    pub fn toggle(&mut self, category: &str, value: &str) {
        let selected = self.selections.entry(category.to_string()).or_default();
        if !selected.remove(value) {
            selected.insert(value.to_string());
        }
        if selected.is_empty() {
            self.selections.remove(category);
        }
    }

    pub fn select_only(&mut self, category: &str, value: &str) {
        self.selections
            .insert(category.to_string(), BTreeSet::from([value.to_string()]));
    }

    pub fn clear_category(&mut self, category: &str) {
        self.selections.remove(category);
    }

    pub fn clear_all(&mut self) {
        self.selections.clear();
    }

    /// An untouched category counts every value as selected.
    pub fn is_selected(&self, category: &str, value: &str) -> bool {
        self.selections
            .get(category)
            .map_or(true, |selected| selected.contains(value))
    }

    pub fn is_active(&self) -> bool {
        !self.selections.is_empty()
    }

    pub fn to_filter_list(&self) -> Vec<FilterItem> {
        self.selections
            .iter()
            .flat_map(|(category, values)| {
                values.iter().map(move |value| FilterItem {
                    category: category.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        self.selections.iter().all(|(category, selected)| {
            item.filter_value(category)
                .is_some_and(|value| selected.contains(&value))
        })
    }

    pub fn apply<T: Filterable + Clone>(&self, items: &[T]) -> Vec<T> {
        items.iter().filter(|item| self.matches(*item)).cloned().collect()
    }
}

/// Exposes the values an item has for each filter category.
pub trait Filterable {
    fn filter_value(&self, category: &str) -> Option<String>;
}

impl Filterable for Problem {
    fn filter_value(&self, category: &str) -> Option<String> {
        match category {
            "zone" => Some(self.zone.clone()),
            "impact" => Some(self.impact.label().to_string()),
            "status" => Some(self.status.label().to_string()),
            "host" => Some(self.host.clone()),
            _ => None,
        }
    }
}

/// Management-zone filter selection and search box, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneFilterPrefs {
    pub filters: Vec<FilterItem>,
    pub search: String,
}

impl ZoneFilterPrefs {
    pub fn load(store: &KeyValueStore) -> Self {
        Self {
            filters: store.get(ZONE_FILTERS_KEY).unwrap_or_default(),
            search: store.get(ZONE_SEARCH_KEY).unwrap_or_default(),
        }
    }

    pub fn save(&self, store: &KeyValueStore) -> Result<(), StoreError> {
        store.set(ZONE_FILTERS_KEY, &self.filters)?;
        store.set(ZONE_SEARCH_KEY, &self.search)
    }

    pub fn toggle(&mut self, category: &str, value: &str) {
        self.edit(|set| set.toggle(category, value));
    }

    pub fn clear_category(&mut self, category: &str) {
        self.edit(|set| set.clear_category(category));
    }

    /// Drops every filter and the search text.
    pub fn clear_all(&mut self) {
        self.edit(FilterSet::clear_all);
        self.search.clear();
    }

    pub fn is_active(&self) -> bool {
        FilterSet::from_filter_list(&self.filters).is_active() || !self.search.trim().is_empty()
    }

    fn edit(&mut self, change: impl FnOnce(&mut FilterSet)) {
        let mut set = FilterSet::from_filter_list(&self.filters);
        change(&mut set);
        self.filters = set.to_filter_list();
    }

    /// Case-insensitive search on the zone name combined with the "zone" filter.
    pub fn matches_zone(&self, name: &str) -> bool {
        let set = FilterSet::from_filter_list(&self.filters);
        let search = self.search.trim().to_lowercase();
        set.is_selected("zone", name) && (search.is_empty() || name.to_lowercase().contains(&search))
    }
}
