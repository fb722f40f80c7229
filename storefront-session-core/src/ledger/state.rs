use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

/// How many categories [`BehaviorState::top_categories`] returns.
pub const RECOMMENDATION_COUNT: usize = 5;

/// How many searches [`BehaviorState::recent_searches`] returns.
pub const SUGGESTION_COUNT: usize = 5;

/// Per-category view counts, kept in first-seen order.
///
/// Stored as a JSON object. Order matters for ranking ties, so it is kept in
/// a vector rather than a hash map and written back in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCounts(Vec<(String, u32)>);

impl CategoryCounts {
    /// Adds one view of `category`, appending it if unseen.
    pub fn increment(&mut self, category: &str) {
        if let Some((_, count)) = self.0.iter_mut().find(|(name, _)| name.as_str() == category) {
            *count = count.saturating_add(1);
        } else {
            self.0.push((category.to_string(), 1));
        }
    }

    /// The count for `category`, zero if unseen.
    #[must_use]
    pub fn get(&self, category: &str) -> u32 {
        self.0
            .iter()
            .find(|(name, _)| name.as_str() == category)
            .map_or(0, |(_, count)| *count)
    }

    /// Categories and counts in first-seen order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(name, count)| (name.as_str(), *count))
    }

    /// Number of distinct categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no category was seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, u32)> for CategoryCounts {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        let mut counts = Self::default();
        for (name, count) in iter {
            let name = name.as_ref();
            if let Some((_, existing)) = counts.0.iter_mut().find(|(seen, _)| seen.as_str() == name) {
                *existing = existing.saturating_add(count);
            } else {
                counts.0.push((name.to_string(), count));
            }
        }
        counts
    }
}

impl Serialize for CategoryCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, count) in &self.0 {
            map.serialize_entry(name, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CategoryCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = CategoryCounts;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of category to view count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, count)) = access.next_entry::<String, u32>()? {
                    entries.push((name, count));
                }
                Ok(entries.into_iter().collect())
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

/// The persisted behavior ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorState {
    /// Viewed product ids, most recent first, unique.
    pub viewed_products: Vec<String>,
    /// Search queries, most recent first, unique.
    pub search_history: Vec<String>,
    /// Category view counts.
    pub category_preferences: CategoryCounts,
    /// Last category the user browsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visited_category: Option<String>,
}

/// A stored ledger where every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StoredBehavior {
    viewed_products: Option<Vec<String>>,
    search_history: Option<Vec<String>>,
    category_preferences: Option<CategoryCounts>,
    last_visited_category: Option<String>,
}

impl StoredBehavior {
    /// Overrides every key of `state` this document defines.
    pub(super) fn merge_into(self, state: &mut BehaviorState) {
        if let Some(viewed) = self.viewed_products {
            state.viewed_products = viewed;
        }
        if let Some(searches) = self.search_history {
            state.search_history = searches;
        }
        if let Some(categories) = self.category_preferences {
            state.category_preferences = categories;
        }
        if let Some(category) = self.last_visited_category {
            state.last_visited_category = Some(category);
        }
    }
}

/// A ledger mutation, kept so early writes can be replayed after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BehaviorEvent {
    ProductView {
        id: String,
        category: Option<String>,
    },
    Search(String),
    CategoryVisit(String),
}

/// List caps.
#[derive(Debug, Clone, Copy)]
pub(super) struct Caps {
    pub viewed: usize,
    pub searches: usize,
}

impl BehaviorState {
    pub(super) fn apply(&mut self, event: &BehaviorEvent, caps: Caps) {
        match event {
            BehaviorEvent::ProductView { id, category } => {
                move_to_front(&mut self.viewed_products, id, caps.viewed);
                if let Some(category) = category {
                    self.category_preferences.increment(category);
                }
            }
            BehaviorEvent::Search(query) => {
                move_to_front(&mut self.search_history, query, caps.searches);
            }
            BehaviorEvent::CategoryVisit(category) => {
                self.category_preferences.increment(category);
                self.last_visited_category = Some(category.clone());
            }
        }
    }

    /// Drops entries beyond the caps, e.g. after loading a ledger written with larger caps.
    pub(super) fn enforce_caps(&mut self, caps: Caps) {
        dedup_in_order(&mut self.viewed_products);
        dedup_in_order(&mut self.search_history);
        self.viewed_products.truncate(caps.viewed);
        self.search_history.truncate(caps.searches);
    }

    /// Categories by descending count; ties keep first-seen order.
    #[must_use]
    pub fn top_categories(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<(&str, u32)> = self.category_preferences.entries().collect();
        // Stable, so equal counts stay in first-seen order.
        ranked.sort_by_key(|(_, count)| Reverse(*count));
        ranked
            .into_iter()
            .take(limit)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// The most recent searches.
    #[must_use]
    pub fn recent_searches(&self, limit: usize) -> Vec<String> {
        self.search_history.iter().take(limit).cloned().collect()
    }
}

fn move_to_front(list: &mut Vec<String>, value: &str, cap: usize) {
    list.retain(|existing| existing != value);
    list.insert(0, value.to_string());
    list.truncate(cap);
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = HashSet::new();
    list.retain(|value| seen.insert(value.clone()));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CAPS: Caps = Caps {
        viewed: 50,
        searches: 20,
    };

    #[test]
    fn test_ranking_by_count() {
        let state = BehaviorState {
            category_preferences: [("A", 3), ("B", 5), ("C", 1)].into_iter().collect(),
            ..BehaviorState::default()
        };
        assert_eq!(state.top_categories(RECOMMENDATION_COUNT), ["B", "A", "C"]);
    }

    #[test]
    fn test_ranking_ties_keep_first_seen_order() {
        let state = BehaviorState {
            category_preferences: [
                ("shoes", 2),
                ("bags", 4),
                ("hats", 2),
                ("belts", 2),
                ("socks", 2),
                ("scarves", 2),
                ("gloves", 1),
            ]
            .into_iter()
            .collect(),
            ..BehaviorState::default()
        };
        assert_eq!(
            state.top_categories(RECOMMENDATION_COUNT),
            ["bags", "shoes", "hats", "belts", "socks"]
        );
    }

    #[test]
    fn test_counts_keep_json_order() {
        let raw = r#"{"zeta": 1, "alpha": 1, "mid": 1}"#;
        let counts: CategoryCounts = serde_json::from_str(raw).unwrap();
        let names: Vec<&str> = counts.entries().map(|(name, _)| name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(
            serde_json::to_string(&counts).unwrap(),
            r#"{"zeta":1,"alpha":1,"mid":1}"#
        );
    }

    #[test]
    fn test_stored_keys_override_defaults() {
        let mut state = BehaviorState::default();
        let stored: StoredBehavior = serde_json::from_value(json!({
            "searchHistory": ["boots"],
            "lastVisitedCategory": "shoes"
        }))
        .unwrap();
        stored.merge_into(&mut state);

        assert!(state.viewed_products.is_empty());
        assert_eq!(state.search_history, ["boots"]);
        assert_eq!(state.last_visited_category.as_deref(), Some("shoes"));
    }

    #[test]
    fn test_enforce_caps_trims_oversized_lists() {
        let mut state = BehaviorState {
            viewed_products: (0..60).map(|i| format!("p{i}")).collect(),
            search_history: vec!["a".into(), "b".into(), "a".into()],
            ..BehaviorState::default()
        };
        state.enforce_caps(CAPS);
        assert_eq!(state.viewed_products.len(), 50);
        assert_eq!(state.viewed_products[0], "p0");
        assert_eq!(state.search_history, ["a", "b"]);
    }

    #[test]
    fn test_product_view_counts_category() {
        let mut state = BehaviorState::default();
        state.apply(
            &BehaviorEvent::ProductView {
                id: "p1".into(),
                category: Some("shoes".into()),
            },
            CAPS,
        );
        state.apply(&BehaviorEvent::CategoryVisit("shoes".into()), CAPS);
        assert_eq!(state.category_preferences.get("shoes"), 2);
        assert_eq!(state.last_visited_category.as_deref(), Some("shoes"));
    }
}
