use std::collections::HashMap;

/// Composite cache key: which query (`resource`), which slice of the
/// workspace it covers (`scope`, usually a period token), and the
/// remaining call parameters flattened to a stable string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: &'static str,
    pub scope: String,
    pub params: String,
}

impl CacheKey {
    pub fn new(resource: &'static str, scope: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            resource,
            scope: scope.into(),
            params: params.into(),
        }
    }
}

/// In-memory cache for derived query results. Invalidation is by typed
/// key components, never by reconstructing key strings.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<CacheKey, serde_json::Value>,
}

impl QueryCache {
    pub fn get(&self, key: &CacheKey) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: CacheKey, value: serde_json::Value) {
        self.entries.insert(key, value);
    }

    /// Drop every entry of `resource` within `scope`, regardless of params.
    pub fn invalidate_scope(&mut self, resource: &str, scope: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !(k.resource == resource && k.scope == scope));
        before - self.entries.len()
    }

    /// Drop every entry of `resource` across all scopes.
    #[allow(dead_code)]
    pub fn invalidate_resource(&mut self, resource: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.resource != resource);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_put_round_trip() {
        let mut cache = QueryCache::default();
        let key = CacheKey::new("stats.periodSummary", "2025-Q2", "");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), json!({ "questCount": 3 }));
        assert_eq!(cache.get(&key), Some(&json!({ "questCount": 3 })));
    }

    #[test]
    fn invalidate_scope_spares_other_scopes_and_resources() {
        let mut cache = QueryCache::default();
        cache.put(CacheKey::new("stats.periodSummary", "2025-Q1", ""), json!(1));
        cache.put(
            CacheKey::new("stats.periodSummary", "2025-Q1", "includeArchived"),
            json!(2),
        );
        cache.put(CacheKey::new("stats.periodSummary", "2025-Q2", ""), json!(3));
        cache.put(CacheKey::new("quests.list", "2025-Q1", ""), json!(4));

        assert_eq!(cache.invalidate_scope("stats.periodSummary", "2025-Q1"), 2);
        assert!(cache
            .get(&CacheKey::new("stats.periodSummary", "2025-Q2", ""))
            .is_some());
        assert!(cache.get(&CacheKey::new("quests.list", "2025-Q1", "")).is_some());
    }

    #[test]
    fn invalidate_resource_crosses_scopes() {
        let mut cache = QueryCache::default();
        cache.put(CacheKey::new("stats.periodSummary", "2025-Q1", ""), json!(1));
        cache.put(CacheKey::new("stats.periodSummary", "2026-Q4", ""), json!(2));
        cache.put(CacheKey::new("quests.list", "2025-Q1", ""), json!(3));

        assert_eq!(cache.invalidate_resource("stats.periodSummary"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = QueryCache::default();
        cache.put(CacheKey::new("stats.periodSummary", "2025-Q1", ""), json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
