use std::collections::HashMap;

use crate::models::{Row, RowId};

/// In-memory copy of one remote table.
///
/// Rows keep the order in which they were first seen; lookups by id go
/// through `index`. Every mutation is an upsert or a delete keyed by id, which
/// makes re-applying the same remote event harmless.
#[derive(Debug, Default)]
pub struct TableCache {
    table: String,
    rows: Vec<Row>,
    index: HashMap<RowId, usize>,
    /// Set once a bulk fetch has been started; rolled back if it fails
    fetched: bool,
}

impl TableCache {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &RowId) -> Option<&Row> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.index.contains_key(id)
    }

    /// Replace the whole collection with a fresh fetch result.
    pub fn replace_all(&mut self, rows: Vec<Row>) {
        self.rows.clear();
        self.index.clear();
        for row in rows {
            self.upsert(row);
        }
    }

    /// Replace the row with the same id in place, or append it.
    /// Returns `false` when the row carries no id and was ignored.
    pub fn upsert(&mut self, row: Row) -> bool {
        let Some(id) = row.id() else {
            tracing::warn!("{}: ignoring row without id", self.table);
            return false;
        };
        match self.index.get(&id) {
            Some(&i) => self.rows[i] = row,
            None => {
                self.index.insert(id, self.rows.len());
                self.rows.push(row);
            }
        }
        true
    }

    /// Remove the row with this id, if present.
    pub fn delete_by_id(&mut self, id: &RowId) -> Option<Row> {
        let i = self.index.remove(id)?;
        let removed = self.rows.remove(i);
        for row in &self.rows[i..] {
            if let Some(shifted) = row.id() {
                if let Some(pos) = self.index.get_mut(&shifted) {
                    *pos -= 1;
                }
            }
        }
        Some(removed)
    }

    pub fn has_fetched(&self) -> bool {
        self.fetched
    }

    /// Flag the table as fetched and return the previous value so a failed
    /// fetch can restore it.
    pub fn mark_fetched(&mut self) -> bool {
        std::mem::replace(&mut self.fetched, true)
    }

    pub fn restore_fetched(&mut self, previous: bool) {
        self.fetched = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        Row::from_value(value).unwrap()
    }

    #[test]
    fn test_upsert_appends_then_replaces() {
        let mut cache = TableCache::new("plans");
        assert!(cache.upsert(row(json!({"id": 1, "title": "a"}))));
        assert!(cache.upsert(row(json!({"id": 2, "title": "b"}))));
        assert!(cache.upsert(row(json!({"id": 1, "title": "a2"}))));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.rows()[0].get("title"), Some(&json!("a2")));
        assert_eq!(cache.rows()[1].get("title"), Some(&json!("b")));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut once = TableCache::new("plans");
        let mut twice = TableCache::new("plans");
        let r = row(json!({"id": 5, "done": true}));

        once.upsert(r.clone());
        twice.upsert(r.clone());
        twice.upsert(r);

        assert_eq!(once.rows(), twice.rows());
    }

    #[test]
    fn test_upsert_ignores_rows_without_id() {
        let mut cache = TableCache::new("plans");
        assert!(!cache.upsert(row(json!({"title": "no id"}))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_keeps_index_consistent() {
        let mut cache = TableCache::new("plans");
        for id in 1..=4 {
            cache.upsert(row(json!({"id": id})));
        }

        assert!(cache.delete_by_id(&RowId::from(2)).is_some());
        assert!(cache.delete_by_id(&RowId::from(2)).is_none());

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&RowId::from(2)));
        assert_eq!(cache.get(&RowId::from(3)).and_then(Row::id), Some(RowId::from(3)));
        assert_eq!(cache.get(&RowId::from(4)).and_then(Row::id), Some(RowId::from(4)));

        cache.upsert(row(json!({"id": 4, "title": "moved"})));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.rows()[2].get("title"), Some(&json!("moved")));
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let mut cache = TableCache::new("plans");
        cache.upsert(row(json!({"id": 1})));
        assert!(cache.delete_by_id(&RowId::from(99)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_all_overwrites() {
        let mut cache = TableCache::new("plans");
        cache.upsert(row(json!({"id": 1})));
        cache.replace_all(vec![row(json!({"id": 2})), row(json!({"id": 3}))]);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&RowId::from(1)));
    }

    #[test]
    fn test_fetched_flag_roll_back() {
        let mut cache = TableCache::new("plans");
        let previous = cache.mark_fetched();
        assert!(!previous);
        assert!(cache.has_fetched());
        cache.restore_fetched(previous);
        assert!(!cache.has_fetched());
    }

    #[test]
    fn test_last_event_wins_per_id() {
        let mut cache = TableCache::new("plans");
        cache.upsert(row(json!({"id": 1, "priority": 1})));
        cache.upsert(row(json!({"id": 2, "priority": 10})));
        cache.upsert(row(json!({"id": 1, "priority": 2})));
        cache.upsert(row(json!({"id": 2, "priority": 20})));
        cache.upsert(row(json!({"id": 1, "priority": 3})));

        assert_eq!(
            cache.get(&RowId::from(1)).and_then(|r| r.get("priority")),
            Some(&json!(3))
        );
        assert_eq!(
            cache.get(&RowId::from(2)).and_then(|r| r.get("priority")),
            Some(&json!(20))
        );
    }
}
