use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::models::ChangeKind;

/// Counters for change events applied from the realtime channel
#[derive(Debug, Default, Clone)]
pub struct EventStats {
    /// Counts by table -> change kind -> count
    pub by_table_kind: HashMap<String, HashMap<ChangeKind, u64>>,
    /// Total count by table
    pub by_table_total: HashMap<String, u64>,
    /// Total events applied
    pub total: u64,
    /// Channel opens attempted, including failed ones
    pub channel_opens: u64,
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, table: &str, kind: ChangeKind) {
        self.total += 1;
        *self.by_table_total.entry(table.to_string()).or_insert(0) += 1;
        *self
            .by_table_kind
            .entry(table.to_string())
            .or_default()
            .entry(kind)
            .or_insert(0) += 1;
    }

    pub fn count(&self, table: &str, kind: ChangeKind) -> u64 {
        self.by_table_kind
            .get(table)
            .and_then(|kinds| kinds.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    /// Tables sorted by total count (descending)
    pub fn tables_by_count(&self) -> Vec<(String, u64)> {
        let mut tables: Vec<_> = self
            .by_table_total
            .iter()
            .map(|(t, &c)| (t.clone(), c))
            .collect();
        tables.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tables
    }
}

/// Shared handle to event stats for the single-threaded runtime
#[derive(Debug, Clone, Default)]
pub struct SharedEventStats {
    inner: Rc<RefCell<EventStats>>,
}

impl SharedEventStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, table: &str, kind: ChangeKind) {
        self.inner.borrow_mut().record(table, kind);
    }

    pub fn record_channel_open(&self) {
        self.inner.borrow_mut().channel_opens += 1;
    }

    pub fn snapshot(&self) -> EventStats {
        self.inner.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_table_and_kind() {
        let stats = SharedEventStats::new();
        stats.record("plans", ChangeKind::Insert);
        stats.record("plans", ChangeKind::Update);
        stats.record("plans", ChangeKind::Update);
        stats.record("plan_dependencies", ChangeKind::Delete);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.count("plans", ChangeKind::Update), 2);
        assert_eq!(snapshot.count("plans", ChangeKind::Delete), 0);
        assert_eq!(
            snapshot.tables_by_count(),
            vec![("plans".to_string(), 3), ("plan_dependencies".to_string(), 1)]
        );
    }
}
