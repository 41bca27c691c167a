use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::table_cache::TableCache;
use crate::error::CoreError;
use crate::models::{ChangeEvent, ChangeKind, Row, RowId};
use crate::remote::RemoteStore;

/// Registry shared between the runtime, the subscription manager and table handles.
pub type SharedRegistry = Rc<RefCell<TableRegistry>>;

/// Every table cache of the process, keyed by table name.
///
/// Caches are created on first access, whether that access is a read, a fetch
/// or a pushed change for a table nobody has looked at yet.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableCache>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn table(&self, name: &str) -> Option<&TableCache> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> &mut TableCache {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableCache::new(name))
    }

    /// Rows of `name` in cache order, empty for unknown tables.
    pub fn rows(&self, name: &str) -> &[Row] {
        self.tables.get(name).map(TableCache::rows).unwrap_or(&[])
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply one pushed change. Returns the affected id, or `None` when the
    /// event carried no usable row and was dropped.
    pub fn apply_change(&mut self, event: &ChangeEvent) -> Option<RowId> {
        let cache = self.table_mut(&event.table);
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = event.new_row.as_ref()?;
                let id = row.id()?;
                cache.upsert(row.clone());
                Some(id)
            }
            ChangeKind::Delete => {
                let id = event.row_id()?;
                cache.delete_by_id(&id);
                Some(id)
            }
        }
    }
}

/// Access to one table: reads go to the cache, writes go to the remote store
/// first and land in the cache only once the server has accepted them.
#[derive(Clone)]
pub struct TableHandle {
    store: Rc<dyn RemoteStore>,
    registry: SharedRegistry,
    table: String,
}

impl TableHandle {
    pub fn new(store: Rc<dyn RemoteStore>, registry: SharedRegistry, table: impl Into<String>) -> Self {
        let table = table.into();
        registry.borrow_mut().table_mut(&table);
        Self {
            store,
            registry,
            table,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> Vec<Row> {
        self.registry.borrow().rows(&self.table).to_vec()
    }

    pub fn get(&self, id: &RowId) -> Option<Row> {
        self.registry
            .borrow()
            .table(&self.table)
            .and_then(|cache| cache.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().rows(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_fetched(&self) -> bool {
        self.registry
            .borrow()
            .table(&self.table)
            .is_some_and(TableCache::has_fetched)
    }

    /// Replace the cache with every row the remote store has.
    ///
    /// The fetched flag is raised before the request goes out so concurrent
    /// auto-fetch triggers see it, and rolled back if the request fails.
    pub async fn fetch_all(&self) -> Result<usize, CoreError> {
        let previous = self.registry.borrow_mut().table_mut(&self.table).mark_fetched();
        debug!("Fetching {}", self.table);

        match self.store.fetch_all(&self.table).await {
            Ok(rows) => {
                let count = rows.len();
                self.registry
                    .borrow_mut()
                    .table_mut(&self.table)
                    .replace_all(rows);
                info!("Fetched {} rows from {}", count, self.table);
                Ok(count)
            }
            Err(e) => {
                self.registry
                    .borrow_mut()
                    .table_mut(&self.table)
                    .restore_fetched(previous);
                let err = CoreError::fetch_failed(&self.table, e);
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Fetch only if no fetch has been started yet. Returns whether a fetch ran.
    pub async fn ensure_fetched(&self) -> Result<bool, CoreError> {
        if self.has_fetched() {
            return Ok(false);
        }
        self.fetch_all().await.map(|_| true)
    }

    pub async fn create(&self, row: Row) -> Result<Row, CoreError> {
        let created = self.store.insert(&self.table, row).await.map_err(|e| {
            let err = CoreError::write_failed(&self.table, e);
            warn!("{}", err);
            err
        })?;
        self.registry
            .borrow_mut()
            .table_mut(&self.table)
            .upsert(created.clone());
        debug!("Created {:?} in {}", created.id(), self.table);
        Ok(created)
    }

    /// Partial update of one row. The row the server returns replaces the cached one.
    pub async fn update(&self, id: &RowId, fields: Row) -> Result<Row, CoreError> {
        let updated = self
            .store
            .update(&self.table, id, fields)
            .await
            .map_err(|e| {
                let err = CoreError::write_failed(&self.table, e);
                warn!("{}", err);
                err
            })?;
        self.registry
            .borrow_mut()
            .table_mut(&self.table)
            .upsert(updated.clone());
        Ok(updated)
    }

    pub async fn remove(&self, id: &RowId) -> Result<(), CoreError> {
        self.store.delete(&self.table, id).await.map_err(|e| {
            let err = CoreError::write_failed(&self.table, e);
            warn!("{}", err);
            err
        })?;
        self.registry
            .borrow_mut()
            .table_mut(&self.table)
            .delete_by_id(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        Row::from_value(value).unwrap()
    }

    fn setup() -> (Rc<MemoryStore>, SharedRegistry) {
        (Rc::new(MemoryStore::new()), TableRegistry::shared())
    }

    #[test]
    fn test_apply_change_creates_cache_lazily() {
        let mut registry = TableRegistry::new();
        let id = registry.apply_change(&ChangeEvent::insert("notes", row(json!({"id": 1}))));
        assert_eq!(id, Some(RowId::from(1)));
        assert_eq!(registry.rows("notes").len(), 1);
        assert_eq!(registry.table_names(), vec!["notes"]);
    }

    #[test]
    fn test_apply_change_delete_and_update() {
        let mut registry = TableRegistry::new();
        registry.apply_change(&ChangeEvent::insert("plans", row(json!({"id": 1, "done": false}))));
        registry.apply_change(&ChangeEvent::update("plans", row(json!({"id": 1, "done": true}))));
        assert_eq!(registry.rows("plans")[0].get("done"), Some(&json!(true)));

        registry.apply_change(&ChangeEvent::delete("plans", row(json!({"id": 1}))));
        assert!(registry.rows("plans").is_empty());
    }

    #[test]
    fn test_apply_change_without_row_is_dropped() {
        let mut registry = TableRegistry::new();
        let event = ChangeEvent {
            table: "plans".to_string(),
            kind: ChangeKind::Update,
            new_row: None,
            old_row: None,
        };
        assert_eq!(registry.apply_change(&event), None);
        assert!(registry.rows("plans").is_empty());
    }

    #[tokio::test]
    async fn test_create_then_fetch_round_trip() {
        let (store, registry) = setup();
        let plans = TableHandle::new(store.clone(), registry.clone(), "plans");

        let created = plans.create(row(json!({"title": "write docs"}))).await.unwrap();
        assert_eq!(plans.len(), 1);

        plans.fetch_all().await.unwrap();
        let rows = plans.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], created);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_and_rolls_back_flag() {
        let (store, registry) = setup();
        store.seed("plans", vec![row(json!({"id": 1}))]);
        let plans = TableHandle::new(store.clone(), registry, "plans");
        plans.fetch_all().await.unwrap();

        store.set_fail_fetches(true);
        store.seed("plans", vec![row(json!({"id": 2}))]);
        let err = plans.fetch_all().await.unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed { .. }));
        assert_eq!(plans.len(), 1);
        assert!(plans.has_fetched());
    }

    #[tokio::test]
    async fn test_first_fetch_failure_allows_retry() {
        let (store, registry) = setup();
        store.set_fail_fetches(true);
        let plans = TableHandle::new(store.clone(), registry, "plans");

        assert!(plans.ensure_fetched().await.is_err());
        assert!(!plans.has_fetched());

        store.set_fail_fetches(false);
        assert!(plans.ensure_fetched().await.unwrap());
        assert!(!plans.ensure_fetched().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_fetched_sends_one_request() {
        let (store, registry) = setup();
        store.seed("plans", vec![row(json!({"id": 1})), row(json!({"id": 2}))]);
        let plans = TableHandle::new(store.clone(), registry, "plans");

        let (first, second) = tokio::join!(plans.ensure_fetched(), plans.ensure_fetched());
        assert!(first.unwrap());
        assert!(!second.unwrap());
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(plans.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_cache_unchanged() {
        let (store, registry) = setup();
        store.seed("plans", vec![row(json!({"id": 1, "title": "a"}))]);
        let plans = TableHandle::new(store.clone(), registry, "plans");
        plans.fetch_all().await.unwrap();

        store.set_fail_writes(true);
        let err = plans
            .update(&RowId::from(1), Row::new().with("title", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WriteFailed { .. }));
        assert!(plans.create(row(json!({"title": "c"}))).await.is_err());
        assert!(plans.remove(&RowId::from(1)).await.is_err());

        let rows = plans.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_update_replaces_row_with_server_copy() {
        let (store, registry) = setup();
        store.seed("plans", vec![row(json!({"id": 1, "title": "a", "done": false}))]);
        let plans = TableHandle::new(store.clone(), registry, "plans");
        plans.fetch_all().await.unwrap();

        plans
            .update(&RowId::from(1), Row::new().with("done", true))
            .await
            .unwrap();
        let cached = plans.get(&RowId::from(1)).unwrap();
        assert_eq!(cached.get("done"), Some(&json!(true)));
        assert_eq!(cached.get("title"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_remove_deletes_from_cache() {
        let (store, registry) = setup();
        let plans = TableHandle::new(store.clone(), registry, "plans");
        let created = plans.create(row(json!({"title": "x"}))).await.unwrap();
        let id = created.id().unwrap();

        plans.remove(&id).await.unwrap();
        assert!(plans.get(&id).is_none());
        assert!(store.rows("plans").is_empty());
    }
}
