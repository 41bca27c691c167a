use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::debounce::Debouncer;
use super::registry::TableHandle;
use crate::error::CoreError;
use crate::events::CoreEvent;
use crate::models::{Plan, Row, RowId};

/// Write helpers for the plans table used by the presentation layer.
#[derive(Clone)]
pub struct PlanUpdater {
    plans: TableHandle,
    events: mpsc::UnboundedSender<CoreEvent>,
    debouncer: Debouncer<RowId>,
    /// Fields accumulated per plan while its debounce window is open
    pending: Rc<RefCell<HashMap<RowId, Row>>>,
}

impl PlanUpdater {
    pub fn new(
        plans: TableHandle,
        events: mpsc::UnboundedSender<CoreEvent>,
        debounce: Duration,
    ) -> Self {
        Self {
            plans,
            events,
            debouncer: Debouncer::new(debounce),
            pending: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Queue a partial update of one plan.
    ///
    /// Calls for the same id within the debounce window are merged (later
    /// fields win) into a single request. Failures are reported as
    /// [`CoreEvent::WriteFailed`].
    pub fn update_plan(&self, id: RowId, fields: Row) {
        self.pending
            .borrow_mut()
            .entry(id.clone())
            .or_default()
            .merge(fields);

        let pending = self.pending.clone();
        let plans = self.plans.clone();
        let events = self.events.clone();
        let key = id.clone();
        self.debouncer.schedule(id, move || {
            let fields = pending.borrow_mut().remove(&key);
            async move {
                let Some(fields) = fields else { return };
                let summary = fields.clone().into_value();
                match plans.update(&key, fields).await {
                    Ok(_) => info!("Plan {} updated with {}", key, summary),
                    Err(e) => {
                        error!("Error updating plan {}: {}", key, e);
                        let _ = events.send(CoreEvent::WriteFailed {
                            table: plans.table().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        });
    }

    pub fn has_pending_update(&self, id: &RowId) -> bool {
        self.debouncer.is_pending(id)
    }

    /// Flip the `done` flag of a cached plan.
    pub async fn complete_plan(&self, id: &RowId) -> Result<Row, CoreError> {
        let done = self
            .plans
            .get(id)
            .and_then(|row| Plan::from_row(&row))
            .map(|plan| plan.done)
            .unwrap_or(false);
        self.plans.update(id, Row::new().with("done", !done)).await
    }

    /// Archive every done, not yet archived direct child of `parent` (the roots
    /// when `parent` is `None`). Returns how many plans were archived.
    pub async fn archive_done_children(&self, parent: Option<&RowId>) -> usize {
        let targets: Vec<RowId> = self
            .plans
            .rows()
            .iter()
            .filter_map(Plan::from_row)
            .filter(|p| p.parent_id.as_ref() == parent && p.done && !p.archived)
            .map(|p| p.id)
            .collect();

        let mut archived = 0;
        for id in targets {
            match self.plans.update(&id, Row::new().with("archived", true)).await {
                Ok(_) => archived += 1,
                Err(e) => {
                    error!("Error archiving plan {}: {}", id, e);
                    let _ = self.events.send(CoreEvent::WriteFailed {
                        table: self.plans.table().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!("Archived {} done children", archived);
        archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::tables;
    use crate::remote::MemoryStore;
    use crate::store::registry::TableRegistry;
    use serde_json::json;
    use tokio::task::LocalSet;
    use tokio::time::advance;

    fn row(value: serde_json::Value) -> Row {
        Row::from_value(value).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn setup(
        seed: Vec<Row>,
    ) -> (
        Rc<MemoryStore>,
        PlanUpdater,
        mpsc::UnboundedReceiver<CoreEvent>,
    ) {
        let store = Rc::new(MemoryStore::new());
        store.seed(tables::PLANS, seed);
        let plans = TableHandle::new(store.clone(), TableRegistry::shared(), tables::PLANS);
        plans.fetch_all().await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (store, PlanUpdater::new(plans, tx, Duration::from_millis(150)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_plan_coalesces_calls_per_id() {
        LocalSet::new()
            .run_until(async {
                let (store, updater, _rx) =
                    setup(vec![row(json!({"id": 1, "title": "a", "priority": 1.0}))]).await;
                let id = RowId::from(1);

                updater.update_plan(id.clone(), Row::new().with("title", "b"));
                advance(Duration::from_millis(50)).await;
                updater.update_plan(id.clone(), Row::new().with("priority", 2.0));
                advance(Duration::from_millis(50)).await;
                updater.update_plan(id.clone(), Row::new().with("title", "c"));
                settle().await;
                assert_eq!(store.rows(tables::PLANS)[0].get("title"), Some(&json!("a")));
                assert!(updater.has_pending_update(&id));

                advance(Duration::from_millis(151)).await;
                settle().await;
                let stored = &store.rows(tables::PLANS)[0];
                assert_eq!(stored.get("title"), Some(&json!("c")));
                assert_eq!(stored.get("priority"), Some(&json!(2.0)));
                assert!(!updater.has_pending_update(&id));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_plan_ids_are_independent() {
        LocalSet::new()
            .run_until(async {
                let (store, updater, _rx) = setup(vec![
                    row(json!({"id": 1, "done": false})),
                    row(json!({"id": 2, "done": false})),
                ])
                .await;
                updater.update_plan(RowId::from(1), Row::new().with("done", true));
                updater.update_plan(RowId::from(2), Row::new().with("done", true));
                advance(Duration::from_millis(151)).await;
                settle().await;

                for stored in store.rows(tables::PLANS) {
                    assert_eq!(stored.get("done"), Some(&json!(true)));
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_plan_failure_is_reported() {
        LocalSet::new()
            .run_until(async {
                let (store, updater, mut rx) = setup(vec![row(json!({"id": 1}))]).await;
                store.set_fail_writes(true);
                updater.update_plan(RowId::from(1), Row::new().with("done", true));
                advance(Duration::from_millis(151)).await;
                settle().await;

                match rx.try_recv() {
                    Ok(CoreEvent::WriteFailed { table, .. }) => assert_eq!(table, "plans"),
                    other => panic!("unexpected event: {:?}", other),
                }
            })
            .await;
    }

    #[tokio::test]
    async fn test_complete_plan_toggles_done() {
        let (_store, updater, _rx) = setup(vec![row(json!({"id": 1, "done": false}))]).await;
        let updated = updater.complete_plan(&RowId::from(1)).await.unwrap();
        assert_eq!(updated.get("done"), Some(&json!(true)));
        let updated = updater.complete_plan(&RowId::from(1)).await.unwrap();
        assert_eq!(updated.get("done"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_archive_done_children_of_parent() {
        let (store, updater, _rx) = setup(vec![
            row(json!({"id": 1})),
            row(json!({"id": 2, "parent_id": 1, "done": true})),
            row(json!({"id": 3, "parent_id": 1, "done": false})),
            row(json!({"id": 4, "parent_id": 1, "done": true, "archived": true})),
            row(json!({"id": 5, "done": true})),
        ])
        .await;

        assert_eq!(updater.archive_done_children(Some(&RowId::from(1))).await, 1);
        let archived: Vec<String> = store
            .rows(tables::PLANS)
            .iter()
            .filter(|r| r.get("archived") == Some(&json!(true)))
            .filter_map(|r| r.id())
            .map(|id| id.to_string())
            .collect();
        assert_eq!(archived, vec!["2", "4"]);

        assert_eq!(updater.archive_done_children(None).await, 1);
    }
}
