use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use super::{ChannelFilter, ChannelHandle, ChannelMessage, RemoteStore};
use crate::constants::columns;
use crate::error::RemoteError;
use crate::models::{ChangeEvent, ChannelStatus, Row, RowId};

struct OpenChannel {
    filter: ChannelFilter,
    tx: mpsc::UnboundedSender<ChannelMessage>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl OpenChannel {
    fn is_live(&mut self) -> bool {
        matches!(
            self.shutdown_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ) && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct MemoryInner {
    tables: HashMap<String, Vec<Row>>,
    next_id: i64,
    channels: Vec<OpenChannel>,
    open_count: usize,
    fetch_count: usize,
    failing_opens: u32,
    fail_fetches: bool,
    fail_writes: bool,
    manual_subscribe: bool,
}

impl MemoryInner {
    fn broadcast(&mut self, message: ChannelMessage) {
        self.channels.retain_mut(|channel| {
            if !channel.is_live() {
                return false;
            }
            if let ChannelMessage::Change(event) = &message {
                if !channel.filter.matches(&event.table) {
                    return true;
                }
            }
            channel.tx.send(message.clone()).is_ok()
        });
    }

    fn position(&self, table: &str, id: &RowId) -> Option<usize> {
        self.tables
            .get(table)?
            .iter()
            .position(|row| row.id().as_ref() == Some(id))
    }
}

/// In-process remote store.
///
/// Behaves like the hosted database from the cache's point of view: assigns
/// integer ids, echoes every write as a change event on open channels, and
/// reports `Subscribed` as soon as a channel opens. Failure switches let
/// callers exercise the error paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with rows, bypassing change notification.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut inner = self.inner.borrow_mut();
        for row in &rows {
            if let Some(n) = row.id().and_then(|id| id.as_str().parse::<i64>().ok()) {
                inner.next_id = inner.next_id.max(n);
            }
        }
        inner.tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .borrow()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.inner.borrow_mut().fail_fetches = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.borrow_mut().fail_writes = fail;
    }

    /// Make the next `count` channel opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.inner.borrow_mut().failing_opens = count;
    }

    /// When set, opened channels stay in `Connecting` until [`emit_status`](Self::emit_status).
    pub fn set_manual_subscribe(&self, manual: bool) {
        self.inner.borrow_mut().manual_subscribe = manual;
    }

    /// Number of `fetch_all` requests so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.inner.borrow().fetch_count
    }

    /// Number of channel open attempts so far, including failed ones.
    pub fn open_count(&self) -> usize {
        self.inner.borrow().open_count
    }

    /// Number of channels that are still delivering.
    pub fn live_channels(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.channels.retain_mut(OpenChannel::is_live);
        inner.channels.len()
    }

    /// Send a status to every open channel. `Closed` also drops the channels.
    pub fn emit_status(&self, status: ChannelStatus) {
        let mut inner = self.inner.borrow_mut();
        inner.broadcast(ChannelMessage::Status(status));
        if status == ChannelStatus::Closed {
            inner.channels.clear();
        }
    }

    /// Deliver a change that did not originate from this process.
    pub fn push_change(&self, event: ChangeEvent) {
        self.inner
            .borrow_mut()
            .broadcast(ChannelMessage::Change(event));
    }
}

#[async_trait(?Send)]
impl RemoteStore for MemoryStore {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError> {
        self.inner.borrow_mut().fetch_count += 1;
        // A real request suspends the caller at least once.
        tokio::task::yield_now().await;
        if self.inner.borrow().fail_fetches {
            return Err(RemoteError::Unavailable {
                message: format!("fetch of {} rejected", table),
            });
        }
        Ok(self.rows(table))
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, RemoteError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(RemoteError::Unavailable {
                message: format!("insert into {} rejected", table),
            });
        }
        if row.id().is_none() {
            inner.next_id += 1;
            row.set(columns::ID, inner.next_id);
        }
        if row.get("created_at").is_none() {
            row.set("created_at", Utc::now().to_rfc3339());
        }
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        inner.broadcast(ChannelMessage::Change(ChangeEvent::insert(table, row.clone())));
        Ok(row)
    }

    async fn update(&self, table: &str, id: &RowId, fields: Row) -> Result<Row, RemoteError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(RemoteError::Unavailable {
                message: format!("update of {} rejected", table),
            });
        }
        let Some(pos) = inner.position(table, id) else {
            return Err(RemoteError::NotFound {
                table: table.to_string(),
                id: id.clone(),
            });
        };
        let updated = {
            let rows = inner.tables.entry(table.to_string()).or_default();
            rows[pos].merge(fields);
            rows[pos].clone()
        };
        inner.broadcast(ChannelMessage::Change(ChangeEvent::update(
            table,
            updated.clone(),
        )));
        Ok(updated)
    }

    async fn delete(&self, table: &str, id: &RowId) -> Result<(), RemoteError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(RemoteError::Unavailable {
                message: format!("delete from {} rejected", table),
            });
        }
        if let Some(pos) = inner.position(table, id) {
            let removed = inner
                .tables
                .entry(table.to_string())
                .or_default()
                .remove(pos);
            inner.broadcast(ChannelMessage::Change(ChangeEvent::delete(table, removed)));
        }
        Ok(())
    }

    async fn open_change_channel(
        &self,
        filter: &ChannelFilter,
    ) -> Result<ChannelHandle, RemoteError> {
        let mut inner = self.inner.borrow_mut();
        inner.open_count += 1;
        if inner.failing_opens > 0 {
            inner.failing_opens -= 1;
            return Err(RemoteError::Unavailable {
                message: "channel open rejected".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Connecting));
        if !inner.manual_subscribe {
            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        }
        inner.channels.push(OpenChannel {
            filter: filter.clone(),
            tx,
            shutdown_rx,
        });
        Ok(ChannelHandle::new(rx, shutdown_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        Row::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_after_seeded_rows() {
        let store = MemoryStore::new();
        store.seed("plans", vec![row(json!({"id": 7}))]);

        let created = store.insert("plans", row(json!({"title": "x"}))).await.unwrap();
        assert_eq!(created.id(), Some(RowId::from(8)));
        assert!(created.get("created_at").is_some());
        assert_eq!(store.rows("plans").len(), 2);
    }

    #[tokio::test]
    async fn test_writes_are_echoed_on_open_channels() {
        let store = MemoryStore::new();
        let mut channel = store
            .open_change_channel(&ChannelFilter::default())
            .await
            .unwrap();

        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Connecting))
        );
        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );

        let created = store.insert("plans", row(json!({"title": "x"}))).await.unwrap();
        match channel.recv().await {
            Some(ChannelMessage::Change(event)) => {
                assert_eq!(event, ChangeEvent::insert("plans", created));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_stops_receiving() {
        let store = MemoryStore::new();
        let channel = store
            .open_change_channel(&ChannelFilter::default())
            .await
            .unwrap();
        assert_eq!(store.live_channels(), 1);

        channel.unsubscribe();
        assert_eq!(store.live_channels(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("plans", &RowId::from(1), Row::new().with("done", true))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_failing_opens_are_counted() {
        let store = MemoryStore::new();
        store.fail_next_opens(1);
        assert!(store
            .open_change_channel(&ChannelFilter::default())
            .await
            .is_err());
        assert!(store
            .open_change_channel(&ChannelFilter::default())
            .await
            .is_ok());
        assert_eq!(store.open_count(), 2);
    }
}
