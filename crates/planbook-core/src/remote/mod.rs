//! Boundary to the hosted database.
//!
//! The remote store is reached through plain request/response CRUD plus one
//! push channel that multiplexes row changes for every table. Everything above
//! this module only sees the [`RemoteStore`] trait.

pub mod memory;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::constants::DEFAULT_CHANNEL_NAME;
use crate::error::RemoteError;
use crate::models::{ChangeEvent, ChannelStatus, Row, RowId};

pub use memory::MemoryStore;
pub use rest::PostgrestStore;

#[async_trait(?Send)]
pub trait RemoteStore {
    /// Every row of `table`.
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError>;

    /// Insert `row` and return the canonical row including server-assigned fields.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, RemoteError>;

    /// Apply `fields` to the row with `id` and return the updated row.
    async fn update(&self, table: &str, id: &RowId, fields: Row) -> Result<Row, RemoteError>;

    async fn delete(&self, table: &str, id: &RowId) -> Result<(), RemoteError>;

    /// Open a push channel. Statuses and changes arrive on the returned handle.
    async fn open_change_channel(
        &self,
        filter: &ChannelFilter,
    ) -> Result<ChannelHandle, RemoteError>;
}

/// Which changes a channel listens to. `None` means every schema or table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub name: String,
    pub schema: Option<String>,
    pub table: Option<String>,
}

impl ChannelFilter {
    /// Listen to every change in every schema.
    pub fn wildcard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: None,
        }
    }

    pub fn matches(&self, table: &str) -> bool {
        self.table.as_deref().map_or(true, |t| t == table)
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self::wildcard(DEFAULT_CHANNEL_NAME)
    }
}

/// A message delivered on a change channel. Statuses and changes share one
/// ordered stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// Live handle to an open change channel.
///
/// Dropping the handle also closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    messages: mpsc::UnboundedReceiver<ChannelMessage>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelHandle {
    pub fn new(
        messages: mpsc::UnboundedReceiver<ChannelMessage>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            messages,
            shutdown: Some(shutdown),
        }
    }

    /// Next message, or `None` once the remote side is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.messages.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Result<ChannelMessage, mpsc::error::TryRecvError> {
        self.messages.try_recv()
    }

    /// Ask the remote side to stop delivering.
    pub fn unsubscribe(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
