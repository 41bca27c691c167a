use std::fmt;

use super::row::{Row, RowId};

/// Kind of row change pushed by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parse the wire name (`INSERT`, `UPDATE`, `DELETE`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One pushed change for a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub new_row: Option<Row>,
    pub old_row: Option<Row>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn update(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn delete(table: impl Into<String>, old_row: Row) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            new_row: None,
            old_row: Some(old_row),
        }
    }

    /// Identifier of the affected row: the old row's id for deletes, the new row's
    /// otherwise, falling back to whichever side carries one.
    pub fn row_id(&self) -> Option<RowId> {
        let (first, second) = match self.kind {
            ChangeKind::Delete => (&self.old_row, &self.new_row),
            ChangeKind::Insert | ChangeKind::Update => (&self.new_row, &self.old_row),
        };
        first
            .as_ref()
            .and_then(Row::id)
            .or_else(|| second.as_ref().and_then(Row::id))
    }
}

/// Connection status reported by a change channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Closed,
    Error,
}
