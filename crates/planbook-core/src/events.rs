use crate::models::{ChangeKind, RowId};
use crate::sync::ConnectionState;

/// Notifications pushed from the core to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A pushed change was applied to the cache of `table`
    RowChanged {
        table: String,
        kind: ChangeKind,
        id: RowId,
    },
    ConnectionChanged(ConnectionState),
    /// A background write (debounced update, bulk archive) was rejected
    WriteFailed { table: String, message: String },
}

/// Host environment signals that influence the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSignal {
    Visible,
    Hidden,
    Online,
    Offline,
}

impl EnvSignal {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "visible" => Some(EnvSignal::Visible),
            "hidden" => Some(EnvSignal::Hidden),
            "online" => Some(EnvSignal::Online),
            "offline" => Some(EnvSignal::Offline),
            _ => None,
        }
    }
}
