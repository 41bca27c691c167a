use std::time::Duration;

use crate::models::RowId;

/// Errors reported by a [`RemoteStore`](crate::remote::RemoteStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode remote payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Row {id} not found in {table}")]
    NotFound { table: String, id: RowId },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Remote store unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors surfaced by the cache layer.
///
/// `ChannelOpenFailed` and `ChannelClosedUnexpectedly` never reach a caller of
/// the public API. The subscription manager logs them and reconnects.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Fetching table {table} failed: {source}")]
    FetchFailed {
        table: String,
        #[source]
        source: RemoteError,
    },

    #[error("Write to table {table} failed: {source}")]
    WriteFailed {
        table: String,
        #[source]
        source: RemoteError,
    },

    #[error("Opening the change channel failed: {source}")]
    ChannelOpenFailed {
        #[source]
        source: RemoteError,
    },

    #[error("Change channel closed unexpectedly")]
    ChannelClosedUnexpectedly,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn fetch_failed(table: impl Into<String>, source: RemoteError) -> Self {
        Self::FetchFailed {
            table: table.into(),
            source,
        }
    }

    pub fn write_failed(table: impl Into<String>, source: RemoteError) -> Self {
        Self::WriteFailed {
            table: table.into(),
            source,
        }
    }
}
