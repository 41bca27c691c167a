//! Keeps the table caches in step with the remote store over one change channel.

pub mod backoff;
pub mod subscription;

pub use backoff::ReconnectPolicy;
pub use subscription::{ConnectionState, SubscriptionManager, SyncCommand};
