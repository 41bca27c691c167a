//! Application-wide constants
//!
//! Centralized location for table names, column names and timing defaults
//! that are used across multiple modules.

/// Environment variable overriding the remote base URL
pub const ENV_REMOTE_URL: &str = "PLANBOOK_URL";

/// Environment variable overriding the remote API key
pub const ENV_API_KEY: &str = "PLANBOOK_API_KEY";

/// Environment variable enabling debug logging to a file
pub const ENV_LOG_FILE: &str = "PLANBOOK_LOG_FILE";

/// Default realtime channel name
pub const DEFAULT_CHANNEL_NAME: &str = "realtime";

// Plan defaults
pub const DEFAULT_PLAN_TITLE: &str = "Untitled";

// Reconnect policy defaults
/// First reconnect delay; doubles on every attempt
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;
/// Upper bound for a single reconnect delay
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
/// Automatic reconnects stop after this many attempts until an external trigger
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Quiet period before a debounced plan update is sent
pub const UPDATE_DEBOUNCE_MS: u64 = 150;

/// Budget for the realtime socket handshake, and again for the channel join
pub const JOIN_TIMEOUT_MS: u64 = 5_000;

/// Interval between realtime socket heartbeats
pub const HEARTBEAT_INTERVAL_MS: u64 = 25_000;

/// Table names used by planbook
pub mod tables {
    pub const PLANS: &str = "plans";
    pub const PLAN_DEPENDENCIES: &str = "plan_dependencies";
}

/// Column names shared by every table
pub mod columns {
    /// Table-scoped row identifier
    pub const ID: &str = "id";
    /// Parent reference in the plans forest (null for roots)
    pub const PARENT_ID: &str = "parent_id";
}
