use std::fs::OpenOptions;
use std::sync::Mutex;

use planbook_core::constants::ENV_LOG_FILE;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console logging to stderr filtered by `RUST_LOG`, plus a debug-level file
/// log when `PLANBOOK_LOG_FILE` is set.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    let Some(log_path) = std::env::var(ENV_LOG_FILE).ok() else {
        registry.init();
        return;
    };

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_filter(LevelFilter::DEBUG);
            registry.with(file_layer).init();
            eprintln!("File logging enabled: {}", log_path);
        }
        Err(e) => {
            registry.init();
            tracing::warn!("Could not open log file {}: {}", log_path, e);
        }
    }
}
