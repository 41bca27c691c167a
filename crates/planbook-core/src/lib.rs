pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod remote;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod sync;

pub use config::CoreConfig;
pub use error::{CoreError, RemoteError};
pub use events::{CoreEvent, EnvSignal};
pub use runtime::{CoreHandle, CoreRuntime};
