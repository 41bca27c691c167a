pub mod debounce;
pub mod priority;
pub mod registry;
pub mod table_cache;
pub mod updater;
pub mod views;

pub use debounce::Debouncer;
pub use priority::PriorityAssigner;
pub use registry::{SharedRegistry, TableHandle, TableRegistry};
pub use table_cache::TableCache;
pub use updater::PlanUpdater;
pub use views::PlanView;
