pub mod change;
pub mod plan;
pub mod plan_dependency;
pub mod row;

pub use change::{ChangeEvent, ChangeKind, ChannelStatus};
pub use plan::{EstimateField, Plan};
pub use plan_dependency::PlanDependency;
pub use row::{Row, RowId};
