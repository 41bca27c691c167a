use serde::Deserialize;

use super::row::{Row, RowId};

/// A row of the `plan_dependencies` table: `plan_id` cannot start before
/// `depends_on_id` is finished.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanDependency {
    pub id: RowId,
    pub plan_id: RowId,
    pub depends_on_id: RowId,
}

impl PlanDependency {
    pub fn from_row(row: &Row) -> Option<Self> {
        serde_json::from_value(row.clone().into_value()).ok()
    }
}
