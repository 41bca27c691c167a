use std::cmp::Ordering;
use std::collections::HashMap;

use super::registry::TableRegistry;
use crate::constants::tables;
use crate::models::{EstimateField, Plan, PlanDependency, Row, RowId};

/// Read-only snapshot of the plan tables with the derived views over it.
///
/// Built from the cache on demand; nothing here is memoized beyond the
/// indexes computed at construction.
#[derive(Debug, Clone, Default)]
pub struct PlanView {
    plans: Vec<Plan>,
    by_id: HashMap<RowId, usize>,
    /// parent id (None for roots) -> indices of direct children in cache order
    children: HashMap<Option<RowId>, Vec<usize>>,
    dependencies: Vec<PlanDependency>,
}

impl PlanView {
    pub fn new(plans: Vec<Plan>, dependencies: Vec<PlanDependency>) -> Self {
        let mut by_id = HashMap::with_capacity(plans.len());
        let mut children: HashMap<Option<RowId>, Vec<usize>> = HashMap::new();
        for (i, plan) in plans.iter().enumerate() {
            by_id.insert(plan.id.clone(), i);
            children.entry(plan.parent_id.clone()).or_default().push(i);
        }
        Self {
            plans,
            by_id,
            children,
            dependencies,
        }
    }

    pub fn from_rows(plan_rows: &[Row], dependency_rows: &[Row]) -> Self {
        Self::new(
            plan_rows.iter().filter_map(Plan::from_row).collect(),
            dependency_rows
                .iter()
                .filter_map(PlanDependency::from_row)
                .collect(),
        )
    }

    pub fn from_registry(registry: &TableRegistry) -> Self {
        Self::from_rows(
            registry.rows(tables::PLANS),
            registry.rows(tables::PLAN_DEPENDENCIES),
        )
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn plan(&self, id: &RowId) -> Option<&Plan> {
        self.by_id.get(id).map(|&i| &self.plans[i])
    }

    pub fn plan_map(&self) -> HashMap<&RowId, &Plan> {
        self.plans.iter().map(|p| (&p.id, p)).collect()
    }

    /// Every plan grouped under its parent id (`None` for roots), in cache order.
    pub fn children_by_parent(&self) -> HashMap<Option<RowId>, Vec<&Plan>> {
        self.children
            .iter()
            .map(|(parent, idx)| (parent.clone(), idx.iter().map(|&i| &self.plans[i]).collect()))
            .collect()
    }

    /// Direct children of `parent`, or the roots when `parent` is `None`.
    pub fn children(&self, parent: Option<&RowId>) -> Vec<&Plan> {
        self.children
            .get(&parent.cloned())
            .map(|idx| idx.iter().map(|&i| &self.plans[i]).collect())
            .unwrap_or_default()
    }

    fn has_children(&self, id: &RowId) -> bool {
        self.children.contains_key(&Some(id.clone()))
    }

    fn live_children(&self, id: &RowId) -> impl Iterator<Item = &Plan> {
        self.children(Some(id)).into_iter().filter(|p| !p.archived)
    }

    /// The chain from the root down to `id`, including `id` itself.
    ///
    /// Stops at the first parent that is not in the cache. The walk is bounded
    /// by the number of plans, so a cycle cannot loop forever.
    pub fn ancestry_trail(&self, id: &RowId) -> Vec<&Plan> {
        let mut trail = Vec::new();
        let mut current = self.plan(id);
        while let Some(plan) = current {
            if trail.len() >= self.plans.len() {
                tracing::warn!("ancestry of {} exceeds plan count, parent cycle?", id);
                break;
            }
            trail.push(plan);
            current = plan.parent_id.as_ref().and_then(|p| self.plan(p));
        }
        trail.reverse();
        trail
    }

    fn has_closed_ancestor(&self, plan: &Plan) -> bool {
        let mut current = plan.parent_id.as_ref().and_then(|p| self.plan(p));
        let mut steps = 0;
        while let Some(ancestor) = current {
            if ancestor.is_closed() {
                return true;
            }
            steps += 1;
            if steps >= self.plans.len() {
                break;
            }
            current = ancestor.parent_id.as_ref().and_then(|p| self.plan(p));
        }
        false
    }

    /// Leaves of the cached tree that sit under no done or archived ancestor,
    /// ordered open first, then finished (most recent first), then by priority.
    pub fn active_task_list(&self) -> Vec<&Plan> {
        let mut tasks: Vec<&Plan> = self
            .plans
            .iter()
            .filter(|p| !self.has_children(&p.id) && !self.has_closed_ancestor(p))
            .collect();
        tasks.sort_by(|a, b| task_order(a, b));
        tasks
    }

    pub fn finished_children(&self, id: &RowId) -> usize {
        self.live_children(id).filter(|p| p.done).count()
    }

    pub fn unfinished_children(&self, id: &RowId) -> usize {
        self.live_children(id).filter(|p| !p.done).count()
    }

    pub fn total_children(&self, id: &RowId) -> usize {
        self.live_children(id).count()
    }

    /// Sum of `field` over non-archived direct children; missing values count as zero.
    pub fn summed_field(&self, id: &RowId, field: EstimateField) -> f64 {
        self.live_children(id)
            .filter_map(|p| p.estimate(field))
            .sum()
    }

    /// The children of `plan` need more than `plan` itself declares.
    pub fn red_flag(&self, plan: &Plan, field: EstimateField) -> bool {
        match plan.estimate(field) {
            Some(target) => self.summed_field(&plan.id, field) > target,
            None => false,
        }
    }

    /// Estimate hint shown next to a plan that has no value for `field`.
    pub fn placeholder(&self, plan: &Plan, field: EstimateField) -> String {
        if plan.is_closed() {
            return "(0)".to_string();
        }
        if self.red_flag(plan, field) {
            return "!".to_string();
        }

        if let Some(parent) = plan.parent_id.as_ref().and_then(|p| self.plan(p)) {
            if self.red_flag(parent, field) {
                return "!".to_string();
            }
            let siblings: Vec<&Plan> = self.live_children(&parent.id).collect();
            let unestimated = siblings
                .iter()
                .filter(|p| !p.done && p.estimate(field).is_none())
                .count();
            if unestimated == 0 {
                return "err".to_string();
            }
            let Some(target) = parent.estimate(field) else {
                return "(0)".to_string();
            };
            let spent: f64 = siblings.iter().filter_map(|p| p.estimate(field)).sum();
            return format!("({})", one_decimal((target - spent) / unestimated as f64));
        }

        if self.total_children(&plan.id) > 0 {
            return format!("({})", plain_number(self.summed_field(&plan.id, field)));
        }
        String::new()
    }

    /// Ids of the plans `id` depends on that are still open. Dependencies on
    /// plans missing from the cache do not block.
    pub fn blockers(&self, id: &RowId) -> Vec<RowId> {
        self.dependencies
            .iter()
            .filter(|d| &d.plan_id == id)
            .filter(|d| self.plan(&d.depends_on_id).is_some_and(|p| !p.is_closed()))
            .map(|d| d.depends_on_id.clone())
            .collect()
    }

    /// Every priority in the snapshot, ascending.
    pub fn sorted_priorities(&self) -> Vec<f64> {
        let mut priorities: Vec<f64> = self.plans.iter().map(|p| p.priority).collect();
        priorities.sort_by(f64::total_cmp);
        priorities
    }
}

fn task_order(a: &Plan, b: &Plan) -> Ordering {
    a.archived
        .cmp(&b.archived)
        .then(a.done.cmp(&b.done))
        .then_with(|| {
            if a.done && b.done {
                b.done_date.cmp(&a.done_date)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.priority.total_cmp(&b.priority))
}

fn one_decimal(value: f64) -> String {
    let formatted = format!("{:.1}", value);
    match formatted.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => formatted,
    }
}

fn plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
