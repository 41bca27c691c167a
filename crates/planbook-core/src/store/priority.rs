use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::views::PlanView;
use crate::models::Plan;

/// Allocates fractional sort keys so a plan can be placed between two others
/// without renumbering its siblings.
///
/// Collisions are checked against every priority in the plan table, not just
/// the sibling list being edited.
pub struct PriorityAssigner<R: Rng = StdRng> {
    sorted: Vec<f64>,
    rng: R,
}

impl PriorityAssigner<StdRng> {
    pub fn new(view: &PlanView) -> Self {
        Self::with_rng(view.sorted_priorities(), StdRng::from_entropy())
    }
}

impl<R: Rng> PriorityAssigner<R> {
    pub fn with_rng(priorities: impl IntoIterator<Item = f64>, rng: R) -> Self {
        let mut sorted: Vec<f64> = priorities.into_iter().collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted, rng }
    }

    fn offset(&mut self) -> f64 {
        self.rng.sample(Open01)
    }

    fn next_above(&self, value: f64) -> Option<f64> {
        self.sorted.iter().copied().find(|&p| p > value)
    }

    fn next_below(&self, value: f64) -> Option<f64> {
        self.sorted.iter().rev().copied().find(|&p| p < value)
    }

    /// Priority for an item placed between `above` and `below`.
    pub fn calculate_priority(&mut self, above: Option<f64>, below: Option<f64>) -> f64 {
        let candidate = match (above, below) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            (Some(a), None) => a + self.offset(),
            (None, Some(b)) => b - self.offset(),
            (None, None) => self.offset(),
        };
        if !self.sorted.contains(&candidate) {
            return candidate;
        }
        match self.next_above(candidate) {
            Some(next) => (candidate + next) / 2.0,
            None => candidate + self.offset(),
        }
    }

    /// Priority for a new item appended to `list`, which does not contain it yet.
    /// An empty list anchors on the parent's priority, or zero at the top level.
    pub fn new_item_priority(&mut self, list: &[&Plan], parent: Option<&Plan>) -> f64 {
        let above = match list.last() {
            Some(last) => last.priority,
            None => parent.map_or(0.0, |p| p.priority),
        };
        let below = self.next_above(above);
        self.calculate_priority(Some(above), below)
    }

    /// Priority for the item at `index` of `list`, which already contains it at
    /// its new position. `None` means the priority should stay as it is.
    pub fn moved_item_priority(&mut self, list: &[&Plan], index: usize) -> Option<f64> {
        if list.len() <= 1 || index >= list.len() {
            return None;
        }
        let above = if index > 0 {
            Some(list[index - 1].priority)
        } else {
            self.next_below(list[1].priority)
        };
        let below = if index < list.len() - 1 {
            Some(list[index + 1].priority)
        } else {
            self.next_above(list[index - 1].priority)
        };
        Some(self.calculate_priority(above, below))
    }
}
