//! Checklist derived from the agent's plan.
//!
//! Completion only ever moves forward. The last item is held back from
//! ordinary progress counting: it flips only when a deliverable exists.

use agent_stream::PlanStep;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoItem {
    pub id: usize,
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskListManager {
    items: Vec<TodoItem>,
}

impl TaskListManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.completed).count()
    }

    /// Replace the list with `steps`, ids assigned by position.
    ///
    /// A position that was already completed stays completed even when the
    /// new plan's step carries no completion hint.
    pub fn set_from_plan(&mut self, steps: &[PlanStep]) {
        let items = steps
            .iter()
            .enumerate()
            .map(|(id, step)| {
                let was_completed = self.items.get(id).is_some_and(|item| item.completed);
                TodoItem {
                    id,
                    text: step.text.clone(),
                    completed: step.completed || was_completed,
                }
            })
            .collect();
        self.items = items;
    }

    /// Complete items `[0, min(n, len - 1))`. The final item is never touched.
    pub fn mark_progress(&mut self, n: usize) {
        let limit = n.min(self.items.len().saturating_sub(1));
        for item in &mut self.items[..limit] {
            item.completed = true;
        }
    }

    pub fn mark_all_complete(&mut self) {
        for item in &mut self.items {
            item.completed = true;
        }
    }
}
