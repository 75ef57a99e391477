//! Fixed, prefix-monotonic phase state machine.

use agent_stream::EventKind;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Connect,
    Retrieve,
    StartAgent,
    Reason,
    Plan,
    Execute,
    Observe,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Connect,
        Phase::Retrieve,
        Phase::StartAgent,
        Phase::Reason,
        Phase::Plan,
        Phase::Execute,
        Phase::Observe,
        Phase::Complete,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Retrieve => "retrieve",
            Self::StartAgent => "start-agent",
            Self::Reason => "reason",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Observe => "observe",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusStep {
    pub index: usize,
    pub label: &'static str,
    pub status: StepStatus,
}

/// Target of a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub phase: Phase,
    pub status: StepStatus,
}

impl Route {
    pub const fn new(phase: Phase, status: StepStatus) -> Self {
        Self { phase, status }
    }
}

/// Transition applied when a submission starts connecting.
pub const SUBMITTED_ROUTE: Route = Route::new(Phase::Connect, StepStatus::Active);
/// Transition applied when the server accepts the stream.
pub const OPENED_ROUTE: Route = Route::new(Phase::Retrieve, StepStatus::Active);

/// Static routing table from event kind to phase transition. The only source
/// of phase changes besides the two lifecycle routes above.
pub fn route(kind: EventKind) -> Option<Route> {
    use StepStatus::{Active, Completed};

    Some(match kind {
        EventKind::Connected => Route::new(Phase::Retrieve, Active),
        EventKind::ModelInfo => Route::new(Phase::StartAgent, Active),
        EventKind::Reasoning => Route::new(Phase::Reason, Active),
        EventKind::Planning => Route::new(Phase::Plan, Active),
        EventKind::ToolCall => Route::new(Phase::Execute, Active),
        EventKind::ToolOutput | EventKind::Visualization | EventKind::FileOperation => {
            Route::new(Phase::Observe, Active)
        }
        EventKind::FinalAnswer => Route::new(Phase::Complete, Active),
        EventKind::Done => Route::new(Phase::Complete, Completed),
        EventKind::AiMessage
        | EventKind::Warning
        | EventKind::MixedContent
        | EventKind::Error
        | EventKind::Ping
        | EventKind::Unknown => return None,
    })
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    steps: Vec<StatusStep>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            steps: Phase::ALL
                .iter()
                .map(|phase| StatusStep {
                    index: phase.index(),
                    label: phase.label(),
                    status: StepStatus::Pending,
                })
                .collect(),
        }
    }

    pub fn steps(&self) -> &[StatusStep] {
        &self.steps
    }

    /// Length of the completed prefix, i.e. the first index not completed.
    pub fn completed_prefix(&self) -> usize {
        self.steps
            .iter()
            .take_while(|step| step.status == StepStatus::Completed)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_prefix() == self.steps.len()
    }

    /// Complete every step before `index` and set step `index` to `status`.
    ///
    /// Backward motion is rejected as a no-op: returns `false` when `index`
    /// lies inside the completed prefix or past the table.
    pub fn advance(&mut self, index: usize, status: StepStatus) -> bool {
        let furthest = self.completed_prefix();
        if index >= self.steps.len() || index < furthest {
            debug!(index, furthest, "rejected backward phase transition");
            return false;
        }

        for step in &mut self.steps[..index] {
            step.status = StepStatus::Completed;
        }
        self.steps[index].status = status;
        true
    }

    pub fn apply(&mut self, route: Route) -> bool {
        self.advance(route.phase.index(), route.status)
    }
}

#[cfg(test)]
mod tests {
    use agent_stream::EventKind;

    use super::{route, Phase, ProgressTracker, StepStatus};

    fn statuses(tracker: &ProgressTracker) -> Vec<StepStatus> {
        tracker.steps().iter().map(|step| step.status).collect()
    }

    #[test]
    fn advance_completes_prefix_and_leaves_remainder() {
        use StepStatus::{Active, Completed, Pending};

        let mut tracker = ProgressTracker::new();
        assert!(tracker.advance(Phase::Reason.index(), Active));
        assert_eq!(
            statuses(&tracker),
            vec![Completed, Completed, Completed, Active, Pending, Pending, Pending, Pending]
        );
        assert_eq!(tracker.completed_prefix(), 3);
    }

    #[test]
    fn backward_motion_is_a_no_op() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.advance(Phase::Observe.index(), StepStatus::Active));
        let before = statuses(&tracker);

        assert!(!tracker.advance(Phase::Reason.index(), StepStatus::Active));
        assert_eq!(statuses(&tracker), before);
    }

    #[test]
    fn revisiting_the_active_step_is_allowed() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.advance(Phase::Execute.index(), StepStatus::Active));
        assert!(tracker.advance(Phase::Execute.index(), StepStatus::Active));
        assert_eq!(tracker.completed_prefix(), Phase::Execute.index());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut tracker = ProgressTracker::new();
        assert!(!tracker.advance(Phase::ALL.len(), StepStatus::Active));
        assert_eq!(tracker.completed_prefix(), 0);
    }

    #[test]
    fn done_route_completes_every_step() {
        let mut tracker = ProgressTracker::new();
        let done = route(EventKind::Done).expect("done is routed");
        assert!(tracker.apply(done));
        assert!(tracker.is_complete());
        assert!(!tracker.apply(route(EventKind::ToolCall).expect("tool_call is routed")));
    }

    #[test]
    fn furthest_completed_never_decreases_over_event_sequences() {
        let kinds = [
            EventKind::Connected,
            EventKind::ModelInfo,
            EventKind::ToolCall,
            EventKind::Reasoning,
            EventKind::ToolOutput,
            EventKind::Planning,
            EventKind::ToolCall,
            EventKind::FinalAnswer,
            EventKind::Reasoning,
            EventKind::Done,
        ];

        let mut tracker = ProgressTracker::new();
        let mut furthest = tracker.completed_prefix();
        for kind in kinds {
            if let Some(route) = route(kind) {
                tracker.apply(route);
            }
            let now = tracker.completed_prefix();
            assert!(now >= furthest, "{kind:?} moved progress backwards");
            furthest = now;
        }
        assert!(tracker.is_complete());
    }

    #[test]
    fn labels_follow_table_order() {
        let labels: Vec<_> = ProgressTracker::new()
            .steps()
            .iter()
            .map(|step| step.label)
            .collect();
        assert_eq!(
            labels,
            vec!["connect", "retrieve", "start-agent", "reason", "plan", "execute", "observe", "complete"]
        );
    }
}
