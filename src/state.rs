//! Synchronous dispatch engine behind [`crate::SessionController`].
//!
//! Every event runs to completion against one `SessionState` before the next
//! is looked at. Phase changes go only through [`progress::route`]; everything
//! else a kind does lives in the handler returned by [`handler_for`].

use std::sync::Arc;

use agent_stream::{Event, EventKind, EventPayload};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::exec_log::{EntryType, ExecutionLog, ExecutionLogEntry};
use crate::progress::{self, ProgressTracker, OPENED_ROUTE, SUBMITTED_ROUTE};
use crate::session::{ArtifactKind, Session, SessionSnapshot, SessionStatus};
use crate::solution::{SolutionArtifact, SolutionExtractor};
use crate::tasks::TaskListManager;

/// How a session reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Done,
    Cancelled,
    TransportFailed(String),
    ServerError(String),
    /// The body ended before a `done` event.
    StreamEnded,
}

/// Externally visible effects of one dispatch step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub solution: Option<SolutionArtifact>,
    pub finished: bool,
    terminal: Option<Termination>,
}

type Handler = fn(&mut SessionState, &Event, &mut DispatchOutcome);

pub struct SessionState {
    session: Session,
    progress: ProgressTracker,
    tasks: TaskListManager,
    log: ExecutionLog,
    extractor: SolutionExtractor,
    clock: Arc<dyn Clock>,
    observed_outputs: usize,
    events_seen: usize,
}

impl SessionState {
    pub fn new(
        id: impl Into<String>,
        model_selector: impl Into<String>,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = Session::new(id, model_selector, clock.now());
        let mut progress = ProgressTracker::new();
        progress.apply(SUBMITTED_ROUTE);
        info!(session_id = %session.id, model = %session.model_selector, "session started");

        Self {
            session,
            progress,
            tasks: TaskListManager::new(),
            log: ExecutionLog::new(),
            extractor: SolutionExtractor::new(config.delimiters.clone()),
            clock,
            observed_outputs: 0,
            events_seen: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn tasks(&self) -> &TaskListManager {
        &self.tasks
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }

    pub fn is_finished(&self) -> bool {
        self.session.status.is_terminal()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            steps: self.progress.steps().to_vec(),
            todos: self.tasks.items().to_vec(),
            log: self.log.entries().to_vec(),
        }
    }

    /// The server accepted the request and the body is streaming.
    pub fn mark_opened(&mut self) {
        if self.session.status == SessionStatus::Connecting {
            self.session.status = SessionStatus::Streaming;
            self.progress.apply(OPENED_ROUTE);
            debug!(session_id = %self.session.id, "stream opened");
        }
    }

    /// Apply one event. `done` and `error` events finish the session.
    pub fn dispatch(&mut self, event: &Event) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        self.dispatch_into(event, &mut outcome);

        if let Some(termination) = outcome.terminal.take() {
            if let Some(solution) = self.finish(termination) {
                outcome.solution = Some(solution);
            }
            outcome.finished = true;
        }
        outcome
    }

    fn dispatch_into(&mut self, event: &Event, outcome: &mut DispatchOutcome) {
        if self.is_finished() || outcome.terminal.is_some() {
            debug!(session_id = %self.session.id, kind = event.kind().as_str(), "event after terminal state ignored");
            return;
        }
        if self.session.status == SessionStatus::Connecting {
            self.session.status = SessionStatus::Streaming;
        }
        self.events_seen += 1;

        let kind = event.kind();
        if let Some(route) = progress::route(kind) {
            self.progress.apply(route);
        }
        handler_for(kind)(self, event, outcome);
    }

    /// Move to a terminal status and close out the session. Runs at most once;
    /// returns a solution recovered by the full-text rescan, if any.
    pub fn finish(&mut self, termination: Termination) -> Option<SolutionArtifact> {
        if self.is_finished() {
            return None;
        }

        let mut surfaced = None;
        match &termination {
            Termination::Done => {
                surfaced = self.rescan(false);
                self.session.status = SessionStatus::Completed;
                if self.session.solution.is_some() {
                    self.tasks.mark_all_complete();
                }
            }
            Termination::Cancelled => {
                surfaced = self.rescan(true);
                self.session.status = SessionStatus::Cancelled;
                self.session.reason = Some("cancelled by user".to_owned());
            }
            Termination::TransportFailed(reason) | Termination::ServerError(reason) => {
                self.fail(reason.clone());
            }
            Termination::StreamEnded => {
                self.fail("stream ended before completion".to_owned());
            }
        }

        let closed = self.log.finalize();
        self.session.ended_at = Some(self.clock.now());
        info!(
            session_id = %self.session.id,
            status = ?self.session.status,
            closed_entries = closed,
            solution = self.session.solution.is_some(),
            "session finished"
        );
        surfaced
    }

    fn fail(&mut self, reason: String) {
        warn!(session_id = %self.session.id, %reason, "session errored");
        self.session.status = SessionStatus::Errored;
        let entry = ExecutionLogEntry::new(EntryType::Error, reason.clone(), self.clock.now());
        self.log.append(entry);
        self.session.reason = Some(reason);
    }

    fn rescan(&mut self, recovered: bool) -> Option<SolutionArtifact> {
        let found = self
            .extractor
            .detect_in_full_text(&self.session.chunks, recovered)?;
        self.session.solution = Some(found.clone());
        Some(found)
    }

    fn surface(&mut self, found: Option<SolutionArtifact>, outcome: &mut DispatchOutcome) {
        if let Some(found) = found {
            self.session.solution = Some(found.clone());
            self.tasks.mark_all_complete();
            outcome.solution = Some(found);
        }
    }

    fn entry(&self, entry_type: EntryType, content: impl Into<String>, event: &Event) -> ExecutionLogEntry {
        let timestamp = event
            .timestamp
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
            .unwrap_or_else(|| self.clock.now());
        ExecutionLogEntry::new(entry_type, content, timestamp).with_metadata(event.metadata.clone())
    }
}

/// Static kind-to-handler table.
fn handler_for(kind: EventKind) -> Handler {
    match kind {
        EventKind::ModelInfo => on_model_info,
        EventKind::Connected => on_connected,
        EventKind::Reasoning => on_reasoning,
        EventKind::Planning => on_planning,
        EventKind::ToolCall => on_tool_call,
        EventKind::ToolOutput => on_tool_output,
        EventKind::AiMessage => on_ai_message,
        EventKind::FinalAnswer => on_final_answer,
        EventKind::Visualization => on_visualization,
        EventKind::FileOperation => on_file_operation,
        EventKind::Warning => on_warning,
        EventKind::MixedContent => on_mixed_content,
        EventKind::Done => on_done,
        EventKind::Error => on_error,
        EventKind::Ping => on_ping,
        EventKind::Unknown => on_unknown,
    }
}

fn on_model_info(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::ModelInfo { model, requested } = &event.payload else {
        return;
    };
    if let Some(model) = model {
        state.session.resolved_model = Some(model.clone());
    }
    let content = match (model, requested) {
        (Some(model), Some(requested)) if model != requested => {
            format!("Using {model} (requested {requested})")
        }
        (Some(model), _) => format!("Using {model}"),
        (None, _) => "Model selected".to_owned(),
    };
    let entry = state.entry(EntryType::ModelInfo, content, event);
    state.log.append(entry);
}

fn on_connected(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    if let EventPayload::Connected { message, .. } = &event.payload {
        debug!(session_id = %state.session.id, message = message.as_deref().unwrap_or(""), "server connected");
    }
}

fn on_reasoning(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let content = event.content().unwrap_or_default();
    let entry = state.entry(EntryType::Reasoning, content, event);
    state.log.append(entry);
}

fn on_planning(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::Planning { steps } = &event.payload else {
        return;
    };
    state.tasks.set_from_plan(steps);
    state.tasks.mark_progress(state.observed_outputs);
    if state.session.solution.is_some() {
        state.tasks.mark_all_complete();
    }

    let content = steps
        .iter()
        .enumerate()
        .map(|(index, step)| format!("{}. {}", index + 1, step.text))
        .collect::<Vec<_>>()
        .join("\n");
    let mut entry = state.entry(EntryType::Planning, content, event);
    entry.metadata.insert("step_count".to_owned(), json!(steps.len()));
    state.log.append(entry);
}

fn on_tool_call(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::ToolCall {
        code,
        tool_name,
        tool_id,
        language,
    } = &event.payload
    else {
        return;
    };
    let mut entry = state.entry(EntryType::ToolCall, code.clone(), event);
    for (key, value) in [("tool_name", tool_name), ("tool_id", tool_id), ("language", language)] {
        if let Some(value) = value {
            entry.metadata.insert(key.to_owned(), Value::String(value.clone()));
        }
    }
    let sequence = state.log.append(entry);
    debug!(session_id = %state.session.id, sequence, "tool call started");
}

fn on_tool_output(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::ToolOutput { content, has_errors } = &event.payload else {
        return;
    };
    let mut entry = state.entry(EntryType::ToolOutput, content.clone(), event);
    if *has_errors {
        entry.metadata.insert("has_errors".to_owned(), Value::Bool(true));
    }
    state.log.append(entry);

    state.observed_outputs += 1;
    state.tasks.mark_progress(state.observed_outputs);
}

fn on_ai_message(state: &mut SessionState, event: &Event, outcome: &mut DispatchOutcome) {
    let content = event.content().unwrap_or_default().to_owned();
    let entry = state.entry(EntryType::AiMessage, content.clone(), event);
    state.log.append(entry);

    let found = state.extractor.detect_in_chunk(&content);
    state.session.chunks.push(content);
    state.surface(found, outcome);
}

fn on_final_answer(state: &mut SessionState, event: &Event, outcome: &mut DispatchOutcome) {
    let content = event.content().unwrap_or_default().to_owned();
    let entry = state.entry(EntryType::FinalAnswer, content.clone(), event);
    state.log.append(entry);

    let found = state.extractor.detect_final_answer(&content);
    state.session.chunks.push(content);
    state.tasks.mark_all_complete();
    state.surface(found, outcome);
}

fn on_visualization(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::Visualization { images, caption } = &event.payload else {
        return;
    };
    let artifacts: Vec<String> = images
        .iter()
        .map(|image| {
            let caption = image.caption.clone().or_else(|| caption.clone());
            state
                .session
                .push_artifact(ArtifactKind::Image, image.source.clone(), caption, None)
        })
        .collect();

    let content = caption
        .clone()
        .unwrap_or_else(|| format!("{} image(s)", artifacts.len()));
    let entry = state
        .entry(EntryType::Visualization, content, event)
        .with_artifacts(artifacts);
    state.log.append(entry);
}

fn on_file_operation(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::FileOperation {
        operation,
        filename,
        file_path,
        image_url,
        is_image,
    } = &event.payload
    else {
        return;
    };

    let (kind, source) = match (is_image, image_url, file_path) {
        (true, Some(url), _) => (ArtifactKind::Image, Some(url.clone())),
        (true, None, Some(path)) => (ArtifactKind::Image, Some(path.clone())),
        (false, _, Some(path)) => (ArtifactKind::File, Some(path.clone())),
        (_, Some(url), None) => (ArtifactKind::File, Some(url.clone())),
        _ => (ArtifactKind::File, None),
    };
    let artifacts = source
        .map(|source| {
            vec![state
                .session
                .push_artifact(kind, source, None, Some(filename.clone()))]
        })
        .unwrap_or_default();

    let entry = state
        .entry(EntryType::FileOperation, format!("{operation} {filename}"), event)
        .with_artifacts(artifacts);
    state.log.append(entry);
}

fn on_warning(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let content = event.content().unwrap_or_default();
    warn!(session_id = %state.session.id, %content, "server warning");
    let entry = state.entry(EntryType::Warning, content, event);
    state.log.append(entry);
}

fn on_mixed_content(state: &mut SessionState, event: &Event, outcome: &mut DispatchOutcome) {
    let EventPayload::MixedContent { events } = &event.payload else {
        return;
    };
    for nested in events {
        state.dispatch_into(nested, outcome);
    }
}

fn on_done(state: &mut SessionState, event: &Event, outcome: &mut DispatchOutcome) {
    if let EventPayload::Done { total_steps } = &event.payload {
        state.session.total_steps = *total_steps;
    }
    outcome.terminal = Some(Termination::Done);
}

fn on_error(_: &mut SessionState, event: &Event, outcome: &mut DispatchOutcome) {
    let message = event.content().unwrap_or("server error").to_owned();
    outcome.terminal = Some(Termination::ServerError(message));
}

fn on_ping(_: &mut SessionState, _: &Event, _: &mut DispatchOutcome) {}

fn on_unknown(state: &mut SessionState, event: &Event, _: &mut DispatchOutcome) {
    let EventPayload::Unknown { event_type } = &event.payload else {
        return;
    };
    debug!(session_id = %state.session.id, event_type = %event_type, "unknown event kind");
    let entry = state.entry(EntryType::Unknown, event_type.clone(), event);
    state.log.append(entry);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_stream::decode;
    use pretty_assertions::assert_eq;
    use time::OffsetDateTime;

    use super::{SessionState, Termination};
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::exec_log::{EntryStatus, EntryType};
    use crate::progress::{Phase, StepStatus};
    use crate::session::{ArtifactKind, SessionStatus};

    fn state() -> SessionState {
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        SessionState::new("s-1", "GPT4.1", &SessionConfig::default(), clock)
    }

    fn feed(state: &mut SessionState, frames: &[&str]) {
        for frame in frames {
            state.dispatch(&decode(frame));
        }
    }

    #[test]
    fn first_event_moves_to_streaming() {
        let mut state = state();
        assert_eq!(state.session().status, SessionStatus::Connecting);
        feed(&mut state, &["oops{"]);
        assert_eq!(state.session().status, SessionStatus::Streaming);
        assert_eq!(state.log().entries()[0].content, "oops{");
    }

    #[test]
    fn tool_outputs_drive_task_progress() {
        let mut state = state();
        feed(
            &mut state,
            &[
                r#"{"type":"planning","steps":[{"text":"a"},{"text":"b"},{"text":"c"}]}"#,
                r#"{"type":"tool_call","code":"x=1"}"#,
                r#"{"type":"tool_output","content":"ok"}"#,
                r#"{"type":"tool_call","code":"y=2"}"#,
                r#"{"type":"observation","output":"ok"}"#,
                r#"{"type":"tool_call","code":"z=3"}"#,
                r#"{"type":"tool_output","content":"ok"}"#,
            ],
        );
        let completed: Vec<_> = state.tasks().items().iter().map(|i| i.completed).collect();
        assert_eq!(completed, vec![true, true, false]);
        assert_eq!(state.progress().steps()[Phase::Observe.index()].status, StepStatus::Active);
    }

    #[test]
    fn final_answer_completes_every_task() {
        let mut state = state();
        feed(
            &mut state,
            &[
                r#"{"type":"planning","steps":["a","b"]}"#,
                r#"{"type":"final_answer","content":"<solution>Mix A with B.</solution>"}"#,
            ],
        );
        assert_eq!(state.tasks().completed_count(), 2);
        assert_eq!(state.progress().steps()[Phase::Complete.index()].status, StepStatus::Active);
    }

    #[test]
    fn stray_closing_tag_in_final_answer_waits_for_rescan() {
        let mut state = state();
        let outcome = state.dispatch(&decode(r#"{"type":"final_answer","content":"done</solution>"}"#));
        assert_eq!(outcome.solution, None);
        assert_eq!(state.session().solution, None);

        state.dispatch(&decode(r#"{"type":"done"}"#));
        assert_eq!(state.session().status, SessionStatus::Completed);
        assert_eq!(state.session().solution, None);
    }

    #[test]
    fn server_error_is_terminal_with_one_error_entry() {
        let mut state = state();
        feed(
            &mut state,
            &[
                r#"{"type":"tool_call","code":"x"}"#,
                r#"{"type":"error","error":"agent crashed"}"#,
                r#"{"type":"error","error":"again"}"#,
            ],
        );
        assert_eq!(state.session().status, SessionStatus::Errored);
        assert_eq!(state.session().reason.as_deref(), Some("agent crashed"));
        assert_eq!(state.log().count_of(EntryType::Error), 1);
        assert_eq!(state.log().entries()[0].status, Some(EntryStatus::Completed));
        assert!(state.session().ended_at.is_some());
    }

    #[test]
    fn finish_runs_once() {
        let mut state = state();
        state.finish(Termination::TransportFailed("reset".to_owned()));
        state.finish(Termination::TransportFailed("reset".to_owned()));
        state.finish(Termination::Done);
        assert_eq!(state.session().status, SessionStatus::Errored);
        assert_eq!(state.log().count_of(EntryType::Error), 1);
    }

    #[test]
    fn mixed_content_dispatches_nested_events_in_order() {
        let mut state = state();
        let outcome = state.dispatch(&decode(
            r#"{"type":"mixed_content","events":[
                {"type":"ai_message","content":"<solution>nested</solution>"},
                {"type":"done","total_steps":4}
            ]}"#,
        ));
        assert!(outcome.finished);
        assert_eq!(outcome.solution.map(|s| s.text), Some("nested".to_owned()));
        assert_eq!(state.session().status, SessionStatus::Completed);
        assert_eq!(state.session().total_steps, Some(4));
    }

    #[test]
    fn visual_and_file_artifacts_get_sequential_ids() {
        let mut state = state();
        feed(
            &mut state,
            &[
                r#"{"type":"image","image_url":"http://host/plot.png","caption":"plot"}"#,
                r#"{"type":"file_operation","operation":"create","filename":"out.csv","file_path":"/tmp/out.csv"}"#,
            ],
        );
        let artifacts = &state.session().artifacts;
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].id, "artifact-1");
        assert_eq!(artifacts[0].kind, ArtifactKind::Image);
        assert_eq!(artifacts[0].caption.as_deref(), Some("plot"));
        assert_eq!(artifacts[1].id, "artifact-2");
        assert_eq!(artifacts[1].kind, ArtifactKind::File);
        assert_eq!(state.log().entries()[0].artifacts, vec!["artifact-1".to_owned()]);
    }

    #[test]
    fn model_info_records_resolved_model() {
        let mut state = state();
        feed(&mut state, &[r#"{"type":"model_info","model":"gpt-4.1","requested":"GPT4.1"}"#]);
        assert_eq!(state.session().resolved_model.as_deref(), Some("gpt-4.1"));
        assert_eq!(state.log().entries()[0].content, "Using gpt-4.1 (requested GPT4.1)");
    }

    #[test]
    fn event_timestamp_is_used_for_log_entry() {
        let mut state = state();
        feed(
            &mut state,
            &[r#"{"type":"reasoning","content":"hm","timestamp":"2026-03-01T12:00:00Z"}"#],
        );
        assert_eq!(state.log().entries()[0].timestamp.year(), 2026);
    }

    #[test]
    fn unknown_kind_is_logged_and_keeps_streaming() {
        let mut state = state();
        feed(&mut state, &[r#"{"type":"telemetry","cpu":0.5}"#]);
        let entry = &state.log().entries()[0];
        assert_eq!(entry.entry_type, EntryType::Unknown);
        assert_eq!(entry.content, "telemetry");
        assert!(entry.metadata.contains_key("original"));
        assert_eq!(state.session().status, SessionStatus::Streaming);
    }
}
