//! The session record and its serializable snapshot.

use serde::Serialize;
use time::OffsetDateTime;

use crate::exec_log::ExecutionLogEntry;
use crate::progress::StatusStep;
use crate::solution::SolutionArtifact;
use crate::tasks::TodoItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    File,
}

/// Image or file produced by the agent. `source` is a URL, path or `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub id: String,
    pub kind: ArtifactKind,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub model_selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_model: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    /// `ai_message` and `final_answer` contents in arrival order.
    pub chunks: Vec<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub solution: Option<SolutionArtifact>,
    /// Why the session ended, for errored and cancelled sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u64>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        model_selector: impl Into<String>,
        started_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Connecting,
            model_selector: model_selector.into(),
            resolved_model: None,
            started_at,
            ended_at: None,
            chunks: Vec::new(),
            artifacts: Vec::new(),
            solution: None,
            reason: None,
            total_steps: None,
        }
    }

    /// Record an artifact and return its id. Ids are sequential per session.
    pub fn push_artifact(
        &mut self,
        kind: ArtifactKind,
        source: impl Into<String>,
        caption: Option<String>,
        name: Option<String>,
    ) -> String {
        let id = format!("artifact-{}", self.artifacts.len() + 1);
        self.artifacts.push(ArtifactRef {
            id: id.clone(),
            kind,
            source: source.into(),
            caption,
            name,
        });
        id
    }
}

/// Everything a renderer or persistence layer needs, already sanitized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub steps: Vec<StatusStep>,
    pub todos: Vec<TodoItem>,
    pub log: Vec<ExecutionLogEntry>,
}

impl SessionSnapshot {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
