use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator of a decoded stream event, with wire aliases folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ModelInfo,
    Connected,
    Reasoning,
    Planning,
    ToolCall,
    ToolOutput,
    AiMessage,
    FinalAnswer,
    Visualization,
    FileOperation,
    Warning,
    MixedContent,
    Done,
    Error,
    Ping,
    Unknown,
}

impl EventKind {
    /// Maps a wire `type` value to a kind. Returns `None` for unrecognized values.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "model_info" => Self::ModelInfo,
            "connected" => Self::Connected,
            "reasoning" => Self::Reasoning,
            "planning" => Self::Planning,
            "tool_call" => Self::ToolCall,
            "tool_output" | "observation" => Self::ToolOutput,
            "ai_message" | "message" => Self::AiMessage,
            "final_answer" => Self::FinalAnswer,
            "visualization" | "image" => Self::Visualization,
            "file_operation" => Self::FileOperation,
            "warning" => Self::Warning,
            "mixed_content" => Self::MixedContent,
            "done" => Self::Done,
            "error" => Self::Error,
            "ping" => Self::Ping,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelInfo => "model_info",
            Self::Connected => "connected",
            Self::Reasoning => "reasoning",
            Self::Planning => "planning",
            Self::ToolCall => "tool_call",
            Self::ToolOutput => "tool_output",
            Self::AiMessage => "ai_message",
            Self::FinalAnswer => "final_answer",
            Self::Visualization => "visualization",
            Self::FileOperation => "file_operation",
            Self::Warning => "warning",
            Self::MixedContent => "mixed_content",
            Self::Done => "done",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }
}

/// One checklist step announced by a `planning` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub text: String,
    /// Completion hint carried by the source step (`status`, `completed`, `is_completed`).
    pub completed: bool,
}

impl PlanStep {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }
}

/// Image carried by a `visualization` event: a URL, path, or `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Kind-specific fields of a decoded event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ModelInfo {
        model: Option<String>,
        requested: Option<String>,
    },
    Connected {
        message: Option<String>,
        session_id: Option<String>,
    },
    Reasoning {
        content: String,
    },
    Planning {
        steps: Vec<PlanStep>,
    },
    ToolCall {
        code: String,
        tool_name: Option<String>,
        tool_id: Option<String>,
        language: Option<String>,
    },
    ToolOutput {
        content: String,
        has_errors: bool,
    },
    AiMessage {
        content: String,
    },
    FinalAnswer {
        content: String,
    },
    Visualization {
        images: Vec<ImageRef>,
        caption: Option<String>,
    },
    FileOperation {
        operation: String,
        filename: String,
        file_path: Option<String>,
        image_url: Option<String>,
        is_image: bool,
    },
    Warning {
        content: String,
    },
    /// Several events delivered in one frame, dispatched in order.
    MixedContent {
        events: Vec<Event>,
    },
    Done {
        total_steps: Option<u64>,
    },
    Error {
        message: String,
    },
    Ping,
    /// Well-formed frame with an unrecognized `type`; the raw object lives in
    /// `metadata.original`.
    Unknown {
        event_type: String,
    },
}

/// A decoded stream event. Consumed once by dispatch and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            metadata: Map::new(),
            timestamp: None,
        }
    }

    /// Degraded event for a frame that is not a JSON object: the raw text
    /// becomes `ai_message` content verbatim.
    pub fn degraded(raw: &str) -> Self {
        Self::new(EventPayload::AiMessage {
            content: raw.to_owned(),
        })
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::ModelInfo { .. } => EventKind::ModelInfo,
            EventPayload::Connected { .. } => EventKind::Connected,
            EventPayload::Reasoning { .. } => EventKind::Reasoning,
            EventPayload::Planning { .. } => EventKind::Planning,
            EventPayload::ToolCall { .. } => EventKind::ToolCall,
            EventPayload::ToolOutput { .. } => EventKind::ToolOutput,
            EventPayload::AiMessage { .. } => EventKind::AiMessage,
            EventPayload::FinalAnswer { .. } => EventKind::FinalAnswer,
            EventPayload::Visualization { .. } => EventKind::Visualization,
            EventPayload::FileOperation { .. } => EventKind::FileOperation,
            EventPayload::Warning { .. } => EventKind::Warning,
            EventPayload::MixedContent { .. } => EventKind::MixedContent,
            EventPayload::Done { .. } => EventKind::Done,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::Ping => EventKind::Ping,
            EventPayload::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Primary text of the event, when the kind carries one.
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Reasoning { content }
            | EventPayload::ToolOutput { content, .. }
            | EventPayload::AiMessage { content }
            | EventPayload::FinalAnswer { content }
            | EventPayload::Warning { content } => Some(content),
            EventPayload::ToolCall { code, .. } => Some(code),
            EventPayload::Error { message } => Some(message),
            _ => None,
        }
    }

    /// True for kinds that end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), EventKind::Done | EventKind::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, EventKind, EventPayload};

    #[test]
    fn aliases_fold_into_canonical_kinds() {
        assert_eq!(EventKind::parse("observation"), Some(EventKind::ToolOutput));
        assert_eq!(EventKind::parse("message"), Some(EventKind::AiMessage));
        assert_eq!(EventKind::parse("image"), Some(EventKind::Visualization));
        assert_eq!(EventKind::parse("tool_output"), Some(EventKind::ToolOutput));
        assert_eq!(EventKind::parse("response.delta"), None);
    }

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in [
            EventKind::ModelInfo,
            EventKind::Reasoning,
            EventKind::Planning,
            EventKind::ToolCall,
            EventKind::FinalAnswer,
            EventKind::Done,
            EventKind::Ping,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse(EventKind::Unknown.as_str()), None);
    }

    #[test]
    fn serialized_event_carries_kind_tag() {
        let event = Event::new(EventPayload::FinalAnswer {
            content: "answer".to_owned(),
        })
        .with_timestamp("2026-01-01T00:00:00Z");
        let json = serde_json::to_value(&event).expect("event serializes");

        assert_eq!(json["kind"], "final_answer");
        assert_eq!(json["content"], "answer");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00Z");
        assert!(json.get("metadata").is_none());
    }
}
