use serde_json::{Map, Value};

use crate::events::{Event, EventKind, EventPayload, ImageRef, PlanStep};

const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".svg"];

/// Decode one frame into an [`Event`].
///
/// Never fails: a frame that is not a JSON object degrades to an `ai_message`
/// carrying the raw text, and an unrecognized `type` becomes
/// [`EventPayload::Unknown`] with the original object under `metadata.original`.
pub fn decode(raw: &str) -> Event {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => decode_object(object),
        _ => Event::degraded(raw),
    }
}

fn decode_object(object: Map<String, Value>) -> Event {
    let event_type = str_field(&object, &["type", "event"]).unwrap_or_default();
    let timestamp = str_field(&object, &["timestamp"]);
    let mut metadata = match object.get("metadata") {
        Some(Value::Object(metadata)) => metadata.clone(),
        _ => Map::new(),
    };

    let payload = match EventKind::parse(&event_type) {
        Some(kind) => {
            let payload = payload_for(kind, &object);
            let consumed = payload_keys(kind);
            for (key, value) in &object {
                if ENVELOPE_KEYS.contains(&key.as_str()) || consumed.contains(&key.as_str()) {
                    continue;
                }
                metadata.entry(key.clone()).or_insert_with(|| value.clone());
            }
            payload
        }
        None => {
            metadata.insert("original".to_owned(), Value::Object(object));
            EventPayload::Unknown { event_type }
        }
    };

    let mut event = Event::new(payload).with_metadata(metadata);
    event.timestamp = timestamp;
    event
}

const ENVELOPE_KEYS: [&str; 4] = ["type", "event", "timestamp", "metadata"];

/// Top-level keys each kind reads into its payload. Anything else is kept in
/// `metadata`; an explicit nested `metadata` entry wins on collision.
fn payload_keys(kind: EventKind) -> &'static [&'static str] {
    match kind {
        EventKind::ModelInfo => &["model", "requested"],
        EventKind::Connected => &["message", "session_id"],
        EventKind::Reasoning => &["content", "reasoning"],
        EventKind::Planning => &["steps"],
        EventKind::ToolCall => &["code", "content", "tool_name", "tool_id", "language"],
        EventKind::ToolOutput => &["content", "output", "has_errors"],
        EventKind::AiMessage | EventKind::FinalAnswer => &["content"],
        EventKind::Visualization => &["image", "image_url", "image_data", "images", "content", "caption"],
        EventKind::FileOperation => &[
            "operation",
            "filename",
            "file_name",
            "file_path",
            "image_url",
            "is_image",
        ],
        EventKind::Warning => &["content", "message"],
        EventKind::MixedContent => &["events"],
        EventKind::Done => &["total_steps"],
        EventKind::Error => &["content", "error", "message"],
        EventKind::Ping | EventKind::Unknown => &[],
    }
}

fn payload_for(kind: EventKind, object: &Map<String, Value>) -> EventPayload {
    match kind {
        EventKind::ModelInfo => EventPayload::ModelInfo {
            model: str_field(object, &["model"]),
            requested: str_field(object, &["requested"]),
        },
        EventKind::Connected => EventPayload::Connected {
            message: str_field(object, &["message"]),
            session_id: str_field(object, &["session_id"]),
        },
        EventKind::Reasoning => EventPayload::Reasoning {
            content: text_field(object, &["content", "reasoning"]).unwrap_or_default(),
        },
        EventKind::Planning => EventPayload::Planning {
            steps: plan_steps(object.get("steps")),
        },
        EventKind::ToolCall => EventPayload::ToolCall {
            code: text_field(object, &["code", "content"]).unwrap_or_default(),
            tool_name: str_field(object, &["tool_name"]),
            tool_id: str_field(object, &["tool_id"]),
            language: str_field(object, &["language"]),
        },
        EventKind::ToolOutput => EventPayload::ToolOutput {
            content: text_field(object, &["content", "output"]).unwrap_or_default(),
            has_errors: bool_field(object, &["has_errors"]).unwrap_or(false),
        },
        EventKind::AiMessage => EventPayload::AiMessage {
            content: text_field(object, &["content"]).unwrap_or_default(),
        },
        EventKind::FinalAnswer => EventPayload::FinalAnswer {
            content: text_field(object, &["content"]).unwrap_or_default(),
        },
        EventKind::Visualization => EventPayload::Visualization {
            images: images(object),
            caption: str_field(object, &["caption"]),
        },
        EventKind::FileOperation => file_operation(object),
        EventKind::Warning => EventPayload::Warning {
            content: text_field(object, &["content", "message"]).unwrap_or_default(),
        },
        EventKind::MixedContent => EventPayload::MixedContent {
            events: object
                .get("events")
                .and_then(Value::as_array)
                .map(|events| {
                    events
                        .iter()
                        .map(|event| match event {
                            Value::Object(nested) => decode_object(nested.clone()),
                            other => Event::degraded(&value_text(other)),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        },
        EventKind::Done => EventPayload::Done {
            total_steps: object.get("total_steps").and_then(Value::as_u64),
        },
        EventKind::Error => EventPayload::Error {
            message: text_field(object, &["content", "error", "message"])
                .unwrap_or_else(|| "unknown error".to_owned()),
        },
        EventKind::Ping => EventPayload::Ping,
        EventKind::Unknown => EventPayload::Unknown {
            event_type: EventKind::Unknown.as_str().to_owned(),
        },
    }
}

fn plan_steps(steps: Option<&Value>) -> Vec<PlanStep> {
    let Some(steps) = steps.and_then(Value::as_array) else {
        return Vec::new();
    };

    steps
        .iter()
        .filter_map(|step| match step {
            Value::String(text) => Some(PlanStep::new(text.clone())),
            Value::Object(step) => {
                let text = str_field(step, &["text", "step", "description"])?;
                Some(PlanStep {
                    text,
                    completed: step_completed(step),
                })
            }
            _ => None,
        })
        .collect()
}

fn step_completed(step: &Map<String, Value>) -> bool {
    if let Some(completed) = bool_field(step, &["completed", "is_completed"]) {
        return completed;
    }
    str_field(step, &["status"]).is_some_and(|status| {
        matches!(
            status.to_ascii_lowercase().as_str(),
            "completed" | "complete" | "done"
        )
    })
}

fn images(object: &Map<String, Value>) -> Vec<ImageRef> {
    let mut images = Vec::new();

    for key in ["image", "image_url", "image_data"] {
        if let Some(source) = str_field(object, &[key]) {
            images.push(ImageRef {
                source,
                caption: None,
            });
        }
    }

    for key in ["images", "content"] {
        let Some(entries) = object.get(key).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let image = match entry {
                Value::String(source) => Some(ImageRef {
                    source: source.clone(),
                    caption: None,
                }),
                Value::Object(entry) => {
                    str_field(entry, &["data", "url", "image_url", "path"]).map(|source| ImageRef {
                        source,
                        caption: str_field(entry, &["description", "caption"]),
                    })
                }
                _ => None,
            };
            if let Some(image) = image {
                if !images.iter().any(|seen| seen.source == image.source) {
                    images.push(image);
                }
            }
        }
    }

    images
}

fn file_operation(object: &Map<String, Value>) -> EventPayload {
    let filename = str_field(object, &["filename", "file_name"]).unwrap_or_default();
    let image_url = str_field(object, &["image_url"]).or_else(|| {
        object
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|metadata| str_field(metadata, &["image_url"]))
    });
    let is_image = bool_field(object, &["is_image"]).unwrap_or_else(|| {
        let lower = filename.to_ascii_lowercase();
        IMAGE_EXTENSIONS
            .iter()
            .any(|extension| lower.ends_with(extension))
    });

    EventPayload::FileOperation {
        operation: str_field(object, &["operation"]).unwrap_or_else(|| "unknown".to_owned()),
        filename,
        file_path: str_field(object, &["file_path"]),
        image_url,
        is_image,
    }
}

fn str_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| value.as_str())
        .map(ToString::to_string)
}

/// Like [`str_field`], but stringifies non-string payloads instead of skipping them.
fn text_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
        .map(value_text)
}

fn bool_field(object: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_bool)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
