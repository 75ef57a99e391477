//! Append-only execution log with tool-call/output pairing.

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    ModelInfo,
    Reasoning,
    Planning,
    ToolCall,
    ToolOutput,
    AiMessage,
    FinalAnswer,
    Visualization,
    FileOperation,
    Warning,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionLogEntry {
    /// Assigned by [`ExecutionLog::append`]; strictly increasing.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Artifact ids produced alongside this entry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Sequence of the `tool_call` an output closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_with: Option<u64>,
    pub expanded: bool,
}

impl ExecutionLogEntry {
    pub fn new(entry_type: EntryType, content: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            sequence: 0,
            entry_type,
            content: content.into(),
            timestamp,
            status: None,
            metadata: Map::new(),
            artifacts: Vec::new(),
            paired_with: None,
            expanded: false,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == Some(EntryStatus::Active)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Vec<ExecutionLogEntry>,
    next_sequence: u64,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sequence: u64) -> Option<&ExecutionLogEntry> {
        self.entries.iter().find(|entry| entry.sequence == sequence)
    }

    /// Append `entry` and return its sequence number.
    ///
    /// A `tool_call` starts active. A `tool_output` closes the most recent
    /// active `tool_call`, if any; an unmatched output is appended as-is.
    pub fn append(&mut self, mut entry: ExecutionLogEntry) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        entry.sequence = sequence;

        match entry.entry_type {
            EntryType::ToolCall if entry.status.is_none() => {
                entry.status = Some(EntryStatus::Active);
            }
            EntryType::ToolOutput => {
                if let Some(call) = self
                    .entries
                    .iter_mut()
                    .rev()
                    .find(|candidate| candidate.entry_type == EntryType::ToolCall && candidate.is_active())
                {
                    call.status = Some(EntryStatus::Completed);
                    entry.paired_with = Some(call.sequence);
                } else {
                    debug!(sequence, "tool output without an active tool call");
                }
            }
            _ => {}
        }

        self.entries.push(entry);
        sequence
    }

    /// Close every remaining active entry. Returns how many were closed.
    pub fn finalize(&mut self) -> usize {
        let mut closed = 0;
        for entry in self.entries.iter_mut().filter(|entry| entry.is_active()) {
            entry.status = Some(EntryStatus::Completed);
            closed += 1;
        }
        closed
    }

    /// Toggle the display-only expansion flag. Returns `false` for an unknown sequence.
    pub fn set_expanded(&mut self, sequence: u64, expanded: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.sequence == sequence) {
            Some(entry) => {
                entry.expanded = expanded;
                true
            }
            None => false,
        }
    }

    pub fn count_of(&self, entry_type: EntryType) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.entry_type == entry_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::OffsetDateTime;

    use super::{EntryStatus, EntryType, ExecutionLog, ExecutionLogEntry};

    fn entry(entry_type: EntryType, content: &str) -> ExecutionLogEntry {
        ExecutionLogEntry::new(entry_type, content, OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn output_closes_latest_active_call() {
        let mut log = ExecutionLog::new();
        let first = log.append(entry(EntryType::ToolCall, "x = 1"));
        let second = log.append(entry(EntryType::ToolCall, "y = 2"));
        let output = log.append(entry(EntryType::ToolOutput, "ok"));

        assert_eq!(log.get(second).and_then(|e| e.status), Some(EntryStatus::Completed));
        assert_eq!(log.get(first).and_then(|e| e.status), Some(EntryStatus::Active));
        assert_eq!(log.get(output).and_then(|e| e.paired_with), Some(second));

        let next = log.append(entry(EntryType::ToolOutput, "done"));
        assert_eq!(log.get(first).and_then(|e| e.status), Some(EntryStatus::Completed));
        assert_eq!(log.get(next).and_then(|e| e.paired_with), Some(first));
    }

    #[test]
    fn unmatched_output_is_appended_unpaired() {
        let mut log = ExecutionLog::new();
        let output = log.append(entry(EntryType::ToolOutput, "stray"));
        let stored = log.get(output).expect("entry stored");
        assert_eq!(stored.paired_with, None);
        assert_eq!(stored.status, None);
    }

    #[test]
    fn finalize_force_closes_active_entries() {
        let mut log = ExecutionLog::new();
        log.append(entry(EntryType::ToolCall, "a"));
        log.append(entry(EntryType::Reasoning, "thinking"));
        log.append(entry(EntryType::ToolCall, "b"));

        assert_eq!(log.finalize(), 2);
        assert!(log.entries().iter().all(|entry| !entry.is_active()));
        assert_eq!(log.finalize(), 0);
    }

    #[test]
    fn sequences_strictly_increase_and_content_is_stable() {
        let mut log = ExecutionLog::new();
        let kinds = [
            EntryType::Reasoning,
            EntryType::ToolCall,
            EntryType::ToolOutput,
            EntryType::ToolCall,
            EntryType::AiMessage,
            EntryType::ToolOutput,
        ];
        for (index, kind) in kinds.into_iter().enumerate() {
            log.append(entry(kind, &format!("entry {index}")));
        }
        log.set_expanded(1, true);
        log.finalize();

        let sequences: Vec<_> = log.entries().iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        for (index, stored) in log.entries().iter().enumerate() {
            assert_eq!(stored.content, format!("entry {index}"));
        }
        assert!(log.entries()[1].expanded);
        assert!(!log.set_expanded(42, true));
    }

    #[test]
    fn entry_serializes_type_and_rfc3339_timestamp() {
        let mut log = ExecutionLog::new();
        log.append(entry(EntryType::ToolCall, "print(1)"));
        let json = serde_json::to_value(&log.entries()[0]).expect("entry serializes");

        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["status"], "active");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
        assert!(json.get("metadata").is_none());
    }
}
