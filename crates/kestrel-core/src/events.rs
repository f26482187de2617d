// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only, index-addressed event log driving the session runtime's
//! cooperative event loop (SPEC_FULL.md §4.1, §6.3).
use serde::{Deserialize, Serialize};

/// One entry in a `ToolRequest`/`ToolResponse` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallData {
    pub name: String,
    pub args: serde_json::Value,
}

/// The full event taxonomy (§6.3). Every dispatch decision in the session
/// runtime is a match over this enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventType {
    Task { content: String },
    ModelRequest,
    ModelResponse { raw: String },
    ToolRequest { call: ToolCallData },
    ToolResponse { call_id: String, content: String, is_error: bool },
    ShellRequest { command: String },
    ShellResponse { output: String, exit_code: i32 },
    EnvironmentRequest { action: String },
    EnvironmentResponse { content: String },
    UserRequest { prompt: String },
    UserResponse { content: String },
    Interrupt { content: String },
    Stop { reason: String },
    Error { message: String },
    RateLimit { retry_after_secs: u64 },
    GitError { message: String },
    GitAskUser { question: String },
    GitResolve { approved: bool },
    GitCorrupted { message: String },
    GitMerge,
    GitMergeResult { commit: String },
    Checkpoint { checkpoint_id: String },
}

impl EventType {
    /// Terminal tool names per §4.4's `ToolRequest` handler: these end the
    /// step instead of dispatching to an environment.
    pub fn is_terminal_tool_name(name: &str) -> bool {
        matches!(name, "submit" | "exit" | "stop" | "exit_error" | "exit_api")
    }
}

/// One logged entry: a monotonically increasing index plus its event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
}

/// Append-only log addressed by index (§4.1). `revert` (kestrel-versioning)
/// truncates this back to a checkpoint's `event_id`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new event, returning its assigned id.
    pub fn append(&mut self, event_type: EventType) -> u64 {
        let id = self.events.len() as u64;
        self.events.push(Event { id, event_type });
        id
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        self.events.get(id as usize)
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Truncate the log to its first `new_len` entries (inclusive of
    /// indices `0..new_len`), used by `Session::revert` (§4.5.2).
    pub fn truncate(&mut self, new_len: usize) {
        self.events.truncate(new_len);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_ids() {
        let mut log = EventLog::new();
        let a = log.append(EventType::Task { content: "do it".into() });
        let b = log.append(EventType::ModelRequest);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn get_returns_event_by_id() {
        let mut log = EventLog::new();
        log.append(EventType::Task { content: "x".into() });
        let e = log.get(0).unwrap();
        assert_eq!(e.id, 0);
    }

    #[test]
    fn truncate_drops_trailing_events() {
        let mut log = EventLog::new();
        log.append(EventType::Task { content: "a".into() });
        log.append(EventType::ModelRequest);
        log.append(EventType::ModelResponse { raw: "r".into() });
        log.truncate(1);
        assert_eq!(log.len(), 1);
        assert!(log.get(1).is_none());
    }

    #[test]
    fn serialize_deserialize_is_a_fixed_point() {
        let mut log = EventLog::new();
        log.append(EventType::Task { content: "a".into() });
        log.append(EventType::Stop { reason: "submit".into() });
        let json = serde_json::to_string(&log).unwrap();
        let back: EventLog = serde_json::from_str(&json).unwrap();
        assert_eq!(log.events, back.events);
    }

    #[test]
    fn terminal_tool_names_are_recognized() {
        assert!(EventType::is_terminal_tool_name("submit"));
        assert!(EventType::is_terminal_tool_name("exit_error"));
        assert!(!EventType::is_terminal_tool_name("shell"));
    }
}
