// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session persistence boundary (SPEC_FULL.md §6.4). Defines the
//! `SessionStore` trait and an in-memory implementation; a database- or
//! filesystem-backed store is out of scope and left as a seam.
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentDescriptor;
use crate::events::EventLog;

/// Everything needed to reconstruct a session's observable state: the event
/// log plus each environment's `save()` descriptor, keyed by environment
/// name. Rebuilding a live `Session` from a record still requires the
/// caller to supply a model provider and, for the `user` environment, an
/// input provider — those are runtime dependencies, not serializable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub event_log: EventLog,
    pub environments: HashMap<String, EnvironmentDescriptor>,
}

/// Persistence boundary for session records (§6.4: "this specification
/// defines the `SessionStore` trait boundary and ships an in-memory
/// implementation used by tests").
pub trait SessionStore: Send + Sync {
    fn save(&self, session_id: &str, record: SessionRecord);
    fn load(&self, session_id: &str) -> Option<SessionRecord>;
    fn delete(&self, session_id: &str);
    fn names(&self) -> Vec<String>;
}

/// In-memory `SessionStore`. Used by the CLI between subcommand
/// invocations only insofar as a caller keeps one alive across calls; the
/// default CLI wiring does not persist across process restarts since no
/// on-disk backend is in scope.
#[derive(Default)]
pub struct InMemorySessionStore {
    records: StdMutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, session_id: &str, record: SessionRecord) {
        self.records.lock().expect("lock poisoned").insert(session_id.to_string(), record);
    }

    fn load(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.lock().expect("lock poisoned").get(session_id).cloned()
    }

    fn delete(&self, session_id: &str) {
        self.records.lock().expect("lock poisoned").remove(session_id);
    }

    fn names(&self) -> Vec<String> {
        self.records.lock().expect("lock poisoned").keys().cloned().collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn sample_record() -> SessionRecord {
        let mut log = EventLog::new();
        log.append(EventType::Task { content: "do a thing".into() });
        SessionRecord { event_log: log, environments: HashMap::new() }
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = InMemorySessionStore::new();
        store.save("s1", sample_record());
        let loaded = store.load("s1").expect("record must exist");
        assert_eq!(loaded.event_log.len(), 1);
    }

    #[test]
    fn load_missing_session_is_none() {
        let store = InMemorySessionStore::new();
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn delete_removes_the_record() {
        let store = InMemorySessionStore::new();
        store.save("s1", sample_record());
        store.delete("s1");
        assert!(store.load("s1").is_none());
    }

    #[test]
    fn names_lists_all_saved_sessions() {
        let store = InMemorySessionStore::new();
        store.save("a", sample_record());
        store.save("b", sample_record());
        let mut names = store.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
