// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A role-tagged chat turn, the unit `chat_history` is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A single non-streaming completion request.
///
/// The wire format and prompt templating that build `messages` are out of
/// scope for this crate (see SPEC_FULL.md §1); this type only carries what a
/// `ModelProvider` needs to produce a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Errors a `ModelProvider::complete` call can surface.
///
/// The session runtime's `ModelRequest` handler treats `RateLimited`
/// specially (SPEC_FULL.md §4.4/§7): it appends a `RateLimit` event and
/// retries instead of terminating the session. Every other variant
/// terminates the session via an `Error` event.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("model transport error: {0}")]
    Transport(String),
}
