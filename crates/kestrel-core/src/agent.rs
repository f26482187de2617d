// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The agent's predict loop (SPEC_FULL.md §4.3): stateless per call. Given
//! a task, the latest observation, and a view of the session transcript, it
//! asks the configured `ModelProvider` for a completion and parses the
//! `<THOUGHT>`/`<COMMAND>`/`<SCRATCHPAD>` tags out of the raw text.
use kestrel_config::PromptFamily;
use kestrel_model::{CompletionRequest, Message, ModelError, ModelProvider, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One parsed line item from the session transcript, fed back to the model
/// as chat history on the next predict call.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

/// The structured result of a single predict call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentAction {
    pub thought: String,
    pub scratchpad: Option<String>,
    /// `None` when the raw completion could not be parsed into a command —
    /// the session runtime treats this as a hallucination and re-prompts.
    pub command: Option<String>,
    pub raw_output: String,
}

/// A parsed `<COMMAND>` body split into a tool name and a JSON argument
/// object, per the `tool_name {json_args}` convention used by the demo
/// tools (`ask_user`, `create_file`, `shell`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// Parse `command_text` (the body of a `<COMMAND>` tag) into a tool name and
/// JSON argument object. The convention is `name {json}` with the JSON
/// object optional (defaults to `{}`).
pub fn parse_command(command_text: &str) -> Option<ParsedCommand> {
    let trimmed = command_text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let brace = trimmed.find('{');
    let (name, json_part) = match brace {
        Some(idx) => (trimmed[..idx].trim(), trimmed[idx..].trim()),
        None => (trimmed, ""),
    };
    if name.is_empty() {
        return None;
    }
    let args = if json_part.is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(json_part).ok()?
    };
    Some(ParsedCommand { tool_name: name.to_string(), args })
}

/// Extract the body of a tag, case-insensitive, in both `<TAG>...</TAG>` and
/// lowercase form. Returns `None` if the opening tag is absent.
fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let open_upper = format!("<{}>", tag.to_uppercase());
    let open_lower = format!("<{}>", tag.to_lowercase());
    let close_upper = format!("</{}>", tag.to_uppercase());
    let close_lower = format!("</{}>", tag.to_lowercase());

    let (open, close) = if text.contains(&open_upper) {
        (open_upper, close_upper)
    } else if text.contains(&open_lower) {
        (open_lower, close_lower)
    } else {
        return None;
    };

    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find(&close).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Parse a raw model completion into thought/scratchpad/command per §4.3.
/// Returns `None` (hallucination) when either `<THOUGHT>` or `<COMMAND>` is
/// missing — both tags are required for a response to be schema-valid; a
/// thought with no command (or vice versa) fails the schema just the same.
fn parse_raw_output(raw: &str) -> Option<AgentAction> {
    let thought = extract_tag(raw, "THOUGHT");
    let scratchpad = extract_tag(raw, "SCRATCHPAD");
    let command = extract_tag(raw, "COMMAND");

    if thought.is_none() || command.is_none() {
        return None;
    }

    Some(AgentAction {
        thought: thought.unwrap_or_default(),
        scratchpad,
        command,
        raw_output: raw.to_string(),
    })
}

/// Build the chat-completion request for one predict call. Prompt
/// templating beyond role-tagging is out of scope (SPEC_FULL.md §1); the
/// `PromptFamily` only controls where the task/observation are placed
/// relative to history, not wire-level formatting.
fn build_request(
    family: PromptFamily,
    system_prompt: &str,
    transcript: &[TranscriptEntry],
    task: &str,
    observation: Option<&str>,
    temperature: f32,
    max_tokens: Option<u32>,
) -> CompletionRequest {
    let mut messages = vec![Message::system(system_prompt)];
    for entry in transcript {
        messages.push(Message { role: entry.role.clone(), content: entry.content.clone() });
    }

    let user_turn = match family {
        PromptFamily::Openai | PromptFamily::Anthropic => match observation {
            Some(obs) => format!("Task: {task}\n\nObservation:\n{obs}"),
            None => format!("Task: {task}"),
        },
    };
    messages.push(Message::user(user_turn));

    CompletionRequest { messages, temperature, max_tokens }
}

/// Stateless-per-call agent (§4.3): owns only its `ModelProvider` and static
/// configuration. The session runtime supplies task/observation/transcript
/// on every `predict` call rather than the agent holding conversational
/// state itself.
pub struct Agent {
    model: Arc<dyn ModelProvider>,
    system_prompt: String,
    prompt_family: PromptFamily,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        system_prompt: impl Into<String>,
        prompt_family: PromptFamily,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Self {
        Self { model, system_prompt: system_prompt.into(), prompt_family, temperature, max_tokens }
    }

    /// Run one predict call: (task, observation, transcript) -> AgentAction.
    /// Rate-limit errors propagate as `ModelError::RateLimited` so the
    /// session runtime can append a `RateLimit` event and retry (§4.4/§7);
    /// every other model error propagates as `ModelError::Transport`.
    pub async fn predict(
        &self,
        task: &str,
        observation: Option<&str>,
        transcript: &[TranscriptEntry],
    ) -> Result<AgentAction, ModelError> {
        let req = build_request(
            self.prompt_family,
            &self.system_prompt,
            transcript,
            task,
            observation,
            self.temperature,
            self.max_tokens,
        );
        let raw = self.model.complete(req).await?;
        Ok(parse_raw_output(&raw).unwrap_or_else(|| AgentAction {
            thought: String::new(),
            scratchpad: None,
            command: None,
            raw_output: raw,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
