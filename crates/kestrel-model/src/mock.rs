// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CompletionRequest, ModelError, ModelProvider};

/// One scripted reply. `Text` is a raw completion as the Agent would parse
/// it (`<THOUGHT>...</COMMAND>` etc., or deliberately malformed for
/// hallucination-recovery tests). `RateLimited` makes the next `complete()`
/// call fail as a rate-limit error instead of returning text.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
}

/// Deterministic, pre-scripted provider for tests. Each call to `complete`
/// pops the next reply from the front of the queue. Grounded in the
/// teacher's `ScriptedMockProvider` (pop-from-queue mock pattern), trimmed to
/// the non-streaming `ModelProvider` contract this crate exposes.
pub struct ScriptedProvider {
    replies: Mutex<Vec<ScriptedReply>>,
    pub last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self { replies: Mutex::new(replies), last_request: Mutex::new(None) }
    }

    /// Convenience: a provider that always returns the same raw completion.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::Text(reply.into())])
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<String, ModelError> {
        *self.last_request.lock().expect("lock poisoned") = Some(req);
        let mut replies = self.replies.lock().expect("lock poisoned");
        if replies.is_empty() {
            return Err(ModelError::Transport("scripted replies exhausted".into()));
        }
        match replies.remove(0) {
            ScriptedReply::Text(t) => Ok(t),
            ScriptedReply::RateLimited => Err(ModelError::RateLimited("mock rate limit".into())),
        }
    }
}

/// Minimal always-available provider that echoes the latest user message —
/// useful as a registry default before a real configuration is loaded.
#[derive(Default)]
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<String, ModelError> {
        let last = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!(
            "<THOUGHT>echoing input</THOUGHT>\n<COMMAND>ask_user {{\"message\": \"{last}\", \"commit_message\": \"echo\"}}</COMMAND>"
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn req(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            temperature: 0.0,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn scripted_provider_returns_in_order() {
        let p = ScriptedProvider::new(vec![
            ScriptedReply::Text("first".into()),
            ScriptedReply::Text("second".into()),
        ]);
        assert_eq!(p.complete(req("x")).await.unwrap(), "first");
        assert_eq!(p.complete(req("x")).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn scripted_provider_rate_limit_then_text() {
        let p = ScriptedProvider::new(vec![ScriptedReply::RateLimited, ScriptedReply::Text("ok".into())]);
        assert!(matches!(p.complete(req("x")).await, Err(ModelError::RateLimited(_))));
        assert_eq!(p.complete(req("x")).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn scripted_provider_exhausted_errors() {
        let p = ScriptedProvider::new(vec![]);
        assert!(p.complete(req("x")).await.is_err());
    }

    #[tokio::test]
    async fn scripted_provider_records_last_request() {
        let p = ScriptedProvider::always("ok");
        let _ = p.complete(req("hello")).await;
        let last = p.last_request.lock().unwrap();
        assert_eq!(last.as_ref().unwrap().messages[0].content, "hello");
    }

    #[tokio::test]
    async fn echo_provider_embeds_last_user_message() {
        let p = EchoProvider;
        let out = p.complete(req("make a file")).await.unwrap();
        assert!(out.contains("make a file"));
        assert!(out.contains("<THOUGHT>"));
    }
}
