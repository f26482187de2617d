// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{CompletionRequest, ModelError};

/// Named external interface for a language-model backend.
///
/// Concrete wire clients (OpenAI, Anthropic, …) and prompt templating are
/// out of scope for this crate (SPEC_FULL.md §1); this trait is the seam the
/// Agent's predict loop calls through, so that tests can substitute
/// `kestrel_model::mock::ScriptedProvider` without a network dependency.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider tag, e.g. "openai" or "anthropic".
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Produce a single completion for `req`. Non-streaming: the Agent's
    /// predict loop is synchronous-per-call (SPEC_FULL.md §4.3).
    async fn complete(&self, req: CompletionRequest) -> Result<String, ModelError>;
}
