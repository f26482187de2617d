// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Present a message to the user and, when `commit_message` is given,
/// signal that a checkpoint should be taken (SPEC_FULL.md §4.3/§4.5: "if the
/// extracted action's tool name is `ask_user` with a commit-message
/// argument and versioning is enabled, schedule a checkpoint before
/// returning"). The checkpoint itself is scheduled by the session runtime
/// after this tool returns — this tool only solicits the answer.
///
/// Under a `User` environment the question is routed through
/// [`crate::tool::UserInputProvider`]; under a `Local` environment with no
/// provider configured the question is echoed back so non-interactive runs
/// still terminate.
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn documentation(&self) -> &str {
        "Ask the user a question and wait for their reply. Arguments: \
         `message` (the question) and optional `commit_message` — when \
         versioning is enabled, providing `commit_message` checkpoints the \
         working tree before the question is delivered."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "commit_message": {"type": "string"}
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn function(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let message = match call.args.get("message").and_then(|v| v.as_str()) {
            Some(m) => m.to_string(),
            None => return ToolOutput::err(&call.id, "ask_user requires a 'message' argument"),
        };

        debug!(message = %message, "ask_user invoked");

        let answer = match &ctx.user_input {
            Some(provider) => provider.provide(&message).await,
            None => message.clone(),
        };

        ToolOutput::ok(&call.id, answer)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
