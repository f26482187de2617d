// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model, parsed out of the
/// `<COMMAND>` block (SPEC_FULL.md §4.3).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Explicit context passed to every tool invocation (Design Note §9:
/// "Pass context as an explicit record; do not rely on closure capture.").
///
/// Carries everything a tool's `function` needs without it reaching back
/// into the owning `Environment` or `Session` by closure capture: the
/// working directory, and a handle to shell out through the owning
/// environment when the tool needs to run a command (e.g. `git` for
/// checkpoint commits).
pub struct ToolContext {
    pub working_dir: std::path::PathBuf,
    pub shell: Arc<dyn ShellExecutor>,
    /// Present only under a `User` environment (§4.2); tools that solicit
    /// input (e.g. `ask_user`) fall back to echoing the question when `None`.
    pub user_input: Option<Arc<dyn UserInputProvider>>,
}

/// Minimal seam a tool's `function` uses to run a command through whichever
/// environment owns it, without depending on `kestrel-core` directly (that
/// would create a cycle: core owns the registry which owns tools).
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn execute(&self, cmd: &str, timeout_secs: u64) -> (String, i32);
}

/// Seam to the `User` environment's external input provider (§4.2).
#[async_trait]
pub trait UserInputProvider: Send + Sync {
    async fn provide(&self, prompt: &str) -> String;
}

/// A named operation exposed by an environment: `(setup, cleanup,
/// documentation, function(context, args))` per SPEC_FULL.md §2/§4.2.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable documentation shown to the model alongside the tool's
    /// parameter schema.
    fn documentation(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    /// Default approval policy consulted before the tool runs a shell
    /// command (SPEC_FULL.md §10.1); tools with no approval semantics
    /// should return `ApprovalPolicy::Auto`.
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    /// Called once when the owning environment is set up. Default: no-op.
    fn setup(&self, _ctx: &ToolContext) {}

    /// Called once when the owning environment tears down. Default: no-op.
    fn cleanup(&self, _ctx: &ToolContext) {}

    /// Execute the tool against `call.args`, using `ctx` for environment
    /// access. Errors are returned as `ToolOutput::err`, never panics.
    async fn function(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
