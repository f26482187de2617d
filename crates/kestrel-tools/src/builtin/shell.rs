// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Upper bound on bytes of output handed back to the model. Past this point
/// the tail is dropped rather than the whole blob, since the model already
/// saw the start of the command's output in the transcript turn that issued
/// it.
const MAX_OUTPUT_BYTES: usize = 16_384;

/// The default tool every environment registers (§4.2): runs `shell_command`
/// through the owning environment's [`crate::ShellExecutor`] and returns its
/// output, capped by [`cap_output`].
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn documentation(&self) -> &str {
        "Execute a shell command and return its combined stdout/stderr.\n\
         'shell_command' parameter is required and can be any shell command.\n\
         Output over ~16 KB is cut off at the tail with a marker noting how\n\
         much was dropped. Prefer non-interactive commands; avoid anything\n\
         that needs a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "shell_command": {
                    "type": "string",
                    "description": "The complete bash one liner shell command to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Directory to run the command from (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["shell_command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn function(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("shell_command").and_then(|v| v.as_str()) else {
            return ToolOutput::err(
                &call.id,
                "Please provide a shell command to execute as 'shell_command' parameter to this tool call.",
            );
        };
        let timeout_secs =
            call.args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(self.timeout_secs);
        let command = match call.args.get("workdir").and_then(|v| v.as_str()) {
            Some(dir) => format!("cd {} && {command}", shell_quote(dir)),
            None => command.to_string(),
        };

        debug!(cmd = %command, "running shell tool");
        let (body, code) = ctx.shell.execute(&command, timeout_secs).await;

        match code {
            0 => ToolOutput::ok(&call.id, cap_output(&body)),
            // Exit 1 is the Unix convention for "no matches"/"condition
            // false" (grep, test) as much as it is a real failure — treat
            // it as a successful call that reports its own result.
            1 => ToolOutput::ok(&call.id, format!("[exit 1]\n{}", cap_output(&body))),
            code => ToolOutput::err(&call.id, format!("[exit {code}]\n{}", cap_output(&body))),
        }
    }
}

/// Wrap `s` in single quotes for use as a shell argument, escaping any
/// embedded single quote the POSIX way (`'\''`).
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Keep at most [`MAX_OUTPUT_BYTES`] from the front of `s`, on a char
/// boundary, appending a note of how much was dropped.
fn cap_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n...[{} bytes truncated]", &s[..cut], s.len() - cut)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
