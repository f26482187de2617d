// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Create a file with the given contents, relative to the environment's
/// working directory. One of the two demo tools exercised by the
/// happy-add-file end-to-end scenario (SPEC_FULL.md §8).
pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn documentation(&self) -> &str {
        "Create a file with the given contents. Arguments: `path` (relative \
         to the working directory) and `contents`. Fails if the file \
         already exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "contents": {"type": "string"}
            },
            "required": ["path", "contents"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn function(&self, ctx: &ToolContext, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "create_file requires a 'path' argument"),
        };
        let contents = call.args.get("contents").and_then(|v| v.as_str()).unwrap_or("");

        let full_path = ctx.working_dir.join(path);
        if full_path.exists() {
            return ToolOutput::err(&call.id, format!("{path} already exists"));
        }

        debug!(path = %full_path.display(), "creating file");

        if let Some(parent) = full_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutput::err(&call.id, format!("failed to create parent dirs: {e}"));
            }
        }
        match std::fs::write(&full_path, contents) {
            Ok(()) => ToolOutput::ok(&call.id, format!("created {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("failed to write {path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::tool::ShellExecutor;

    struct NullShell;

    #[async_trait]
    impl ShellExecutor for NullShell {
        async fn execute(&self, _cmd: &str, _timeout_secs: u64) -> (String, i32) {
            (String::new(), 0)
        }
    }

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext { working_dir: dir.path().to_path_buf(), shell: Arc::new(NullShell), user_input: None }
    }

    #[tokio::test]
    async fn creates_file_with_contents() {
        let dir = TempDir::new().unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "create_file".into(),
            args: json!({"path": "hello.py", "contents": "print('hi')\n"}),
        };
        let out = CreateFileTool.function(&ctx(&dir), &call).await;
        assert!(!out.is_error, "{}", out.content);
        let written = std::fs::read_to_string(dir.path().join("hello.py")).unwrap();
        assert_eq!(written, "print('hi')\n");
    }

    #[tokio::test]
    async fn refuses_to_overwrite_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.py"), "old").unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "create_file".into(),
            args: json!({"path": "hello.py", "contents": "new"}),
        };
        let out = CreateFileTool.function(&ctx(&dir), &call).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let call = ToolCall { id: "1".into(), name: "create_file".into(), args: json!({}) };
        let out = CreateFileTool.function(&ctx(&dir), &call).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "create_file".into(),
            args: json!({"path": "nested/dir/hello.py", "contents": "x"}),
        };
        let out = CreateFileTool.function(&ctx(&dir), &call).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(dir.path().join("nested/dir/hello.py").exists());
    }
}
