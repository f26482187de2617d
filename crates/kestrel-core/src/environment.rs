// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Polymorphic environment abstraction (SPEC_FULL.md §4.2): the seam a
//! `ToolRequest` dispatches through when a tool has no owning environment of
//! its own. Grounded in the original `LocalShellEnvironment`
//! (persistent `/bin/bash -l` child, stdout/stderr multiplexing, bounded
//! timeout) and `UserEnvironment` (blocks on an external input provider).
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kestrel_tools::{ShellExecutor, ToolContext, ToolRegistry, UserInputProvider};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::events::{EventLog, EventType};

/// A descriptor an `Environment` round-trips through `save`/`load` (§4.2,
/// §6.4's `{type, path, cwd, old_dir, ...}` persistence tags).
pub type EnvironmentDescriptor = serde_json::Value;

/// Polymorphic environment contract: setup/teardown lifecycle, a single
/// `execute` entry point for shell-style commands, tool registration, and a
/// descriptor round-trip for persistence.
#[async_trait]
pub trait Environment: Send + Sync {
    fn name(&self) -> &str;
    async fn setup(&self) -> anyhow::Result<()>;
    async fn teardown(&self) -> anyhow::Result<()>;
    /// Run `command`, logging an `EnvironmentRequest`/`EnvironmentResponse`
    /// pair around it (§4.2) so the round-trip through this environment is
    /// visible in the event log, not just its eventual tool response.
    async fn execute(&self, command: &str, timeout_secs: u64, events: &mut EventLog) -> anyhow::Result<(String, i32)>;
    fn register_tools(&self, registry: &mut ToolRegistry);
    fn set_default_tool(&self, registry: &mut ToolRegistry, name: &str) {
        registry.set_default_tool(name);
    }
    fn save(&self) -> EnvironmentDescriptor;
    async fn load(&self, descriptor: &EnvironmentDescriptor) -> anyhow::Result<()>;
}

/// Line written after every command so the reader side knows where the
/// command's own output ends and the exit-code probe begins. Unlikely to
/// collide with real output; the teacher's equivalent uses a trailing
/// `echo $?` probe with the same assumption.
const SENTINEL: &str = "__kestrel_cmd_done_d41d8cd98f__";

struct ShellState {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
}

/// Local shell environment: a persistent `/bin/bash -l` child process that
/// commands are piped into one at a time, with a bounded per-command
/// timeout. Doubles as a `kestrel_tools::ShellExecutor` so the builtin
/// `shell` tool can run through the same persistent process instead of
/// spawning a fresh one per call.
pub struct LocalEnvironment {
    working_dir: std::path::PathBuf,
    state: Mutex<Option<ShellState>>,
    default_timeout_secs: AtomicU64,
}

impl LocalEnvironment {
    pub fn new(working_dir: impl Into<std::path::PathBuf>, default_timeout_secs: u64) -> Self {
        Self {
            working_dir: working_dir.into(),
            state: Mutex::new(None),
            default_timeout_secs: AtomicU64::new(default_timeout_secs),
        }
    }

    async fn spawn(&self) -> anyhow::Result<ShellState> {
        let mut cmd = Command::new("/bin/bash");
        cmd.arg("-l")
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        Ok(ShellState { child, stdin, stdout })
    }

    async fn run_in_shell(&self, command: &str, timeout_secs: u64) -> anyhow::Result<(String, i32)> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }

        let fut = async {
            let state = guard.as_mut().expect("just populated");
            let full = format!("{command}\necho \"{SENTINEL}$?\"\n");
            state.stdin.write_all(full.as_bytes()).await?;
            state.stdin.flush().await?;

            let mut output = String::new();
            loop {
                let mut line = String::new();
                let n = state.stdout.read_line(&mut line).await?;
                if n == 0 {
                    anyhow::bail!("shell process closed stdout unexpectedly");
                }
                if let Some(rest) = line.trim_end().strip_prefix(SENTINEL) {
                    let exit_code: i32 = rest.trim().parse().unwrap_or(-1);
                    return Ok::<(String, i32), anyhow::Error>((output, exit_code));
                }
                output.push_str(&line);
            }
        };

        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs.max(1)), fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs, "shell command timed out; restarting persistent shell");
                if let Some(mut state) = guard.take() {
                    let _ = state.child.kill().await;
                }
                Ok((format!("command timed out after {timeout_secs}s"), -1))
            }
        }
    }
}

#[async_trait]
impl ShellExecutor for LocalEnvironment {
    async fn execute(&self, cmd: &str, timeout_secs: u64) -> (String, i32) {
        self.run_in_shell(cmd, timeout_secs).await.unwrap_or_else(|e| (e.to_string(), -1))
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn name(&self) -> &str {
        "local"
    }

    async fn setup(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.working_dir)?;
        let mut guard = self.state.lock().await;
        *guard = Some(self.spawn().await?);
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(mut state) = guard.take() {
            let _ = state.child.kill().await;
        }
        Ok(())
    }

    async fn execute(&self, command: &str, timeout_secs: u64, events: &mut EventLog) -> anyhow::Result<(String, i32)> {
        let timeout = if timeout_secs == 0 {
            self.default_timeout_secs.load(Ordering::Relaxed)
        } else {
            timeout_secs
        };
        events.append(EventType::EnvironmentRequest { action: command.to_string() });
        let result = self.run_in_shell(command, timeout).await;
        let content = match &result {
            Ok((output, code)) => format!("[exit {code}]\n{output}"),
            Err(e) => format!("[error] {e}"),
        };
        events.append(EventType::EnvironmentResponse { content });
        result
    }

    fn register_tools(&self, registry: &mut ToolRegistry) {
        registry.register(kestrel_tools::ShellTool::default());
        registry.register(kestrel_tools::CreateFileTool);
    }

    fn save(&self) -> EnvironmentDescriptor {
        json!({
            "type": "local",
            "path": self.working_dir.to_string_lossy(),
        })
    }

    async fn load(&self, descriptor: &EnvironmentDescriptor) -> anyhow::Result<()> {
        debug!(?descriptor, "LocalEnvironment::load is a no-op beyond setup (stateless descriptor)");
        self.setup().await
    }
}

/// The user-facing environment: its only "execution" is handing a prompt to
/// an external `UserInputProvider` and returning the answer. Owns the
/// `ask_user` tool.
pub struct UserEnvironment {
    provider: Arc<dyn UserInputProvider>,
}

impl UserEnvironment {
    pub fn new(provider: Arc<dyn UserInputProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Environment for UserEnvironment {
    fn name(&self) -> &str {
        "user"
    }

    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, command: &str, _timeout_secs: u64, events: &mut EventLog) -> anyhow::Result<(String, i32)> {
        events.append(EventType::EnvironmentRequest { action: command.to_string() });
        events.append(EventType::UserRequest { prompt: command.to_string() });
        let answer = self.provider.provide(command).await;
        events.append(EventType::UserResponse { content: answer.clone() });
        events.append(EventType::EnvironmentResponse { content: answer.clone() });
        Ok((answer, 0))
    }

    fn register_tools(&self, registry: &mut ToolRegistry) {
        registry.register(kestrel_tools::AskUserTool);
    }

    fn save(&self) -> EnvironmentDescriptor {
        json!({ "type": "user" })
    }

    async fn load(&self, _descriptor: &EnvironmentDescriptor) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Build a `ToolContext` pointed at `working_dir`, wired to `shell` (usually
/// a `LocalEnvironment`) and an optional user-input provider.
pub fn tool_context(
    working_dir: std::path::PathBuf,
    shell: Arc<dyn ShellExecutor>,
    user_input: Option<Arc<dyn UserInputProvider>>,
) -> ToolContext {
    ToolContext { working_dir, shell, user_input }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
