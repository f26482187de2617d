// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session runtime: the single-threaded cooperative event loop that drives
//! a session from `Task` to `Stop` by dispatching on the most recently
//! appended event (SPEC_FULL.md §4.4), plus the external control surface
//! (§6.1) and the git lifecycle integration (§4.5).
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use kestrel_config::Config;
use kestrel_model::{ModelError, ModelProvider, Role};
use kestrel_tools::{ToolCall, ToolRegistry, UserInputProvider};
use kestrel_versioning::{
    AlwaysNo, CheckpointAuthor, GitAction, GitSetupOutcome, Prompter, VersioningController,
    VersioningState,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::{parse_command, Agent, AgentAction, TranscriptEntry};
use crate::environment::{tool_context, Environment, LocalEnvironment, UserEnvironment};
use crate::events::{EventLog, EventType, ToolCallData};

/// Synthetic task appended after a `submit`-reason `Stop` (§4.4): the loop
/// keeps running rather than pausing, so the agent can act on revisions or
/// idle itself via `ask_user` instead of the runtime parking the session.
const TASK_COMPLETE_PROMPT: &str = "you have completed your task, ask user for revisions or a new one";

/// A session's lifecycle state (§3): `paused` sessions are idle between
/// external `submit` calls, `running` sessions have a step in flight,
/// `terminating`/`terminated` close out the environment and git lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Paused,
    Running,
    Terminating,
    Terminated,
}

/// Explicit per-session registry of external input providers (Design Note
/// §9): rather than process-wide global state, each `Session` is handed the
/// `Arc<UserInputRegistry>` at construction and looks itself up by id.
#[derive(Default)]
pub struct UserInputRegistry {
    providers: StdMutex<HashMap<String, Arc<dyn UserInputProvider>>>,
}

impl UserInputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: impl Into<String>, provider: Arc<dyn UserInputProvider>) {
        self.providers.lock().expect("lock poisoned").insert(session_id.into(), provider);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<dyn UserInputProvider>> {
        self.providers.lock().expect("lock poisoned").get(session_id).cloned()
    }
}

/// External session control surface (§6.1).
#[async_trait]
pub trait SessionControl {
    async fn git_new(&mut self) -> anyhow::Result<()>;
    async fn git_load(&mut self) -> anyhow::Result<()>;
    async fn git_reset(&mut self) -> anyhow::Result<()>;
    async fn git_teardown(&mut self) -> anyhow::Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    async fn terminate(&mut self) -> anyhow::Result<()>;
    /// Append a `Task` and drive the event loop until the session goes idle
    /// (a `submit`-reason `Stop`) or terminates.
    async fn submit(&mut self, content: &str) -> anyhow::Result<()>;
    fn interrupt(&mut self, content: &str);
    fn resolve_git(&mut self, approved: bool);
    /// Per-file `(before, after)` content between two checkpoints, resolved
    /// by `checkpoint_id` (§6.1's `diff(name, src_id, dst_id)`).
    fn diff(&self, src_checkpoint_id: &str, dst_checkpoint_id: &str) -> anyhow::Result<Vec<(String, Option<String>, Option<String>)>>;
    /// Roll the session back to `checkpoint_id` (§6.1): truncate
    /// `checkpoints`/`event_log` to it, restore its `agent_history`/`state`,
    /// hard-reset the working tree when it carries a real commit, then
    /// re-run `setup()` and idle.
    async fn revert(&mut self, checkpoint_id: &str) -> anyhow::Result<()>;
}

/// A running coding-assistant session: the event log, the agent, the
/// registered environments, and (optionally) the git lifecycle controller.
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub event_log: EventLog,
    config: Config,
    working_dir: PathBuf,
    agent: Agent,
    tool_registry: Arc<ToolRegistry>,
    environments: HashMap<String, Arc<dyn Environment>>,
    local_env: Arc<LocalEnvironment>,
    tool_owner: HashMap<String, String>,
    default_environment: String,
    versioning: Option<VersioningController>,
    versioning_state: VersioningState,
    prompter: Arc<dyn Prompter>,
    transcript: Vec<TranscriptEntry>,
    current_task: Option<String>,
    last_observation: Option<String>,
    last_action: Option<AgentAction>,
    pending_interrupts: Vec<String>,
    pending_git_question: Option<String>,
    user_input: Option<Arc<dyn UserInputProvider>>,
    /// Set from outside the exclusive `&mut self` borrow the event loop runs
    /// under (e.g. from a ctrl-c handler holding a clone via
    /// [`Session::terminate_flag`]) to interrupt an in-flight rate-limit
    /// sleep (§4.4/§5).
    terminating_flag: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        config: Config,
        working_dir: PathBuf,
        model: Arc<dyn ModelProvider>,
        user_input: Option<Arc<dyn UserInputProvider>>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let agent = Agent::new(
            model,
            config.agent.system_prompt.clone().unwrap_or_else(default_system_prompt),
            config.model.prompt_family,
            config.model.temperature,
            config.model.max_tokens,
        );

        let local_env = Arc::new(LocalEnvironment::new(working_dir.clone(), config.tools.timeout_secs));
        let mut environments: HashMap<String, Arc<dyn Environment>> = HashMap::new();
        let mut tool_registry = ToolRegistry::new();
        let mut tool_owner = HashMap::new();

        local_env.register_tools(&mut tool_registry);
        for name in ["shell", "create_file"] {
            tool_owner.insert(name.to_string(), "local".to_string());
        }
        environments.insert("local".to_string(), local_env.clone() as Arc<dyn Environment>);

        if let Some(provider) = &user_input {
            let user_env: Arc<dyn Environment> = Arc::new(UserEnvironment::new(provider.clone()));
            user_env.register_tools(&mut tool_registry);
            tool_owner.insert("ask_user".to_string(), "user".to_string());
            environments.insert("user".to_string(), user_env);
        } else {
            // No external provider configured: ask_user still needs a home so
            // non-interactive runs (the happy-path e2e scenario) can exercise
            // it — it falls back to echoing the question (§4.2's User
            // contract has no meaning without a provider).
            tool_registry.register(kestrel_tools::AskUserTool);
            tool_owner.insert("ask_user".to_string(), "local".to_string());
        }

        tool_registry.set_default_tool("shell");

        let versioning = if config.versioning.enabled {
            Some(VersioningController::new(working_dir.clone(), config.versioning.agent_branch.clone()))
        } else {
            None
        };

        Self {
            id,
            state: SessionState::Paused,
            event_log: EventLog::new(),
            config,
            working_dir,
            agent,
            tool_registry: Arc::new(tool_registry),
            environments,
            local_env,
            tool_owner,
            default_environment: "local".to_string(),
            versioning,
            versioning_state: VersioningState::default(),
            prompter,
            transcript: Vec::new(),
            current_task: None,
            last_observation: None,
            last_action: None,
            pending_interrupts: Vec::new(),
            pending_git_question: None,
            user_input,
            terminating_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tool_context_for(&self, env_name: &str) -> kestrel_tools::ToolContext {
        debug_assert!(self.environments.contains_key(env_name), "unknown environment {env_name}");
        let shell: Arc<dyn kestrel_tools::ShellExecutor> = self.local_env.clone();
        tool_context(self.working_dir.clone(), shell, self.user_input.clone())
    }

    /// A clone of the flag an external caller can set to interrupt an
    /// in-flight rate-limit sleep without needing the exclusive `&mut self`
    /// the event loop otherwise holds for the duration of `submit`.
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        self.terminating_flag.clone()
    }

    /// Dispatch on the single most recently appended event, appending the
    /// event(s) that follow from it (§4.4). Returns `true` while the
    /// session should keep stepping.
    async fn dispatch_once(&mut self) -> anyhow::Result<bool> {
        let Some(last) = self.event_log.last().cloned() else { return Ok(false) };

        match last.event_type {
            EventType::Task { content } => {
                self.current_task = Some(content.clone());
                self.transcript.push(TranscriptEntry { role: Role::User, content });
                self.event_log.append(EventType::ModelRequest);
            }

            EventType::ModelRequest => {
                let task = self.current_task.clone().unwrap_or_default();
                let observation = self.observation_with_pending_interrupts();
                match self.agent.predict(&task, observation.as_deref(), &self.transcript).await {
                    Ok(action) => {
                        let hallucinated = action.thought.is_empty() || action.command.is_none();
                        self.last_action = Some(action.clone());
                        if hallucinated {
                            warn!("model produced unparseable output; re-prompting with its own reply");
                            self.transcript.push(TranscriptEntry {
                                role: Role::Assistant,
                                content: action.raw_output.clone(),
                            });
                            self.transcript.push(TranscriptEntry {
                                role: Role::User,
                                content: "That reply could not be parsed. Respond using <THOUGHT> and <COMMAND> tags.".into(),
                            });
                            self.event_log.append(EventType::ModelRequest);
                        } else {
                            self.event_log.append(EventType::ModelResponse { raw: action.raw_output });
                        }
                    }
                    Err(ModelError::RateLimited(msg)) => {
                        debug!(%msg, "rate limited, scheduling retry");
                        self.event_log.append(EventType::RateLimit { retry_after_secs: 1 });
                    }
                    Err(ModelError::Transport(msg)) => {
                        self.event_log.append(EventType::Error { message: msg });
                    }
                }
            }

            EventType::ModelResponse { raw } => {
                self.transcript.push(TranscriptEntry { role: Role::Assistant, content: raw });
                let action = self.last_action.clone();
                match action.and_then(|a| a.command) {
                    Some(command_text) => match parse_command(&command_text) {
                        Some(parsed) => {
                            self.event_log.append(EventType::ToolRequest {
                                call: ToolCallData { name: parsed.tool_name, args: parsed.args },
                            });
                        }
                        None => {
                            self.event_log.append(EventType::ToolResponse {
                                call_id: Uuid::new_v4().to_string(),
                                content: "could not parse command".into(),
                                is_error: true,
                            });
                        }
                    },
                    None => {
                        self.event_log.append(EventType::ToolResponse {
                            call_id: Uuid::new_v4().to_string(),
                            content: "model response had no command".into(),
                            is_error: true,
                        });
                    }
                }
            }

            EventType::ToolRequest { call } => {
                if EventType::is_terminal_tool_name(&call.name) {
                    self.event_log.append(EventType::Stop { reason: call.name.clone() });
                } else if self.tool_registry.get(&call.name).is_some() {
                    self.run_tool(&call).await?;
                } else {
                    let command = shell_command_from_call(&call);
                    self.event_log.append(EventType::ShellRequest { command });
                }
            }

            EventType::ShellRequest { command } => {
                let env = self.environments.get(&self.default_environment).cloned().expect("default environment must exist");
                let (output, exit_code) =
                    env.execute(&command, 0, &mut self.event_log).await.unwrap_or_else(|e| (e.to_string(), -1));
                self.event_log.append(EventType::ShellResponse { output, exit_code });
            }

            EventType::ShellResponse { output, exit_code } => {
                self.event_log.append(EventType::ToolResponse {
                    call_id: Uuid::new_v4().to_string(),
                    content: output,
                    is_error: exit_code != 0,
                });
            }

            EventType::ToolResponse { content, is_error, .. } => {
                self.transcript.push(TranscriptEntry {
                    role: Role::User,
                    content: content.clone(),
                });
                self.last_observation = Some(content);
                let _ = is_error;
                self.event_log.append(EventType::ModelRequest);
            }

            EventType::RateLimit { retry_after_secs } => {
                let total_secs = retry_after_secs.min(60);
                for _ in 0..total_secs {
                    if self.terminating_flag.load(Ordering::Relaxed) {
                        self.state = SessionState::Terminating;
                        return Ok(false);
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                if self.terminating_flag.load(Ordering::Relaxed) {
                    self.state = SessionState::Terminating;
                    return Ok(false);
                }
                self.event_log.append(EventType::ModelRequest);
            }

            EventType::Interrupt { content } => {
                self.pending_interrupts.push(content);
                return Ok(false);
            }

            EventType::Error { message } => {
                warn!(%message, "session error");
                self.event_log.append(EventType::Stop { reason: "error".into() });
            }

            EventType::Stop { reason } => {
                if reason == "submit" {
                    // The model declared the task done; the loop does not
                    // pause for a human to drive it forward manually — it
                    // keeps running against a fresh, self-describing task so
                    // the agent can pick up revisions (or idle on its own
                    // `ask_user`) without external intervention.
                    self.event_log.append(EventType::Task { content: TASK_COMPLETE_PROMPT.into() });
                } else {
                    self.state = SessionState::Terminating;
                    return Ok(false);
                }
            }

            EventType::GitAskUser { question } => {
                self.pending_git_question = Some(question);
                return Ok(false);
            }

            // Git* and Checkpoint events are produced by this session's own
            // SessionControl methods (`git_new`/`git_load`/…), not by the
            // step loop itself; seeing one here is a no-op terminus.
            EventType::GitError { .. }
            | EventType::GitResolve { .. }
            | EventType::GitCorrupted { .. }
            | EventType::GitMerge
            | EventType::GitMergeResult { .. }
            | EventType::Checkpoint { .. }
            | EventType::EnvironmentRequest { .. }
            | EventType::EnvironmentResponse { .. }
            | EventType::UserRequest { .. }
            | EventType::UserResponse { .. } => {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Take the last tool observation and splice any accumulated interrupts
    /// onto the end of it (§4.4: interrupts are injected into the agent's
    /// next prompt, not dropped). Clears `pending_interrupts`.
    fn observation_with_pending_interrupts(&mut self) -> Option<String> {
        let observation = self.last_observation.take();
        if self.pending_interrupts.is_empty() {
            return observation;
        }
        let interrupts = self.pending_interrupts.join("\n");
        self.pending_interrupts.clear();
        Some(match observation {
            Some(obs) => format!("{obs}\n\n[interrupt] {interrupts}"),
            None => format!("[interrupt] {interrupts}"),
        })
    }

    async fn run_tool(&mut self, call: &ToolCallData) -> anyhow::Result<()> {
        let env_name = self.tool_owner.get(&call.name).cloned().unwrap_or_else(|| self.default_environment.clone());
        let ctx = self.tool_context_for(&env_name);
        let tool_call = ToolCall { id: Uuid::new_v4().to_string(), name: call.name.clone(), args: call.args.clone() };
        let output = self.tool_registry.execute(&ctx, &tool_call).await;

        self.event_log.append(EventType::ToolResponse {
            call_id: output.call_id.clone(),
            content: output.content.clone(),
            is_error: output.is_error,
        });

        // ask_user + commit_message schedules a checkpoint (§4.3/§4.5).
        if call.name == "ask_user" && !output.is_error {
            if let Some(commit_message) = call.args.get("commit_message").and_then(|v| v.as_str()) {
                self.checkpoint(commit_message).await?;
            }
        }

        Ok(())
    }

    async fn checkpoint(&mut self, commit_message: &str) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { return Ok(()) };
        let event_id = self.event_log.len() as u64;
        let snapshot_value = serde_json::to_value(&self.transcript_snapshot())?;
        let checkpoint = versioning.create_checkpoint(
            &mut self.versioning_state,
            commit_message,
            event_id,
            snapshot_value,
            serde_json::json!({}),
            CheckpointAuthor::Agent,
        )?;
        self.event_log.append(EventType::Checkpoint { checkpoint_id: checkpoint.checkpoint_id });
        Ok(())
    }

    fn transcript_snapshot(&self) -> Vec<(String, String)> {
        self.transcript.iter().map(|e| (format!("{:?}", e.role), e.content.clone())).collect()
    }

    /// Drive the event loop until it goes idle (no event left to dispatch,
    /// a `submit`-reason `Stop`, an `Interrupt`, a `GitAskUser`, or the
    /// session terminates).
    async fn run_until_idle(&mut self) -> anyhow::Result<()> {
        self.state = SessionState::Running;
        let mut rounds = 0u32;
        while self.dispatch_once().await? {
            rounds += 1;
            if rounds > self.config.agent.max_tool_rounds * 4 {
                self.event_log.append(EventType::Stop { reason: "error".into() });
                break;
            }
        }
        if self.state == SessionState::Terminating {
            for env in self.environments.values() {
                let _ = env.teardown().await;
            }
            self.state = SessionState::Terminated;
        }
        Ok(())
    }

    fn checkpoint_commit(&self, checkpoint_id: &str) -> Option<String> {
        self.versioning_state.checkpoints.iter().find(|c| c.checkpoint_id == checkpoint_id).map(|c| c.commit_hash.clone())
    }

    /// Build a `SessionRecord` snapshot (§6.4) from this session's current
    /// event log and each registered environment's descriptor.
    pub fn to_record(&self) -> crate::store::SessionRecord {
        let environments = self.environments.iter().map(|(name, env)| (name.clone(), env.save())).collect();
        crate::store::SessionRecord { event_log: self.event_log.clone(), environments }
    }

    /// Replace this session's event log with one loaded from a
    /// `SessionRecord`, re-running each environment's `load` against its
    /// saved descriptor. Runtime dependencies (model provider, user-input
    /// provider) are not part of the record and are unaffected.
    pub async fn restore(&mut self, record: &crate::store::SessionRecord) -> anyhow::Result<()> {
        for (name, descriptor) in &record.environments {
            if let Some(env) = self.environments.get(name) {
                env.load(descriptor).await?;
            }
        }
        self.event_log = record.event_log.clone();
        Ok(())
    }
}

#[async_trait]
impl SessionControl for Session {
    async fn git_new(&mut self) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { return Ok(()) };
        match versioning.git_setup(GitAction::New, &mut self.versioning_state, self.prompter.as_ref()) {
            GitSetupOutcome::Success { note } => {
                if let Some(note) = note {
                    // A note about drift the agent didn't cause (e.g.
                    // commits made outside this session) is folded into
                    // chat history as its own turn, not the task — the
                    // caller's actual task must survive untouched.
                    self.transcript.push(TranscriptEntry { role: Role::User, content: note });
                }
                Ok(())
            }
            GitSetupOutcome::Corrupted => {
                self.event_log.append(EventType::GitCorrupted { message: "git new failed".into() });
                anyhow::bail!("git new failed: session unrecoverable")
            }
            GitSetupOutcome::Retry | GitSetupOutcome::Disabled => Ok(()),
        }
    }

    async fn git_load(&mut self) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { return Ok(()) };
        match versioning.git_setup(GitAction::Load, &mut self.versioning_state, self.prompter.as_ref()) {
            GitSetupOutcome::Success { note } => {
                if let Some(note) = note {
                    // A note about drift the agent didn't cause (e.g.
                    // commits made outside this session) is folded into
                    // chat history as its own turn, not the task — the
                    // caller's actual task must survive untouched.
                    self.transcript.push(TranscriptEntry { role: Role::User, content: note });
                }
                Ok(())
            }
            GitSetupOutcome::Corrupted => {
                self.event_log.append(EventType::GitCorrupted { message: "git load failed".into() });
                anyhow::bail!("git load failed: session unrecoverable")
            }
            GitSetupOutcome::Retry | GitSetupOutcome::Disabled => Ok(()),
        }
    }

    async fn git_reset(&mut self) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { return Ok(()) };
        match versioning.git_setup(GitAction::Reset, &mut self.versioning_state, self.prompter.as_ref()) {
            GitSetupOutcome::Success { .. } => Ok(()),
            _ => anyhow::bail!("git reset failed"),
        }
    }

    async fn git_teardown(&mut self) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { return Ok(()) };
        match versioning.git_setup(GitAction::Teardown, &mut self.versioning_state, &AlwaysNo) {
            GitSetupOutcome::Success { .. } => Ok(()),
            _ => anyhow::bail!("git teardown failed"),
        }
    }

    fn pause(&mut self) {
        self.state = SessionState::Paused;
    }

    fn resume(&mut self) {
        if self.state == SessionState::Paused {
            self.state = SessionState::Running;
        }
    }

    async fn terminate(&mut self) -> anyhow::Result<()> {
        self.terminating_flag.store(true, Ordering::Relaxed);
        self.state = SessionState::Terminating;
        for env in self.environments.values() {
            let _ = env.teardown().await;
        }
        self.state = SessionState::Terminated;
        Ok(())
    }

    async fn submit(&mut self, content: &str) -> anyhow::Result<()> {
        self.event_log.append(EventType::Task { content: content.to_string() });
        self.run_until_idle().await
    }

    fn interrupt(&mut self, content: &str) {
        self.event_log.append(EventType::Interrupt { content: content.to_string() });
    }

    fn resolve_git(&mut self, approved: bool) {
        self.event_log.append(EventType::GitResolve { approved });
        self.pending_git_question = None;
    }

    fn diff(&self, src_checkpoint_id: &str, dst_checkpoint_id: &str) -> anyhow::Result<Vec<(String, Option<String>, Option<String>)>> {
        let Some(versioning) = &self.versioning else { anyhow::bail!("versioning disabled for this session") };
        let src = self.checkpoint_commit(src_checkpoint_id).ok_or_else(|| anyhow::anyhow!("unknown checkpoint {src_checkpoint_id}"))?;
        let dst = self.checkpoint_commit(dst_checkpoint_id).ok_or_else(|| anyhow::anyhow!("unknown checkpoint {dst_checkpoint_id}"))?;
        Ok(versioning.diff_files(&src, &dst)?)
    }

    async fn revert(&mut self, checkpoint_id: &str) -> anyhow::Result<()> {
        let Some(versioning) = &self.versioning else { anyhow::bail!("versioning disabled for this session") };
        let checkpoint = versioning.revert(&mut self.versioning_state, checkpoint_id)?;

        self.event_log.truncate((checkpoint.event_id + 1) as usize);
        self.transcript = restore_transcript(&checkpoint.agent_history);
        self.current_task = None;
        self.last_observation = None;
        self.last_action = None;

        for env in self.environments.values() {
            env.setup().await?;
        }
        self.state = SessionState::Paused;
        Ok(())
    }
}

/// Rebuild `chat_history` entries from a checkpoint's `agent_history` blob
/// (the `[role_debug_name, content]` pairs `Session::transcript_snapshot`
/// produces).
fn restore_transcript(agent_history: &serde_json::Value) -> Vec<TranscriptEntry> {
    let Some(entries) = agent_history.as_array() else { return Vec::new() };
    entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let role = match pair.first()?.as_str()? {
                "Assistant" => Role::Assistant,
                "System" => Role::System,
                _ => Role::User,
            };
            let content = pair.get(1)?.as_str()?.to_string();
            Some(TranscriptEntry { role, content })
        })
        .collect()
}

fn shell_command_from_call(call: &ToolCallData) -> String {
    if let Some(s) = call.args.as_str() {
        return s.to_string();
    }
    if let Some(obj) = call.args.as_object() {
        if let Some(s) = obj.values().find_map(|v| v.as_str()) {
            return s.to_string();
        }
    }
    call.name.clone()
}

fn default_system_prompt() -> String {
    "You are an autonomous coding assistant. Respond with a <THOUGHT> tag explaining your \
     reasoning and a <COMMAND> tag naming the tool to call, e.g. \
     <COMMAND>shell {\"shell_command\": \"ls\"}</COMMAND>. Call the `submit` tool when the task is done."
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_model::mock::ScriptedProvider;
    use tempfile::TempDir;

    fn config() -> Config {
        let mut c = Config::default();
        c.versioning.enabled = false;
        c
    }

    fn session(dir: &TempDir, model: Arc<dyn ModelProvider>) -> Session {
        Session::new(config(), dir.path().to_path_buf(), model, None, Arc::new(AlwaysNo))
    }

    #[tokio::test]
    async fn submit_does_not_pause_but_loops_back_for_revisions() {
        let dir = TempDir::new().unwrap();
        // ask_user alone would loop forever waiting for another ModelRequest;
        // give the script a second reply that submits.
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text(
                "<THOUGHT>say hi</THOUGHT><COMMAND>ask_user {\"message\": \"hi\"}</COMMAND>".into(),
            ),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model);
        s.submit("say hi to the user").await.unwrap();
        // No more scripted replies are left for the follow-up task the
        // `submit` Stop appends, so the loop runs off the end of the script
        // and terminates rather than sitting `Paused`.
        assert_eq!(s.state, SessionState::Terminated);
        assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
        assert!(s.event_log.iter().any(
            |e| matches!(&e.event_type, EventType::Task { content } if content.contains("ask user for revisions"))
        ));
    }

    #[tokio::test]
    async fn hallucinated_response_is_retried() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text("garbage with no tags".into()),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model);
        s.submit("do something").await.unwrap();
        assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
    }

    #[tokio::test]
    async fn a_thought_only_reply_is_treated_as_a_hallucination() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>just thinking, no command</THOUGHT>".into()),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model);
        s.submit("do something").await.unwrap();
        assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::RateLimited,
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model);
        s.submit("do something").await.unwrap();
        assert!(s.event_log.iter().any(|e| matches!(e.event_type, EventType::RateLimit { .. })));
        assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
    }

    #[tokio::test]
    async fn rate_limit_sleep_is_cancelled_by_the_terminate_flag() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s = session(&dir, model);
        s.terminating_flag.store(true, Ordering::Relaxed);
        s.event_log.append(EventType::RateLimit { retry_after_secs: 30 });
        let start = std::time::Instant::now();
        assert!(!s.dispatch_once().await.unwrap());
        assert!(start.elapsed() < std::time::Duration::from_secs(5), "cancellation must not wait out the full sleep");
        assert_eq!(s.state, SessionState::Terminating);
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_to_shell() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>list</THOUGHT><COMMAND>totally_unknown_tool {\"shell_command\": \"echo hi\"}</COMMAND>".into()),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model);
        s.submit("run something").await.unwrap();
        assert!(s.event_log.iter().any(|e| matches!(e.event_type, EventType::ShellRequest { .. })));
    }

    #[tokio::test]
    async fn interrupt_halts_without_appending_a_new_event() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s = session(&dir, model);
        s.event_log.append(EventType::Interrupt { content: "stop that".into() });
        let before = s.event_log.len();
        assert!(!s.dispatch_once().await.unwrap());
        assert_eq!(s.event_log.len(), before);
        assert_eq!(s.pending_interrupts, vec!["stop that".to_string()]);
    }

    #[tokio::test]
    async fn terminate_tears_down_environments() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s = session(&dir, model);
        s.terminate().await.unwrap();
        assert_eq!(s.state, SessionState::Terminated);
    }

    #[tokio::test]
    async fn to_record_and_restore_round_trips_the_event_log() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s = session(&dir, model);
        s.submit("remember this").await.unwrap();
        let record = s.to_record();

        let model2 = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s2 = session(&dir, model2);
        s2.restore(&record).await.unwrap();
        assert_eq!(s2.event_log.len(), s.event_log.len());
    }

    #[tokio::test]
    async fn an_interrupt_is_spliced_into_the_next_prediction_observation() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text(
                "<THOUGHT>work</THOUGHT><COMMAND>shell {\"shell_command\": \"echo hi\"}</COMMAND>".into(),
            ),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = session(&dir, model.clone());
        s.event_log.append(EventType::Task { content: "do a thing".into() });
        assert!(s.dispatch_once().await.unwrap()); // Task -> ModelRequest
        assert!(s.dispatch_once().await.unwrap()); // ModelRequest -> ModelResponse
        assert!(s.dispatch_once().await.unwrap()); // ModelResponse -> ToolRequest
        assert!(s.dispatch_once().await.unwrap()); // ToolRequest (registered "shell") -> ToolResponse
        assert!(s.dispatch_once().await.unwrap()); // ToolResponse -> ModelRequest (sets last_observation)

        s.event_log.append(EventType::Interrupt { content: "stop and check the logs first".into() });
        assert!(!s.dispatch_once().await.unwrap());

        // ToolResponse already queued a ModelRequest before the interrupt
        // arrived; dispatch it now and confirm the interrupt text rode along.
        s.event_log.append(EventType::ModelRequest);
        assert!(s.dispatch_once().await.unwrap());
        let last = model.last_request.lock().unwrap();
        let user_msg = &last.as_ref().unwrap().messages.last().unwrap().content;
        assert!(user_msg.contains("stop and check the logs first"));
        assert!(s.pending_interrupts.is_empty());
    }

    fn git_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git").args(args).current_dir(dir.path()).status().unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "kestrel@example.com"]);
        run(&["config", "user.name", "kestrel"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
        dir
    }

    fn git_session(dir: &TempDir, model: Arc<dyn ModelProvider>) -> Session {
        let mut c = Config::default();
        c.versioning.enabled = true;
        Session::new(c, dir.path().to_path_buf(), model, None, Arc::new(kestrel_versioning::AlwaysYes))
    }

    #[tokio::test]
    async fn revert_resets_the_working_tree_and_truncates_the_event_log() {
        let dir = git_dir();
        let model = Arc::new(ScriptedProvider::new(vec![
            kestrel_model::mock::ScriptedReply::Text(
                "<THOUGHT>checkpoint</THOUGHT>\n<COMMAND>ask_user {\"message\": \"ok?\", \"commit_message\": \"v1\"}</COMMAND>".into(),
            ),
            kestrel_model::mock::ScriptedReply::Text(
                "<THOUGHT>more work</THOUGHT>\n<COMMAND>shell {\"shell_command\": \"echo v2 > f.txt\"}</COMMAND>".into(),
            ),
            kestrel_model::mock::ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
        ]));
        let mut s = git_session(&dir, model);
        s.git_new().await.unwrap();
        s.submit("checkpoint then write").await.unwrap();

        let checkpoint_id = s
            .event_log
            .iter()
            .find_map(|e| match &e.event_type {
                EventType::Checkpoint { checkpoint_id } => Some(checkpoint_id.clone()),
                _ => None,
            })
            .expect("a checkpoint must have been recorded");
        let events_before_revert = s.event_log.len();

        assert!(dir.path().join("f.txt").exists());
        s.revert(&checkpoint_id).await.unwrap();
        assert!(!dir.path().join("f.txt").exists());
        assert!(s.event_log.len() < events_before_revert);
        assert_eq!(s.state, SessionState::Paused);
    }

    #[tokio::test]
    async fn git_load_note_is_a_chat_turn_and_does_not_overwrite_the_current_task() {
        let dir = git_dir();
        let model = Arc::new(ScriptedProvider::always("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>"));
        let mut s = git_session(&dir, model);
        s.git_new().await.unwrap();
        s.current_task = Some("the real task".into());

        // A commit lands on the agent branch outside this session, so the
        // next `git_load` surfaces a drift note.
        std::fs::write(dir.path().join("extra.txt"), "x").unwrap();
        std::process::Command::new("git").args(["add", "-A"]).current_dir(dir.path()).status().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "out of band"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        s.git_load().await.unwrap();

        assert_eq!(s.current_task.as_deref(), Some("the real task"));
        assert!(s.transcript.iter().any(|e| e.content.contains("new commit")));
    }
}
