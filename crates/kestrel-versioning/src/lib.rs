// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Git lifecycle controller implementing the versioning state machine
//! (SPEC_FULL.md §4.5): three logical branches (user branch, the reserved
//! agent branch, and an error-state "third branch"), the four actions
//! {new, load, reset, teardown}, and the Checkpoint/merge/revert machinery
//! that lets the session runtime isolate agent edits on their own branch.
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Wall-clock bound on any single git subprocess invocation. Grounded in the
/// teacher's `run_git_timed` idiom (spawn in a thread, `mpsc::recv_timeout`).
const GIT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("git {args}: {stderr}")]
    CommandFailed { args: String, stderr: String },
    #[error("not a git repository: {0}")]
    NotARepo(PathBuf),
    #[error("session is unrecoverable: {0}")]
    Corrupted(String),
}

/// Run a git subcommand in `dir`, bounded by [`GIT_TIMEOUT`]. Returns
/// trimmed stdout on success.
fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let (tx, rx) = mpsc::channel();
    let dir = dir.to_path_buf();
    let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let joined = owned_args.join(" ");
    std::thread::spawn(move || {
        let result = Command::new("git").args(&owned_args).current_dir(&dir).output();
        let _ = tx.send(result);
    });

    let output = rx
        .recv_timeout(GIT_TIMEOUT)
        .map_err(|_| GitError::Timeout(GIT_TIMEOUT))??;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(GitError::CommandFailed {
            args: joined,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Outcome of [`VersioningController::git_setup`] (§4.5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitSetupOutcome {
    /// `note` carries an informational message to surface as a synthetic
    /// user turn (§4.5's "load" case: out-of-band commits or clobbers).
    Success { note: Option<String> },
    /// A user-resolved error occurred; retry the action.
    Retry,
    /// Versioning disabled for this session; fall back to `versioning_type=none`.
    Disabled,
    /// The session is unrecoverable without a reset.
    Corrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitAction {
    New,
    Load,
    Reset,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointAuthor {
    User,
    Agent,
}

/// A snapshot marker (§3). `agent_history`/`state` are opaque JSON blobs —
/// the versioning crate never interprets session/agent internals, only
/// round-trips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub event_id: u64,
    pub agent_history: serde_json::Value,
    pub state: serde_json::Value,
    pub merged_commit: Option<String>,
    pub author: CheckpointAuthor,
    pub src_branch: String,
}

pub const NO_COMMIT: &str = "no_commit";

fn new_checkpoint_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Everything the versioning controller needs to remember between actions
/// (a slice of `SessionConfig`/`versioning_metadata`, §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersioningState {
    pub user_branch: Option<String>,
    pub checkpoints: Vec<Checkpoint>,
}

/// User-mediated confirmation seam for the `GitAskUser`/`GitResolve`
/// protocol (§4.5.4). The session runtime implements this by appending a
/// `GitAskUser` event and blocking for a matching `GitResolve`; tests use a
/// fixed-answer implementation.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

pub struct AlwaysYes;
impl Prompter for AlwaysYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

pub struct AlwaysNo;
impl Prompter for AlwaysNo {
    fn confirm(&self, _question: &str) -> bool {
        false
    }
}

/// Git lifecycle controller bound to one working directory and one reserved
/// agent branch name (§6.5: `theseus_agent` by default, reserved).
pub struct VersioningController {
    pub project_path: PathBuf,
    pub agent_branch: String,
}

impl VersioningController {
    pub fn new(project_path: impl Into<PathBuf>, agent_branch: impl Into<String>) -> Self {
        Self { project_path: project_path.into(), agent_branch: agent_branch.into() }
    }

    fn git(&self, args: &[&str]) -> Result<String, GitError> {
        run_git(&self.project_path, args)
    }

    pub fn is_git_repo(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"]).is_ok()
    }

    pub fn current_branch(&self) -> Result<String, GitError> {
        self.git(&["branch", "--show-current"])
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.git(&["rev-parse", "--verify", name]).is_ok()
    }

    fn head_hash(&self) -> Result<String, GitError> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let unstaged = self.git(&["diff", "--name-status"])?;
        let staged = self.git(&["diff", "--cached", "--name-status"])?;
        let untracked = self.git(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(!unstaged.is_empty() || !staged.is_empty() || !untracked.is_empty())
    }

    /// `git log --oneline old..new`, one subject line per new commit.
    pub fn find_new_commits(&self, old: &str, new: &str) -> Result<Vec<String>, GitError> {
        let range = format!("{old}..{new}");
        let out = self.git(&["log", "--oneline", &range])?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    /// Whether `commit_hash` (compared using its full SHA, per Open Question
    /// decision — truncated 8-char comparisons risk collisions on large
    /// histories) is present in the branch's log.
    fn commit_reachable(&self, commit_hash: &str) -> bool {
        if commit_hash == NO_COMMIT {
            return true;
        }
        self.git(&["log", "--format=%H"])
            .map(|log| log.lines().any(|h| h == commit_hash))
            .unwrap_or(false)
    }

    fn create_and_checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.git(&["switch", "-c", name])?;
        Ok(())
    }

    pub fn checkout(&self, name: &str) -> Result<(), GitError> {
        self.git(&["switch", name])?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.git(&["branch", "-D", name])?;
        Ok(())
    }

    fn merge_branch(&self, name: &str) -> Result<(), GitError> {
        self.git(&["merge", name])?;
        Ok(())
    }

    /// `git add -A && git commit [--allow-empty] -m message`, returns the
    /// new commit's full SHA.
    pub fn commit_all(&self, message: &str, allow_empty: bool) -> Result<String, GitError> {
        self.git(&["add", "-A"])?;
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.git(&args)?;
        self.head_hash()
    }

    fn diff_patch(&self, src: &str, dst: &str) -> Result<String, GitError> {
        self.git(&["diff", "-p", src, dst])
    }

    fn show_file(&self, commit: &str, path: &str) -> Option<String> {
        self.git(&["show", &format!("{commit}:{path}")]).ok()
    }

    /// Per-file `(before, after)` content pairs that changed between two
    /// commits, grounded in the original `get_diff_list`/`get_file_content`
    /// pattern (`git show commit:file`). Backs the `diff(name, src_id,
    /// dst_id)` session-control operation (§6.1): `name` resolves to a
    /// checkpoint's `commit_hash` at the caller, this method only needs the
    /// two resolved commits.
    pub fn diff_files(&self, src_commit: &str, dst_commit: &str) -> Result<Vec<(String, Option<String>, Option<String>)>, GitError> {
        let names = self.git(&["diff", "--name-only", src_commit, dst_commit])?;
        let mut out = Vec::new();
        for path in names.lines().filter(|l| !l.is_empty()) {
            let before = self.show_file(src_commit, path);
            let after = self.show_file(dst_commit, path);
            out.push((path.to_string(), before, after));
        }
        Ok(out)
    }

    fn apply_patch_text(&self, patch: &str) -> Result<(), GitError> {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("kestrel-patch-{}.diff", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, patch).map_err(GitError::Spawn)?;
        let result = self.git(&["apply", "--allow-empty", tmp.to_string_lossy().as_ref()]);
        let _ = std::fs::remove_file(&tmp);
        result.map(|_| ())
    }

    fn reset_hard(&self, commit: &str) -> Result<(), GitError> {
        self.git(&["reset", "--hard", commit])?;
        self.git(&["clean", "-fd"])?;
        Ok(())
    }

    // ── §4.5.1 Actions ────────────────────────────────────────────────────

    pub fn git_setup(
        &self,
        action: GitAction,
        state: &mut VersioningState,
        prompter: &dyn Prompter,
    ) -> GitSetupOutcome {
        match action {
            GitAction::New => self.action_new(state, prompter),
            GitAction::Load => self.action_load(state, prompter),
            GitAction::Reset => self.action_reset(state, prompter),
            GitAction::Teardown => self.action_teardown(state),
        }
    }

    fn action_new(&self, state: &mut VersioningState, prompter: &dyn Prompter) -> GitSetupOutcome {
        if !self.is_git_repo() {
            if !prompter.confirm("This directory is not a git repository. Initialize one?") {
                return GitSetupOutcome::Disabled;
            }
            if self.git(&["init"]).is_err() {
                return GitSetupOutcome::Corrupted;
            }
            if self.commit_all("Initial commit", true).is_err() {
                return GitSetupOutcome::Corrupted;
            }
        }

        let current = match self.current_branch() {
            Ok(b) => b,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        // Open Question decision: being on the reserved branch is only an
        // error during `new` (load treats it as the expected steady state).
        if current == self.agent_branch {
            warn!(branch = %current, "current branch is the reserved agent branch during new");
            return if prompter.confirm("You are already on the agent branch. Resolve manually, then retry?") {
                GitSetupOutcome::Retry
            } else {
                GitSetupOutcome::Corrupted
            };
        }

        state.user_branch = Some(current.clone());
        let _ = self.has_uncommitted_changes(); // informational only, per §4.5.1

        let last_commit = match self.head_hash() {
            Ok(h) => h,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        if self.branch_exists(&self.agent_branch) {
            if !prompter.confirm("A stale agent branch already exists. Delete it?") {
                return GitSetupOutcome::Disabled;
            }
            if self.delete_branch(&self.agent_branch).is_err() {
                return GitSetupOutcome::Corrupted;
            }
        }

        if self.create_and_checkout_branch(&self.agent_branch).is_err() {
            return GitSetupOutcome::Corrupted;
        }
        let commit_hash = match self.commit_all("Initial commit", true) {
            Ok(h) => h,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        state.checkpoints = vec![Checkpoint {
            checkpoint_id: new_checkpoint_id(),
            commit_hash,
            commit_message: "Initial commit".into(),
            event_id: 0,
            agent_history: serde_json::Value::Array(vec![]),
            state: serde_json::Value::Object(Default::default()),
            merged_commit: Some(last_commit),
            author: CheckpointAuthor::Agent,
            src_branch: self.agent_branch.clone(),
        }];

        GitSetupOutcome::Success { note: None }
    }

    fn action_load(&self, state: &mut VersioningState, prompter: &dyn Prompter) -> GitSetupOutcome {
        if !self.is_git_repo() {
            return GitSetupOutcome::Corrupted;
        }

        let mut current = match self.current_branch() {
            Ok(b) => b,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        let user_branch = state.user_branch.clone();
        let known = current == self.agent_branch || Some(&current) == user_branch.as_ref();
        if !known {
            if !prompter.confirm(&format!(
                "Current branch '{current}' is neither the user branch nor the agent branch. Switch to the agent branch?"
            )) {
                return GitSetupOutcome::Corrupted;
            }
            if self.checkout(&self.agent_branch).is_err() {
                return GitSetupOutcome::Corrupted;
            }
            current = self.agent_branch.clone();
        }

        if Some(&current) == user_branch.as_ref() {
            let last_checkpoint = state.checkpoints.last();
            let base = last_checkpoint.and_then(|c| c.merged_commit.clone());
            let head = match self.head_hash() {
                Ok(h) => h,
                Err(_) => return GitSetupOutcome::Corrupted,
            };
            let diverged = match &base {
                Some(b) => b != &head,
                None => true,
            };
            let dirty = self.has_uncommitted_changes().unwrap_or(false);
            if diverged || dirty {
                if self.checkout(&self.agent_branch).is_err() {
                    return GitSetupOutcome::Corrupted;
                }
                if self.merge_branch(&current).is_err() {
                    return GitSetupOutcome::Corrupted;
                }
            }
            return GitSetupOutcome::Success { note: None };
        }

        // current == agent branch
        for checkpoint in &state.checkpoints {
            if !self.commit_reachable(&checkpoint.commit_hash) {
                return GitSetupOutcome::Corrupted;
            }
        }

        let last = state.checkpoints.last();
        let old = last.map(|c| c.commit_hash.clone()).unwrap_or_else(|| NO_COMMIT.into());
        let head = match self.head_hash() {
            Ok(h) => h,
            Err(_) => return GitSetupOutcome::Corrupted,
        };
        let new_commits = if old == NO_COMMIT { Vec::new() } else { self.find_new_commits(&old, &head).unwrap_or_default() };
        let dirty = self.has_uncommitted_changes().unwrap_or(false);

        let note = if !new_commits.is_empty() || dirty {
            Some(format!(
                "The working tree changed outside this session: {} new commit(s){}.",
                new_commits.len(),
                if dirty { " and uncommitted changes" } else { "" }
            ))
        } else {
            None
        };

        GitSetupOutcome::Success { note }
    }

    fn action_reset(&self, state: &mut VersioningState, prompter: &dyn Prompter) -> GitSetupOutcome {
        if let Ok(current) = self.current_branch() {
            if current == self.agent_branch {
                if let Some(user_branch) = &state.user_branch {
                    if self.checkout(user_branch).is_err() {
                        return GitSetupOutcome::Corrupted;
                    }
                }
            }
        }

        if !matches!(self.action_teardown(state), GitSetupOutcome::Success { .. }) {
            return GitSetupOutcome::Corrupted;
        }

        if self.branch_exists(&self.agent_branch) {
            if self.delete_branch(&self.agent_branch).is_err() {
                return GitSetupOutcome::Corrupted;
            }
        }

        self.action_new(state, prompter)
    }

    fn action_teardown(&self, state: &mut VersioningState) -> GitSetupOutcome {
        let current = match self.current_branch() {
            Ok(b) => b,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        if Some(&current) == state.user_branch.as_ref() || current != self.agent_branch {
            return GitSetupOutcome::Success { note: None };
        }

        let Some(user_branch) = state.user_branch.clone() else {
            return GitSetupOutcome::Success { note: None };
        };
        let Some(first) = state.checkpoints.first() else {
            return GitSetupOutcome::Success { note: None };
        };

        // Decision (Open Question): squash against the cumulative agent-branch
        // HEAD, not the first checkpoint's own commit — otherwise nothing
        // after the initial commit is captured.
        let base = first.merged_commit.clone().unwrap_or_else(|| first.commit_hash.clone());
        let head = match self.head_hash() {
            Ok(h) => h,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        let patch = match self.diff_patch(&base, &head) {
            Ok(p) => p,
            Err(_) => return GitSetupOutcome::Corrupted,
        };

        if self.checkout(&user_branch).is_err() {
            return GitSetupOutcome::Corrupted;
        }
        if !patch.trim().is_empty() && self.apply_patch_text(&patch).is_err() {
            warn!("teardown patch failed to apply cleanly onto the user branch");
        }

        GitSetupOutcome::Success { note: None }
    }

    // ── §4.5.2 Checkpoints ────────────────────────────────────────────────

    /// Create a Checkpoint by committing the current working tree with
    /// `commit_message`, then recording the result.
    pub fn create_checkpoint(
        &self,
        state: &mut VersioningState,
        commit_message: &str,
        event_id: u64,
        agent_history: serde_json::Value,
        session_state: serde_json::Value,
        author: CheckpointAuthor,
    ) -> Result<Checkpoint, GitError> {
        let commit_hash = self.commit_all(commit_message, false)?;
        let checkpoint = Checkpoint {
            checkpoint_id: new_checkpoint_id(),
            commit_hash,
            commit_message: commit_message.to_string(),
            event_id,
            agent_history,
            state: session_state,
            merged_commit: None,
            author,
            src_branch: self.agent_branch.clone(),
        };
        state.checkpoints.push(checkpoint.clone());
        debug!(checkpoint_id = %checkpoint.checkpoint_id, "checkpoint created");
        Ok(checkpoint)
    }

    /// Revert to `checkpoint_id`: truncate `checkpoints` to that entry
    /// (inclusive), hard-reset the working tree when it has a real commit,
    /// and return the target checkpoint for the caller to restore
    /// `chat_history`/session state and truncate the event log.
    pub fn revert(&self, state: &mut VersioningState, checkpoint_id: &str) -> Result<Checkpoint, GitError> {
        let idx = state
            .checkpoints
            .iter()
            .position(|c| c.checkpoint_id == checkpoint_id)
            .ok_or_else(|| GitError::Corrupted(format!("unknown checkpoint {checkpoint_id}")))?;

        state.checkpoints.truncate(idx + 1);
        let target = state.checkpoints[idx].clone();

        if target.commit_hash != NO_COMMIT {
            self.reset_hard(&target.commit_hash)?;
        }

        Ok(target)
    }

    // ── §4.5.3 Merge ──────────────────────────────────────────────────────

    /// Merge the agent branch's cumulative work back into the user branch.
    /// Any step failure checks back out onto the agent branch before
    /// returning — no partial merges are left in place.
    pub fn merge(&self, state: &mut VersioningState, commit_message: &str) -> Result<String, GitError> {
        let current = self.current_branch()?;
        if current != self.agent_branch {
            return Err(GitError::Corrupted("merge requires the agent branch to be checked out".into()));
        }
        let Some(user_branch) = state.user_branch.clone() else {
            return Err(GitError::Corrupted("no recorded user branch".into()));
        };

        let merge_idx = state.checkpoints.iter().rposition(|c| c.merged_commit.is_some());
        let Some(merge_idx) = merge_idx else {
            return Err(GitError::Corrupted("no checkpoint has a merged_commit to diff from".into()));
        };
        let base = state.checkpoints[merge_idx].merged_commit.clone().unwrap();
        let head = self.head_hash()?;

        let run = || -> Result<String, GitError> {
            let patch = self.diff_patch(&base, &head)?;
            self.checkout(&user_branch)?;
            if !patch.trim().is_empty() {
                self.apply_patch_text(&patch)?;
            }
            let new_commit = self.commit_all(commit_message, true)?;
            self.checkout(&self.agent_branch)?;
            Ok(new_commit)
        };

        match run() {
            Ok(new_commit) => {
                state.checkpoints[merge_idx].merged_commit = Some(new_commit.clone());
                Ok(new_commit)
            }
            Err(e) => {
                let _ = self.checkout(&self.agent_branch);
                Err(e)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
