// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios (SPEC_FULL.md §8) driving `Session` through
//! `SessionControl` with a scripted model provider and a real git
//! repository in a `tempfile::TempDir`.
use std::process::Command;
use std::sync::Arc;

use kestrel_config::Config;
use kestrel_core::{EventType, Session, SessionControl, SessionState};
use kestrel_model::mock::{ScriptedProvider, ScriptedReply};
use kestrel_versioning::AlwaysYes;
use tempfile::TempDir;

fn git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        let status = Command::new("git").args(args).current_dir(dir.path()).status().unwrap();
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

fn scripted(replies: Vec<ScriptedReply>) -> Arc<dyn kestrel_model::ModelProvider> {
    Arc::new(ScriptedProvider::new(replies))
}

fn session(dir: &TempDir, model: Arc<dyn kestrel_model::ModelProvider>) -> Session {
    Session::new(Config::default(), dir.path().to_path_buf(), model, None, Arc::new(AlwaysYes))
}

/// Scenario: happy add-file. A fresh session creates a file via `shell` then
/// submits; the file lands on disk and the follow-up revision task runs the
/// script dry, ending the session.
#[tokio::test]
async fn happy_add_file() {
    let dir = git_repo();
    let model = scripted(vec![
        ScriptedReply::Text(
            "<THOUGHT>create the file</THOUGHT>\n<COMMAND>shell {\"shell_command\": \"echo hi > new.txt\"}</COMMAND>".into(),
        ),
        ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
    ]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.submit("add a file").await.unwrap();
    assert_eq!(s.state, SessionState::Terminated);
    assert!(dir.path().join("new.txt").exists());
}

/// Scenario: hallucination recovery. A malformed completion is followed by a
/// well-formed one; the session must not get stuck and must still reach
/// `submit`.
#[tokio::test]
async fn hallucination_recovery() {
    let dir = git_repo();
    let model = scripted(vec![
        ScriptedReply::Text("not a tagged response at all".into()),
        ScriptedReply::Text("<THOUGHT>ok now</THOUGHT><COMMAND>submit</COMMAND>".into()),
    ]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.submit("do something").await.unwrap();
    assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
    assert!(s.event_log.iter().filter(|e| matches!(e.event_type, EventType::ModelRequest)).count() >= 2);
}

/// Scenario: rate-limit retry. The provider rate-limits once, then succeeds;
/// the session should record a `RateLimit` event and still complete.
#[tokio::test]
async fn rate_limit_retry() {
    let dir = git_repo();
    let model = scripted(vec![
        ScriptedReply::RateLimited,
        ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into()),
    ]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.submit("do something").await.unwrap();
    assert!(s.event_log.iter().any(|e| matches!(e.event_type, EventType::RateLimit { .. })));
    assert!(s.event_log.iter().any(|e| matches!(&e.event_type, EventType::Stop { reason } if reason == "submit")));
}

/// Scenario: revert. A checkpoint is created via `ask_user` with a
/// `commit_message`, more work happens after it, then `revert` rolls the
/// session and the working tree back — the file written after the checkpoint
/// must be gone from disk.
#[tokio::test]
async fn revert_restores_the_checkpointed_working_tree() {
    let dir = git_repo();
    let model = scripted(vec![
        ScriptedReply::Text(
            "<THOUGHT>checkpoint</THOUGHT>\n<COMMAND>ask_user {\"message\": \"ok?\", \"commit_message\": \"v1\"}</COMMAND>".into(),
        ),
        ScriptedReply::Text(
            "<THOUGHT>write more</THOUGHT>\n<COMMAND>shell {\"shell_command\": \"echo v2 > f.txt\"}</COMMAND>".into(),
        ),
        ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
    ]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.submit("checkpoint then write more").await.unwrap();

    let checkpoint_id = s
        .event_log
        .iter()
        .find_map(|e| match &e.event_type {
            EventType::Checkpoint { checkpoint_id } => Some(checkpoint_id.clone()),
            _ => None,
        })
        .expect("a checkpoint must have been recorded");

    assert!(dir.path().join("f.txt").exists(), "the post-checkpoint write must have landed first");
    s.revert(&checkpoint_id).await.unwrap();
    assert!(!dir.path().join("f.txt").exists(), "revert must roll the working tree back to the checkpoint");
    assert_eq!(s.state, SessionState::Paused);
}

/// Scenario: merge. Two independent checkpoints created within the same
/// session both land on the agent branch's commit history.
#[tokio::test]
async fn merge_preserves_both_checkpoints() {
    let dir = git_repo();
    let model = scripted(vec![
        ScriptedReply::Text(
            "<THOUGHT>first</THOUGHT>\n<COMMAND>ask_user {\"message\": \"a\", \"commit_message\": \"first\"}</COMMAND>".into(),
        ),
        ScriptedReply::Text(
            "<THOUGHT>second</THOUGHT>\n<COMMAND>ask_user {\"message\": \"b\", \"commit_message\": \"second\"}</COMMAND>".into(),
        ),
        ScriptedReply::Text("<THOUGHT>done</THOUGHT><COMMAND>submit</COMMAND>".into()),
    ]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.submit("make two checkpoints").await.unwrap();

    let checkpoints: Vec<_> = s
        .event_log
        .iter()
        .filter_map(|e| match &e.event_type {
            EventType::Checkpoint { checkpoint_id } => Some(checkpoint_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(checkpoints.len(), 2);
}

/// Scenario: user clobber on load. Loading a session after a prior one left
/// commits on the agent branch must not fail outright.
#[tokio::test]
async fn user_clobber_on_load_is_handled() {
    let dir = git_repo();
    let model = scripted(vec![ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into())]);
    let mut s = session(&dir, model);
    s.git_new().await.unwrap();
    s.terminate().await.unwrap();

    let model2 = scripted(vec![ScriptedReply::Text("<THOUGHT>ok</THOUGHT><COMMAND>submit</COMMAND>".into())]);
    let mut s2 = session(&dir, model2);
    let result = s2.git_load().await;
    assert!(result.is_ok(), "loading an existing agent branch must not error");
}
