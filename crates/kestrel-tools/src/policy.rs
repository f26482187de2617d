// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shell-command approval policy (SPEC_FULL.md §10.1): an ambient safety
//! concern carried over from the teacher even though the distilled spec
//! names no approval-policy module of its own.
use kestrel_config::ToolsConfig;
use regex::Regex;

/// What a tool invocation should do before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Run without prompting.
    Auto,
    /// Prompt for confirmation before running.
    Ask,
    /// Refuse to run.
    Deny,
}

/// One compiled glob rule paired with the verdict it carries. Rules are
/// tried in order; the first match wins. Built by `ToolPolicy::from_config`
/// with deny rules ahead of auto-approve rules, so a command matching both
/// lists is denied — no separate priority pass is needed.
struct Rule {
    pattern: Regex,
    verdict: ApprovalPolicy,
}

/// Approval engine for shell commands, built from a `ToolsConfig`'s
/// glob pattern lists.
pub struct ToolPolicy {
    rules: Vec<Rule>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let mut rules = Vec::with_capacity(cfg.deny_patterns.len() + cfg.auto_approve_patterns.len());
        for pattern in &cfg.deny_patterns {
            if let Some(pattern) = glob_to_regex(pattern) {
                rules.push(Rule { pattern, verdict: ApprovalPolicy::Deny });
            }
        }
        for pattern in &cfg.auto_approve_patterns {
            if let Some(pattern) = glob_to_regex(pattern) {
                rules.push(Rule { pattern, verdict: ApprovalPolicy::Auto });
            }
        }
        Self { rules }
    }

    /// Decide whether `command` should run automatically, prompt the user,
    /// or be refused. Falls back to `Ask` when nothing matches.
    pub fn decide(&self, command: &str) -> ApprovalPolicy {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(command))
            .map(|rule| rule.verdict)
            .unwrap_or(ApprovalPolicy::Ask)
    }
}

/// Translate a shell glob (`*` = any run of characters, `?` = exactly one
/// character, everything else literal) into an anchored [`Regex`].
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut anchored = String::from("^");
    let mut literal_run = String::new();

    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                if !literal_run.is_empty() {
                    anchored.push_str(&regex::escape(&literal_run));
                    literal_run.clear();
                }
                anchored.push_str(if ch == '*' { ".*" } else { "." });
            }
            c => literal_run.push(c),
        }
    }
    if !literal_run.is_empty() {
        anchored.push_str(&regex::escape(&literal_run));
    }
    anchored.push('$');

    Regex::new(&anchored).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
