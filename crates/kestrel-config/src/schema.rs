// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentRuntimeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub versioning: VersioningConfig,
}

/// Ambient configuration for the model backend this session talks to.
///
/// The concrete wire client is a named interface only (SPEC_FULL.md §1);
/// this struct carries what a `kestrel_model::ModelProvider` implementation
/// would need to construct itself, matching `AgentConfig.model` /
/// `.api_key` / `.api_base` / `.prompt_type` from the data model (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider tag, e.g. "openai" | "anthropic" | "mock".
    pub provider: String,
    /// Model identifier forwarded to the provider.
    pub name: String,
    /// Environment variable that holds the API key.
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Prompt family used to build the system/user messages (§4.3):
    /// "openai" | "anthropic".
    #[serde(default = "default_prompt_family")]
    pub prompt_family: PromptFamily,
}

fn default_temperature() -> f32 {
    0.0
}
fn default_prompt_family() -> PromptFamily {
    PromptFamily::Openai
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: default_temperature(),
            prompt_family: default_prompt_family(),
        }
    }
}

/// Reified tagged enumeration of prompt families, per Design Note §9 ("the
/// Agent's `prompt_type` becomes a discriminated enum value, not a string").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PromptFamily {
    Openai,
    Anthropic,
}

impl std::fmt::Display for PromptFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptFamily::Openai => write!(f, "openai"),
            PromptFamily::Anthropic => write!(f, "anthropic"),
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeConfig {
    /// Maximum number of `ToolRequest`/`ToolResponse` round trips within a
    /// single task cycle before the runtime forces a `Stop`.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Per-step wall-clock timeout in seconds (0 = no limit).
    #[serde(default)]
    pub max_step_timeout_secs: u64,
    /// Total run wall-clock timeout in seconds (0 = no limit).
    #[serde(default)]
    pub max_run_timeout_secs: u64,
    /// System prompt override; leave None to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_step_timeout_secs: 0,
            max_run_timeout_secs: 0,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single shell `execute` call (SPEC_FULL.md
    /// §4.2's local-shell `timeout` parameter).
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_shell_timeout_secs() -> u64 {
    25
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["cat *".into(), "ls *".into(), "grep *".into()],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: default_shell_timeout_secs(),
        }
    }
}

fn default_agent_branch() -> String {
    "theseus_agent".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Whether the git lifecycle state machine (§4.5) is engaged at all.
    /// Maps to `SessionConfig.versioning_type` ∈ {git, none}.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reserved branch name (§6.5). Overridable for tests only; production
    /// use should keep the default so the working-tree contract holds.
    #[serde(default = "default_agent_branch")]
    pub agent_branch: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self { enabled: true, agent_branch: default_agent_branch() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_model_provider_is_mock() {
        let c = Config::default();
        assert_eq!(c.model.provider, "mock");
    }

    #[test]
    fn config_default_prompt_family_is_openai() {
        let c = Config::default();
        assert_eq!(c.model.prompt_family, PromptFamily::Openai);
    }

    #[test]
    fn config_default_max_tool_rounds_positive() {
        let c = Config::default();
        assert!(c.agent.max_tool_rounds > 0);
    }

    #[test]
    fn config_default_versioning_enabled_with_reserved_branch() {
        let c = Config::default();
        assert!(c.versioning.enabled);
        assert_eq!(c.versioning.agent_branch, "theseus_agent");
    }

    #[test]
    fn config_default_tools_has_auto_approve_patterns() {
        let c = Config::default();
        assert!(!c.tools.auto_approve_patterns.is_empty());
    }

    #[test]
    fn prompt_family_display() {
        assert_eq!(PromptFamily::Openai.to_string(), "openai");
        assert_eq!(PromptFamily::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "model:\n  provider: anthropic\n  name: claude-opus\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.provider, "anthropic");
        assert_eq!(c.agent.max_tool_rounds, AgentRuntimeConfig::default().max_tool_rounds);
    }

    #[test]
    fn config_yaml_round_trip() {
        let mut c = Config::default();
        c.versioning.agent_branch = "custom_agent".into();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.versioning.agent_branch, "custom_agent");
    }

    #[test]
    fn config_versioning_can_be_disabled_via_yaml() {
        let yaml_str = "versioning:\n  enabled: false\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert!(!c.versioning.enabled);
    }
}
