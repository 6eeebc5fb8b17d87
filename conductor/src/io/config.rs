//! Engine configuration stored under `.conductor/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Human-edited; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Well-known agent id that routing falls back to and that plans the loop.
    pub orchestrator_agent_id: String,

    /// Planner iterations before the loop stops with `step_limit`.
    pub max_orchestration_steps: u32,

    /// Cumulative delegations before the loop stops with `delegation_limit`.
    pub max_delegation_steps: u32,

    /// Character budget for the shared notes quoted in prompts and stop messages.
    pub notes_budget_chars: usize,

    /// Size of the recent-events window shown to the planner.
    pub recent_events: usize,

    /// Cap for the one-line note recorded after each delegation.
    pub delegation_note_chars: usize,

    /// Byte budget for the rendered planner prompt.
    pub prompt_budget_bytes: usize,

    /// Wall-clock budget for a single provider turn.
    pub agent_timeout_secs: u64,

    /// Truncate provider stdout/stderr beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    /// Session history length that triggers compaction.
    pub session_max_messages: usize,

    pub providers: BTreeMap<String, ProviderConfig>,
}

/// How to launch one provider CLI.
///
/// `command` starts a fresh session and may use `{new_session_id}`;
/// `resume_command` continues one and may use `{provider_session_id}`.
/// The prompt is always written to stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub command: Vec<String>,
    #[serde(default)]
    pub resume_command: Vec<String>,
    /// Regex with one capture group locating the provider session id in output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_pattern: Option<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "claude".to_string(),
        ProviderConfig {
            command: argv(&["claude", "-p", "--session-id", "{new_session_id}"]),
            resume_command: argv(&["claude", "-p", "--resume", "{provider_session_id}"]),
            session_id_pattern: None,
        },
    );
    providers.insert(
        "codex".to_string(),
        ProviderConfig {
            command: argv(&["codex", "exec", "-"]),
            resume_command: argv(&["codex", "exec", "resume", "{provider_session_id}", "-"]),
            session_id_pattern: Some(r"session id:\s*([0-9a-fA-F-]{36})".to_string()),
        },
    );
    providers
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            orchestrator_agent_id: "orchestrator".to_string(),
            max_orchestration_steps: 10,
            max_delegation_steps: 6,
            notes_budget_chars: 8_000,
            recent_events: 8,
            delegation_note_chars: 600,
            prompt_budget_bytes: 40_000,
            agent_timeout_secs: 30 * 60,
            agent_output_limit_bytes: 200_000,
            session_max_messages: 40,
            providers: default_providers(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator_agent_id.trim().is_empty() {
            return Err(anyhow!("orchestrator_agent_id must be non-empty"));
        }
        if self.max_orchestration_steps == 0 {
            return Err(anyhow!("max_orchestration_steps must be > 0"));
        }
        if self.max_delegation_steps == 0 {
            return Err(anyhow!("max_delegation_steps must be > 0"));
        }
        if self.notes_budget_chars == 0 {
            return Err(anyhow!("notes_budget_chars must be > 0"));
        }
        if self.delegation_note_chars == 0 {
            return Err(anyhow!("delegation_note_chars must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.session_max_messages < 2 {
            return Err(anyhow!("session_max_messages must be >= 2"));
        }
        for (id, provider) in &self.providers {
            provider
                .validate()
                .with_context(|| format!("providers.{id}"))?;
        }
        Ok(())
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_id)
    }
}

impl ProviderConfig {
    fn validate(&self) -> Result<()> {
        if self.command.first().is_none_or(|cmd| cmd.trim().is_empty()) {
            return Err(anyhow!("command must be a non-empty array"));
        }
        if let Some(first) = self.resume_command.first()
            && first.trim().is_empty()
        {
            return Err(anyhow!("resume_command must start with a program"));
        }
        if let Some(pattern) = &self.session_id_pattern {
            let regex = Regex::new(pattern)
                .with_context(|| format!("session_id_pattern is not a valid regex: {pattern}"))?;
            if regex.captures_len() < 2 {
                return Err(anyhow!("session_id_pattern must contain a capture group"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
