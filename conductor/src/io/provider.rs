//! Process-backed agent runner that shells out to provider CLIs.
//!
//! The provider command comes from `[providers.<id>]` in the config; the
//! prompt is fed on stdin and the agent's workspace is the working directory.
//! Spawn failures, timeouts and non-zero exits are returned as data.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::{ConductorConfig, ProviderConfig};
use super::init::ConductorPaths;
use super::manifest::load_manifest;
use super::ports::{AgentProvider, AgentRunner, InvokeOptions};
use super::process::{TeeSink, run_command};
use crate::core::types::AgentExecution;

/// Exit code reported when a provider turn exceeds `agent_timeout_secs`.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code reported when the provider command cannot be started.
pub const EXIT_SPAWN_FAILED: i32 = 127;

const NEW_SESSION_PLACEHOLDER: &str = "{new_session_id}";
const RESUME_SESSION_PLACEHOLDER: &str = "{provider_session_id}";

#[derive(Debug, Clone)]
pub struct CommandAgentRunner {
    config: ConductorConfig,
}

impl CommandAgentRunner {
    pub fn new(config: ConductorConfig) -> Self {
        Self { config }
    }
}

/// Resolved argv plus the session id known before the process runs.
struct LaunchPlan {
    argv: Vec<String>,
    session_id: Option<String>,
    resumed: bool,
}

fn plan_launch(provider: &ProviderConfig, options: &InvokeOptions<'_>) -> LaunchPlan {
    if let Some(existing) = options.provider_session_id
        && !options.force_new_provider_session
        && !provider.resume_command.is_empty()
    {
        return LaunchPlan {
            argv: substitute(&provider.resume_command, RESUME_SESSION_PLACEHOLDER, existing),
            session_id: Some(existing.to_string()),
            resumed: true,
        };
    }

    let uses_new_id = provider
        .command
        .iter()
        .any(|arg| arg.contains(NEW_SESSION_PLACEHOLDER));
    let new_id = Uuid::new_v4().to_string();
    LaunchPlan {
        argv: substitute(&provider.command, NEW_SESSION_PLACEHOLDER, &new_id),
        session_id: uses_new_id.then_some(new_id),
        resumed: false,
    }
}

fn substitute(argv: &[String], placeholder: &str, value: &str) -> Vec<String> {
    argv.iter()
        .map(|arg| arg.replace(placeholder, value))
        .collect()
}

/// Session id announced by the provider in its output, if the pattern matches.
fn capture_session_id(pattern: &str, stdout: &str, stderr: &str) -> Result<Option<String>> {
    let regex = Regex::new(pattern).with_context(|| format!("compile {pattern}"))?;
    Ok([stdout, stderr].into_iter().find_map(|text| {
        regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }))
}

impl AgentRunner for CommandAgentRunner {
    #[instrument(skip_all, fields(agent_id = %agent_id, silent = options.silent, resume = options.provider_session_id.is_some()))]
    fn invoke_agent(
        &self,
        paths: &ConductorPaths,
        agent_id: &str,
        options: &InvokeOptions<'_>,
    ) -> Result<AgentExecution> {
        let provider_id = self.agent_provider(paths, agent_id)?.provider_id;
        let Some(provider) = self.config.provider(&provider_id) else {
            warn!(provider_id = %provider_id, "provider is not configured");
            return Ok(AgentExecution {
                code: EXIT_SPAWN_FAILED,
                stdout: String::new(),
                stderr: format!("provider '{provider_id}' is not configured"),
                provider_id,
                provider_session_id: None,
            });
        };

        let workspace = paths.agent_workspace(agent_id);
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("create directory {}", workspace.display()))?;

        let plan = plan_launch(provider, options);
        info!(provider_id = %provider_id, resumed = plan.resumed, "invoking provider");
        let (program, args) = plan
            .argv
            .split_first()
            .context("provider command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&workspace);

        let tee: Option<TeeSink> = (!options.silent).then(|| Box::new(std::io::stdout()) as TeeSink);
        let output = match run_command(
            cmd,
            Some(options.prompt.as_bytes()),
            Duration::from_secs(self.config.agent_timeout_secs),
            self.config.agent_output_limit_bytes,
            tee,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "provider failed to start");
                return Ok(AgentExecution {
                    code: EXIT_SPAWN_FAILED,
                    stdout: String::new(),
                    stderr: format!("{program}: {err:#}"),
                    provider_id,
                    provider_session_id: plan.session_id,
                });
            }
        };

        let stdout = output.stdout_lossy();
        let stderr = output.stderr_with_notices(&provider_id);
        let captured = match &provider.session_id_pattern {
            Some(pattern) => capture_session_id(pattern, &stdout, &stderr)?,
            None => None,
        };
        let code = if output.timed_out {
            EXIT_TIMED_OUT
        } else {
            output.status.code().unwrap_or(1)
        };
        debug!(code, "provider turn finished");

        Ok(AgentExecution {
            code,
            stdout,
            stderr,
            provider_id,
            provider_session_id: captured.or(plan.session_id),
        })
    }

    fn agent_provider(&self, paths: &ConductorPaths, agent_id: &str) -> Result<AgentProvider> {
        let manifest = load_manifest(paths, agent_id)
            .with_context(|| format!("resolve provider for agent '{agent_id}'"))?;
        Ok(AgentProvider {
            provider_id: manifest.metadata.provider,
        })
    }
}
