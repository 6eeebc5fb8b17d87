//! Canonical `.conductor/` layout and `conductor init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{ConductorConfig, write_config};
use super::manifest::write_manifest;
use crate::core::types::{AgentManifest, AgentMetadata, DelegationFlags};

/// All canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub agents_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub workspaces_dir: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".conductor");
        Self {
            root: root.clone(),
            gitignore_path: state_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            agents_dir: state_dir.join("agents"),
            sessions_dir: state_dir.join("sessions"),
            runs_dir: state_dir.join("runs"),
            workspaces_dir: state_dir.join("workspaces"),
            state_dir,
        }
    }

    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir.join(agent_id)
    }

    pub fn manifest_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("agent.toml")
    }

    pub fn skills_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("skills")
    }

    /// Working directory of an agent; also the root of its file sandbox.
    pub fn agent_workspace(&self, agent_id: &str) -> PathBuf {
        self.workspaces_dir.join(agent_id)
    }

    pub fn agent_sessions_dir(&self, agent_id: &str) -> PathBuf {
        self.sessions_dir.join(agent_id)
    }

    pub fn trace_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    /// Run-scoped directory for handoff and response artifacts.
    pub fn coordination_dir(&self, orchestrator_id: &str, run_id: &str) -> PathBuf {
        self.agent_workspace(orchestrator_id)
            .join("coordination")
            .join(run_id)
    }
}

/// Options for `init_conductor`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing conductor-owned files.
    pub force: bool,
}

/// Create `.conductor/` scaffolding in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set.
pub fn init_conductor(root: &Path, options: &InitOptions) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }

    for dir in [
        &paths.state_dir,
        &paths.agents_dir,
        &paths.sessions_dir,
        &paths.runs_dir,
        &paths.workspaces_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    fs::write(&paths.gitignore_path, CONDUCTOR_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    let config = ConductorConfig::default();
    write_config(&paths.config_path, &config)?;
    write_manifest(&paths, &default_orchestrator(&config.orchestrator_agent_id))?;
    let workspace = paths.agent_workspace(&config.orchestrator_agent_id);
    fs::create_dir_all(&workspace)
        .with_context(|| format!("create directory {}", workspace.display()))?;

    info!(root = %paths.root.display(), "initialized conductor layout");
    Ok(paths)
}

fn default_orchestrator(agent_id: &str) -> AgentManifest {
    AgentManifest {
        agent_id: agent_id.to_string(),
        metadata: AgentMetadata {
            name: "Orchestrator".to_string(),
            description: "Plans the work and delegates it to the other agents.".to_string(),
            provider: "claude".to_string(),
            delegation: DelegationFlags {
                can_receive: false,
                can_delegate: true,
            },
        },
    }
}

const CONDUCTOR_GITIGNORE: &str = "sessions/\nruns/\nworkspaces/\n";
