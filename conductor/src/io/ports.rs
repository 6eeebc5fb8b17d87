//! Collaborator traits consumed by the orchestration loop.
//!
//! Every call is a blocking suspension point. Default filesystem/process
//! adapters live next to this module; tests substitute scripted fakes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::types::{AgentExecution, AgentManifest};
use crate::io::init::ConductorPaths;

/// Options for one agent turn.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions<'a> {
    pub prompt: &'a str,
    /// Suppress live output (planner calls are always silent).
    pub silent: bool,
    /// Provider-session handle to continue.
    pub provider_session_id: Option<&'a str>,
    /// Start a brand-new provider session even if a handle is known.
    pub force_new_provider_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProvider {
    pub provider_id: String,
}

/// Runs a single turn of a named agent against its backing provider.
pub trait AgentRunner {
    /// Ordinary provider failures come back as a non-zero `code`, never as `Err`.
    fn invoke_agent(
        &self,
        paths: &ConductorPaths,
        agent_id: &str,
        options: &InvokeOptions<'_>,
    ) -> Result<AgentExecution>;

    fn agent_provider(&self, paths: &ConductorPaths, agent_id: &str) -> Result<AgentProvider>;
}

#[derive(Debug, Clone, Default)]
pub struct SessionRequest<'a> {
    /// Session key to continue; the store picks a default when absent.
    pub session_ref: Option<&'a str>,
    pub force_new: bool,
    /// Run statelessly: no history is loaded or recorded.
    pub disable_session: bool,
    pub user_message: &'a str,
}

/// Identity of a stored conversational session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub agent_id: String,
    pub session_key: String,
    pub session_id: String,
    /// Provider-side handle remembered for the next turn of this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSessionRun {
    /// Prompt combining prior context and the new user message.
    pub prompt: String,
    /// Prior conversation, if any, rendered as plain text.
    pub context: Option<String>,
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCompactionResult {
    pub compacted: bool,
    /// Messages folded into the summary by this call.
    pub folded_messages: usize,
    pub remaining_messages: usize,
}

/// Conversational session storage with compaction.
pub trait SessionStore {
    fn prepare_run_session(
        &self,
        paths: &ConductorPaths,
        agent_id: &str,
        request: &SessionRequest<'_>,
    ) -> Result<PreparedSessionRun>;

    fn record_assistant_reply(
        &self,
        paths: &ConductorPaths,
        session: &SessionInfo,
        content: &str,
    ) -> Result<SessionCompactionResult>;
}

/// Roster of installed agents.
pub trait ManifestSource {
    fn list_manifests(&self, paths: &ConductorPaths) -> Result<Vec<AgentManifest>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillInstallRequest {
    pub agent_id: String,
    pub skill_name: String,
    pub description: Option<String>,
    pub content: Option<String>,
    /// Already sandboxed source file or directory.
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledSkill {
    pub skill_id: String,
    pub agent_id: String,
    pub source: String,
    pub installed_path: PathBuf,
}

pub trait SkillInstaller {
    fn install_skill(
        &self,
        paths: &ConductorPaths,
        request: &SkillInstallRequest,
    ) -> Result<InstalledSkill>;
}

/// File access for planner artifacts. Paths are sandboxed by the caller.
pub trait WorkspaceFs {
    fn exists(&self, path: &Path) -> bool;
    /// Content as text; bytes that are not UTF-8 are replaced, never an error.
    fn read_file(&self, path: &Path) -> Result<String>;
    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;
    fn ensure_dir(&self, path: &Path) -> Result<()>;
}

/// Bundle of collaborators handed to `run_agent`.
#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub agents: &'a dyn AgentRunner,
    pub sessions: &'a dyn SessionStore,
    pub manifests: &'a dyn ManifestSource,
    pub skills: &'a dyn SkillInstaller,
    pub fs: &'a dyn WorkspaceFs,
}
