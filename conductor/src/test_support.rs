//! Test-only fixtures: a temp `.conductor/` layout and a scripted agent runner.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{AgentExecution, AgentManifest, AgentMetadata, DelegationFlags};
use crate::io::config::{ConductorConfig, write_config};
use crate::io::init::{ConductorPaths, InitOptions, init_conductor};
use crate::io::manifest::{FsManifestSource, load_manifest, write_manifest};
use crate::io::ports::{AgentProvider, AgentRunner, InvokeOptions, Ports};
use crate::io::session::FsSessionStore;
use crate::io::skills::FsSkillInstaller;
use crate::io::workspace_fs::LocalFs;

/// Provider id given to agents created by [`TestWorkspace::add_agent`].
pub const FAKE_PROVIDER: &str = "fake";

/// An initialized `.conductor/` in a temp dir with filesystem-backed ports.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    pub paths: ConductorPaths,
    sessions: FsSessionStore,
}

impl TestWorkspace {
    /// Initialize with the default config.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Initialize, then let `edit` adjust the config before it is saved.
    pub fn with_config(edit: impl FnOnce(&mut ConductorConfig)) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_conductor(temp.path(), &InitOptions { force: false }).expect("init");
        let mut config = ConductorConfig::default();
        edit(&mut config);
        write_config(&paths.config_path, &config).expect("write config");
        Self {
            _temp: temp,
            paths,
            sessions: FsSessionStore::new(config.session_max_messages),
        }
    }

    /// Install an agent manifest using the fake provider.
    pub fn add_agent(&self, agent_id: &str, can_receive: bool, can_delegate: bool) {
        let manifest = AgentManifest {
            agent_id: agent_id.to_string(),
            metadata: AgentMetadata {
                name: agent_id.to_string(),
                description: format!("{agent_id} agent"),
                provider: FAKE_PROVIDER.to_string(),
                delegation: DelegationFlags {
                    can_receive,
                    can_delegate,
                },
            },
        };
        write_manifest(&self.paths, &manifest).expect("write manifest");
    }

    /// Filesystem ports around `runner`.
    pub fn ports<'a>(&'a self, runner: &'a ScriptedAgentRunner) -> Ports<'a> {
        Ports {
            agents: runner,
            sessions: &self.sessions,
            manifests: &FsManifestSource,
            skills: &FsSkillInstaller,
            fs: &LocalFs,
        }
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// One canned agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedTurn {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Provider session reported back; when `None` a resumed handle is echoed.
    pub provider_session_id: Option<String>,
}

impl ScriptedTurn {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            provider_session_id: None,
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
            provider_session_id: None,
        }
    }

    pub fn with_session(mut self, provider_session_id: &str) -> Self {
        self.provider_session_id = Some(provider_session_id.to_string());
        self
    }
}

/// One recorded `invoke_agent` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub agent_id: String,
    pub prompt: String,
    pub silent: bool,
    pub provider_session_id: Option<String>,
    pub force_new: bool,
}

/// Agent runner that replays queued turns per agent and records every call.
#[derive(Debug, Default)]
pub struct ScriptedAgentRunner {
    turns: RefCell<BTreeMap<String, VecDeque<ScriptedTurn>>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedAgentRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `turns` for `agent_id`, after any already queued.
    pub fn script(&self, agent_id: &str, turns: impl IntoIterator<Item = ScriptedTurn>) {
        self.turns
            .borrow_mut()
            .entry(agent_id.to_string())
            .or_default()
            .extend(turns);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, agent_id: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Turns still queued for `agent_id`.
    pub fn remaining(&self, agent_id: &str) -> usize {
        self.turns.borrow().get(agent_id).map_or(0, VecDeque::len)
    }
}

impl AgentRunner for ScriptedAgentRunner {
    fn invoke_agent(
        &self,
        paths: &ConductorPaths,
        agent_id: &str,
        options: &InvokeOptions<'_>,
    ) -> Result<AgentExecution> {
        let provider = self.agent_provider(paths, agent_id)?;
        self.calls.borrow_mut().push(RecordedCall {
            agent_id: agent_id.to_string(),
            prompt: options.prompt.to_string(),
            silent: options.silent,
            provider_session_id: options.provider_session_id.map(str::to_string),
            force_new: options.force_new_provider_session,
        });
        let turn = self
            .turns
            .borrow_mut()
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted turn left for {agent_id}"))?;

        let resumed = options
            .provider_session_id
            .filter(|_| !options.force_new_provider_session)
            .map(str::to_string);
        Ok(AgentExecution {
            code: turn.code,
            stdout: turn.stdout,
            stderr: turn.stderr,
            provider_id: provider.provider_id,
            provider_session_id: turn.provider_session_id.or(resumed),
        })
    }

    fn agent_provider(&self, paths: &ConductorPaths, agent_id: &str) -> Result<AgentProvider> {
        let manifest = load_manifest(paths, agent_id)?;
        Ok(AgentProvider {
            provider_id: manifest.metadata.provider,
        })
    }
}

/// Planner stdout carrying `action` as a bare JSON decision.
pub fn planner_reply(action: Value) -> String {
    json!({ "rationale": "scripted", "action": action }).to_string()
}

pub fn delegate(target: &str, message: &str) -> Value {
    json!({ "type": "delegate_to_agent", "targetAgentId": target, "message": message })
}

pub fn finish(message: &str) -> Value {
    json!({ "type": "finish", "message": message })
}

pub fn read_file(path: &str) -> Value {
    json!({ "type": "read_workspace_file", "path": path })
}
