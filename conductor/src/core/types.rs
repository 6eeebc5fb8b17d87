//! Shared domain types for the orchestration engine.
//!
//! Everything that ends up in a run trace lives here. Trace-facing types
//! serialize as camelCase JSON so the ledger stays stable across releases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a delegation is communicated to the target agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    /// Inline message only.
    Direct,
    /// Durable markdown handoff only.
    Artifacts,
    /// Inline message plus a durable markdown handoff.
    Hybrid,
}

impl ActionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionMode::Direct => "direct",
            ActionMode::Artifacts => "artifacts",
            ActionMode::Hybrid => "hybrid",
        }
    }

    /// Whether this mode writes handoff/response markdown files.
    pub fn writes_artifacts(self) -> bool {
        matches!(self, ActionMode::Artifacts | ActionMode::Hybrid)
    }

    /// Whether this mode sends the instruction inline.
    pub fn sends_inline(self) -> bool {
        matches!(self, ActionMode::Direct | ActionMode::Hybrid)
    }
}

/// Planner preference for the delegate's conversational session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Reuse the task thread when one exists, otherwise start fresh.
    Auto,
    /// Always start a fresh session.
    New,
    /// Require an existing task thread (downgrades to fresh when missing).
    Reuse,
}

impl SessionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPolicy::Auto => "auto",
            SessionPolicy::New => "new",
            SessionPolicy::Reuse => "reuse",
        }
    }
}

/// A validated, normalized planner action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    DelegateToAgent {
        target_agent_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_output: Option<String>,
        mode: ActionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_key: Option<String>,
        session_policy: SessionPolicy,
    },
    ReadWorkspaceFile {
        path: String,
        mode: ActionMode,
    },
    WriteWorkspaceFile {
        path: String,
        content: String,
        mode: ActionMode,
    },
    InstallSkill {
        skill_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        mode: ActionMode,
    },
    RespondUser {
        message: String,
        mode: ActionMode,
    },
    Finish {
        message: String,
        mode: ActionMode,
    },
}

impl Action {
    /// Wire name of the action type.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::DelegateToAgent { .. } => "delegate_to_agent",
            Action::ReadWorkspaceFile { .. } => "read_workspace_file",
            Action::WriteWorkspaceFile { .. } => "write_workspace_file",
            Action::InstallSkill { .. } => "install_skill",
            Action::RespondUser { .. } => "respond_user",
            Action::Finish { .. } => "finish",
        }
    }

    pub fn mode(&self) -> ActionMode {
        match self {
            Action::DelegateToAgent { mode, .. }
            | Action::ReadWorkspaceFile { mode, .. }
            | Action::WriteWorkspaceFile { mode, .. }
            | Action::InstallSkill { mode, .. }
            | Action::RespondUser { mode, .. }
            | Action::Finish { mode, .. } => *mode,
        }
    }
}

/// One planner decision: produced fresh each step and consumed immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerDecision {
    pub rationale: String,
    pub action: Action,
}

/// Result of one agent turn. Non-zero exit codes are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecution {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
}

impl AgentExecution {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

/// Identity binding a task key to one target agent's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskThreadState {
    pub task_key: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_step: u32,
    pub updated_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
}

/// Task threads keyed by task key. Ordered so trace snapshots are stable.
pub type TaskThreads = BTreeMap<String, TaskThreadState>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNode {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEdge {
    pub from_agent_id: String,
    pub to_agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Audit graph of which agents/sessions took part in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGraph {
    pub nodes: Vec<SessionNode>,
    pub edges: Vec<SessionEdge>,
}

/// Details of a delegation recorded in a step log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCallLog {
    pub agent_id: String,
    pub task_key: String,
    pub session_policy: SessionPolicy,
    pub reused_session: bool,
    pub downgraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Provider-session handle passed into the invocation (reuse only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id_in: Option<String>,
    pub execution: AgentExecution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOperation {
    Read,
    Write,
    InstallSkill,
}

/// Workspace file activity recorded in a step log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactIo {
    pub operation: ArtifactOperation,
    pub requested_path: String,
    pub resolved_path: String,
    pub blocked: bool,
    pub missing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
}

/// One loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLog {
    pub step: u32,
    pub timestamp: String,
    pub planner_raw_output: String,
    pub planner_decision: PlannerDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_call: Option<AgentCallLog>,
    #[serde(
        rename = "artifactIO",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_io: Option<ArtifactIo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Why the planner loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The planner emitted `finish` or `respond_user`.
    Finished,
    /// The step counter exceeded `max_orchestration_steps`.
    StepLimit,
    /// The delegation counter reached `max_delegation_steps`.
    DelegationLimit,
}

pub const ORCHESTRATION_MODE: &str = "planner_loop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationTrace {
    pub mode: String,
    pub stop_reason: StopReason,
    pub steps: Vec<StepLog>,
    pub final_message: String,
    pub session_graph: SessionGraph,
    pub task_threads: TaskThreads,
}

/// Output of the routing decider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub entry_agent_id: String,
    pub target_agent_id: String,
    pub confidence: f64,
    pub reason: String,
    pub rewritten_message: String,
    pub candidates: Vec<String>,
}

pub const TRACE_SCHEMA_VERSION: u32 = 1;

/// Immutable ledger of one run, written once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    pub schema_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub entry_agent_id: String,
    pub user_message: String,
    pub routing: RoutingDecision,
    pub execution: AgentExecution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationTrace>,
}

/// Delegation capability flags from an agent manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationFlags {
    pub can_receive: bool,
    pub can_delegate: bool,
}

impl Default for DelegationFlags {
    fn default() -> Self {
        Self {
            can_receive: true,
            can_delegate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub provider: String,
    #[serde(default)]
    pub delegation: DelegationFlags,
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: String,
    pub metadata: AgentMetadata,
}

impl AgentManifest {
    pub fn can_receive(&self) -> bool {
        self.metadata.delegation.can_receive
    }

    pub fn can_delegate(&self) -> bool {
        self.metadata.delegation.can_delegate
    }
}
