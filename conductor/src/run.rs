//! Run entry points: routing, single-turn runs and planner loops.
//!
//! `run_agent` routes the message, runs either a direct turn (target cannot
//! delegate) or the planner loop (target can), and writes the run trace.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::routing::decide_route;
use crate::core::types::{
    AgentExecution, AgentManifest, OrchestrationTrace, RoutingDecision, RunTrace,
    TRACE_SCHEMA_VERSION,
};
use crate::io::config::load_config;
use crate::io::init::ConductorPaths;
use crate::io::ports::{InvokeOptions, ManifestSource, Ports, SessionRequest};
use crate::io::trace::write_trace;
use crate::orchestrate::{OrchestrationRequest, OrchestrationSettings, run_orchestration};

/// Caller options for [`run_agent`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions<'a> {
    pub message: &'a str,
    pub session_ref: Option<&'a str>,
    pub force_new_session: bool,
    pub disable_session: bool,
    /// Suppress live agent output.
    pub silent: bool,
}

/// Execution result plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRunResult {
    #[serde(flatten)]
    pub execution: AgentExecution,
    pub run_id: String,
    pub entry_agent_id: String,
    pub routing: RoutingDecision,
    pub trace_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationTrace>,
}

/// Decide entry and target agent for `message` without running anything.
pub fn route_message(
    paths: &ConductorPaths,
    manifests: &dyn ManifestSource,
    entry_agent_id: &str,
    message: &str,
) -> Result<RoutingDecision> {
    let config = load_config(&paths.config_path)?;
    let roster = manifests.list_manifests(paths)?;
    Ok(decide_route(
        &roster,
        entry_agent_id,
        message,
        &config.orchestrator_agent_id,
    ))
}

/// Fresh, sortable run identifier.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        &suffix[..8]
    )
}

/// Route and execute one user message, then write its trace.
#[instrument(skip_all, fields(entry = %entry_agent_id))]
pub fn run_agent(
    paths: &ConductorPaths,
    ports: &Ports<'_>,
    entry_agent_id: &str,
    options: &RunOptions<'_>,
) -> Result<OrchestrationRunResult> {
    let config = load_config(&paths.config_path)?;
    let roster = ports
        .manifests
        .list_manifests(paths)
        .context("load agent manifests")?;
    let routing = decide_route(
        &roster,
        entry_agent_id,
        options.message,
        &config.orchestrator_agent_id,
    );
    let run_id = new_run_id();
    let started_at = Utc::now().to_rfc3339();
    info!(
        run_id = %run_id,
        target = %routing.target_agent_id,
        confidence = routing.confidence,
        "routed message"
    );

    let target = roster
        .iter()
        .find(|agent| agent.agent_id == routing.target_agent_id);
    let message = routing.rewritten_message.trim();

    let (execution, orchestration) = match target {
        _ if message.is_empty() => {
            info!("blank message, nothing to run");
            (noop_execution(target), None)
        }
        None => return Err(anyhow!("agent '{}' is not installed", routing.target_agent_id)),
        Some(target) if target.can_delegate() => {
            let outcome = run_orchestration(
                paths,
                ports,
                &OrchestrationSettings::from(&config),
                &roster,
                &OrchestrationRequest {
                    run_id: &run_id,
                    orchestrator_id: &target.agent_id,
                    user_message: message,
                    session_ref: options.session_ref,
                    force_new_session: options.force_new_session,
                    disable_session: options.disable_session,
                    silent: options.silent,
                },
            )?;
            (outcome.execution, Some(outcome.trace))
        }
        Some(target) => (
            direct_turn(paths, ports, &target.agent_id, message, options)?,
            None,
        ),
    };

    let trace_path = paths.trace_path(&run_id);
    let trace = RunTrace {
        schema_version: TRACE_SCHEMA_VERSION,
        run_id: run_id.clone(),
        started_at,
        completed_at: Utc::now().to_rfc3339(),
        entry_agent_id: routing.entry_agent_id.clone(),
        user_message: options.message.to_string(),
        routing: routing.clone(),
        execution: execution.clone(),
        orchestration: orchestration.clone(),
    };
    write_trace(&trace_path, &trace)?;
    info!(run_id = %run_id, code = execution.code, "run complete");

    Ok(OrchestrationRunResult {
        execution,
        run_id,
        entry_agent_id: routing.entry_agent_id.clone(),
        routing,
        trace_path: trace_path.display().to_string(),
        orchestration,
    })
}

fn noop_execution(target: Option<&AgentManifest>) -> AgentExecution {
    AgentExecution {
        code: 0,
        stdout: String::new(),
        stderr: String::new(),
        provider_id: target
            .map(|agent| agent.metadata.provider.clone())
            .unwrap_or_default(),
        provider_session_id: None,
    }
}

/// One session-backed turn of an agent that does not delegate.
fn direct_turn(
    paths: &ConductorPaths,
    ports: &Ports<'_>,
    agent_id: &str,
    message: &str,
    options: &RunOptions<'_>,
) -> Result<AgentExecution> {
    let prepared = ports
        .sessions
        .prepare_run_session(
            paths,
            agent_id,
            &SessionRequest {
                session_ref: options.session_ref,
                force_new: options.force_new_session,
                disable_session: options.disable_session,
                user_message: message,
            },
        )
        .with_context(|| format!("prepare session for {agent_id}"))?;

    let resume = prepared
        .session
        .as_ref()
        .and_then(|session| session.provider_session_id.as_deref());
    let execution = ports.agents.invoke_agent(
        paths,
        agent_id,
        &InvokeOptions {
            prompt: &prepared.prompt,
            silent: options.silent,
            provider_session_id: resume,
            force_new_provider_session: resume.is_none(),
        },
    )?;

    if execution.succeeded()
        && let Some(mut session) = prepared.session
    {
        if execution.provider_session_id.is_some() {
            session.provider_session_id = execution.provider_session_id.clone();
        }
        ports
            .sessions
            .record_assistant_reply(paths, &session, execution.stdout.trim())
            .with_context(|| format!("record reply for {agent_id}"))?;
    }
    Ok(execution)
}
