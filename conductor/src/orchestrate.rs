//! Planner-driven orchestration loop.
//!
//! Each step renders the planner prompt from the loop state, asks the
//! orchestrator agent for one action, and executes it. The loop ends when the
//! planner finishes or responds, or when a step/delegation limit is hit. All
//! loop state lives in [`LoopState`], built fresh for every run.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{DecisionSource, FALLBACK_MESSAGE, parse_planner_output};
use crate::core::sandbox::resolve_workspace_path;
use crate::core::text::{clamp_notes, clamp_text, derived_task_key, one_line};
use crate::core::threads::{
    ThreadSessionIds, choose_session, find_thread, summarize_thread, upsert_thread,
};
use crate::core::types::{
    Action, ActionMode, AgentCallLog, AgentExecution, AgentManifest, ArtifactIo,
    ArtifactOperation, ORCHESTRATION_MODE, OrchestrationTrace, PlannerDecision, SessionGraph,
    SessionNode, SessionPolicy, StepLog, StopReason, TaskThreads,
};
use crate::io::config::ConductorConfig;
use crate::io::init::ConductorPaths;
use crate::io::ports::{InvokeOptions, Ports, SessionInfo, SessionRequest, SkillInstallRequest};
use crate::io::prompt::{
    HandoffInputs, PlannerAgent, PlannerPromptInputs, build_planner_prompt, render_handoff,
    render_response,
};

/// Message used when `finish`/`respond_user` carries no text.
pub const DEFAULT_FINISH_MESSAGE: &str = "Completed.";

/// Limits and budgets for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationSettings {
    pub max_steps: u32,
    pub max_delegations: u32,
    pub notes_budget_chars: usize,
    pub recent_events: usize,
    pub delegation_note_chars: usize,
    pub prompt_budget_bytes: usize,
}

impl From<&ConductorConfig> for OrchestrationSettings {
    fn from(config: &ConductorConfig) -> Self {
        Self {
            max_steps: config.max_orchestration_steps,
            max_delegations: config.max_delegation_steps,
            notes_budget_chars: config.notes_budget_chars,
            recent_events: config.recent_events,
            delegation_note_chars: config.delegation_note_chars,
            prompt_budget_bytes: config.prompt_budget_bytes,
        }
    }
}

/// Per-run inputs for [`run_orchestration`].
#[derive(Debug, Clone)]
pub struct OrchestrationRequest<'a> {
    pub run_id: &'a str,
    /// Agent that plans the loop (must be able to delegate).
    pub orchestrator_id: &'a str,
    pub user_message: &'a str,
    pub session_ref: Option<&'a str>,
    pub force_new_session: bool,
    pub disable_session: bool,
    /// Suppress live output from delegated agents. Planner calls are always silent.
    pub silent: bool,
}

/// Final execution and the ledger of a finished loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationOutcome {
    pub execution: AgentExecution,
    pub trace: OrchestrationTrace,
}

/// Mutable state owned by a single loop invocation.
#[derive(Debug, Default)]
struct LoopState {
    notes: Vec<String>,
    events: VecDeque<String>,
    threads: TaskThreads,
    graph: SessionGraph,
    steps: Vec<StepLog>,
    delegations: u32,
}

impl LoopState {
    fn push_event(&mut self, event: String, window: usize) {
        if window == 0 {
            return;
        }
        while self.events.len() >= window {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// What a dispatched action produced for the step log.
#[derive(Debug, Default)]
struct StepEffects {
    agent_call: Option<AgentCallLog>,
    artifact_io: Option<ArtifactIo>,
    notes: Vec<String>,
    finished: Option<(String, AgentExecution)>,
}

/// Run the planner loop for `request.user_message`.
///
/// Planner and delegate failures are recorded as data. Errors are returned
/// only for infrastructure failures (filesystem, sessions, manifests).
#[instrument(skip_all, fields(run_id = %request.run_id, orchestrator = %request.orchestrator_id))]
pub fn run_orchestration(
    paths: &ConductorPaths,
    ports: &Ports<'_>,
    settings: &OrchestrationSettings,
    roster: &[AgentManifest],
    request: &OrchestrationRequest<'_>,
) -> Result<OrchestrationOutcome> {
    let workspace = paths.agent_workspace(request.orchestrator_id);
    ports.fs.ensure_dir(&workspace)?;

    let prepared = ports
        .sessions
        .prepare_run_session(
            paths,
            request.orchestrator_id,
            &SessionRequest {
                session_ref: request.session_ref,
                force_new: request.force_new_session,
                disable_session: request.disable_session,
                user_message: request.user_message,
            },
        )
        .with_context(|| format!("prepare session for {}", request.orchestrator_id))?;

    let run = Orchestrator {
        paths,
        ports,
        settings,
        roster,
        request,
        workspace,
        agents: allowed_agents(roster, request.orchestrator_id),
        conversation: prepared.context,
        planner_session: prepared.session,
        planner_provider_session: None,
        state: LoopState::default(),
    };
    run.run()
}

fn allowed_agents(roster: &[AgentManifest], orchestrator_id: &str) -> Vec<PlannerAgent> {
    roster
        .iter()
        .filter(|agent| agent.can_receive() && agent.agent_id != orchestrator_id)
        .map(|agent| PlannerAgent {
            id: agent.agent_id.clone(),
            name: agent.metadata.name.clone(),
            description: agent.metadata.description.clone(),
            provider: agent.metadata.provider.clone(),
        })
        .collect()
}

struct Orchestrator<'a> {
    paths: &'a ConductorPaths,
    ports: &'a Ports<'a>,
    settings: &'a OrchestrationSettings,
    roster: &'a [AgentManifest],
    request: &'a OrchestrationRequest<'a>,
    workspace: PathBuf,
    agents: Vec<PlannerAgent>,
    conversation: Option<String>,
    planner_session: Option<SessionInfo>,
    /// Provider session returned by the first planner call.
    planner_provider_session: Option<String>,
    state: LoopState,
}

impl Orchestrator<'_> {
    fn run(mut self) -> Result<OrchestrationOutcome> {
        let orchestrator = self.request.orchestrator_id;
        let mut stop_reason = StopReason::StepLimit;
        let mut finished = None;

        for step in 1..=self.settings.max_steps {
            if self.state.delegations >= self.settings.max_delegations {
                stop_reason = StopReason::DelegationLimit;
                break;
            }
            if let Some(done) = self.step(step)? {
                stop_reason = StopReason::Finished;
                finished = Some(done);
                break;
            }
        }

        let (final_message, execution) = match finished {
            Some(done) => done,
            None => {
                let message = self.stop_message(stop_reason);
                warn!(?stop_reason, steps = self.state.steps.len(), "loop stopped before finishing");
                let execution = self.synthetic_execution(&message)?;
                (message, execution)
            }
        };

        if let Some(mut session) = self.planner_session.take() {
            if self.planner_provider_session.is_some() {
                session.provider_session_id = self.planner_provider_session.take();
            }
            self.ports
                .sessions
                .record_assistant_reply(self.paths, &session, &final_message)
                .with_context(|| format!("record reply for {orchestrator}"))?;
        }

        info!(
            ?stop_reason,
            steps = self.state.steps.len(),
            delegations = self.state.delegations,
            "orchestration finished"
        );
        Ok(OrchestrationOutcome {
            execution,
            trace: OrchestrationTrace {
                mode: ORCHESTRATION_MODE.to_string(),
                stop_reason,
                steps: self.state.steps,
                final_message,
                session_graph: self.state.graph,
                task_threads: self.state.threads,
            },
        })
    }

    /// Run one planner step. Returns the final message and execution once the
    /// planner finishes.
    #[instrument(skip_all, fields(step = step))]
    fn step(&mut self, step: u32) -> Result<Option<(String, AgentExecution)>> {
        let orchestrator = self.request.orchestrator_id;
        let prompt = self.planner_prompt(step)?;

        let resume = if step == 1 {
            self.planner_session
                .as_ref()
                .and_then(|s| s.provider_session_id.clone())
        } else {
            None
        };
        let planner = self.ports.agents.invoke_agent(
            self.paths,
            orchestrator,
            &InvokeOptions {
                prompt: &prompt,
                silent: true,
                provider_session_id: resume.as_deref(),
                force_new_provider_session: resume.is_none(),
            },
        )?;
        if step == 1 {
            self.planner_provider_session = planner.provider_session_id.clone();
        }

        let parsed = parse_planner_output(&planner.stdout);
        debug!(action = parsed.decision.action.kind(), source = ?parsed.source, "planner decided");
        self.state.graph.add_node(SessionNode {
            agent_id: orchestrator.to_string(),
            provider_id: Some(planner.provider_id.clone()),
            session_key: self.planner_session.as_ref().map(|s| s.session_key.clone()),
            session_id: self.planner_session.as_ref().map(|s| s.session_id.clone()),
            provider_session_id: planner.provider_session_id.clone(),
        });

        let mut effects = StepEffects::default();
        if !planner.succeeded() {
            let note = format!(
                "[PLANNER] exit code {}: {}",
                planner.code,
                one_line(&planner.stderr, self.settings.delegation_note_chars)
            );
            effects.notes.push(note);
        }

        if parsed.source == DecisionSource::Fallback && !planner.succeeded() {
            effects.finished = Some((
                FALLBACK_MESSAGE.to_string(),
                AgentExecution {
                    stdout: format!("{FALLBACK_MESSAGE}\n"),
                    ..planner.clone()
                },
            ));
        } else {
            self.dispatch(step, &parsed.decision, &mut effects)?;
        }

        for note in &effects.notes {
            self.state.notes.push(note.clone());
        }
        let summary = match (&effects.finished, effects.notes.last()) {
            (Some(_), _) => format!("{} (finished)", parsed.decision.action.kind()),
            (None, Some(note)) => one_line(note, self.settings.delegation_note_chars),
            (None, None) => parsed.decision.action.kind().to_string(),
        };
        self.state
            .push_event(format!("step {step}: {summary}"), self.settings.recent_events);

        self.state.steps.push(StepLog {
            step,
            timestamp: Utc::now().to_rfc3339(),
            planner_raw_output: planner.stdout,
            planner_decision: parsed.decision,
            agent_call: effects.agent_call,
            artifact_io: effects.artifact_io,
            note: (!effects.notes.is_empty()).then(|| effects.notes.join("\n")),
        });
        Ok(effects.finished)
    }

    fn planner_prompt(&self, step: u32) -> Result<String> {
        let notes = clamp_notes(&self.state.notes, self.settings.notes_budget_chars);
        let events: Vec<String> = self.state.events.iter().cloned().collect();
        let threads: Vec<String> = self
            .state
            .threads
            .values()
            .map(|thread| summarize_thread(thread, self.settings.delegation_note_chars))
            .collect();
        let coordination = format!("coordination/{}", self.request.run_id);
        build_planner_prompt(
            &PlannerPromptInputs {
                orchestrator_id: self.request.orchestrator_id,
                user_message: self.request.user_message,
                agents: &self.agents,
                step,
                max_steps: self.settings.max_steps,
                delegations: self.state.delegations,
                max_delegations: self.settings.max_delegations,
                notes: &notes,
                events: &events,
                threads: &threads,
                conversation: self.conversation.as_deref(),
                coordination_dir: &coordination,
            },
            self.settings.prompt_budget_bytes,
        )
    }

    fn dispatch(
        &mut self,
        step: u32,
        decision: &PlannerDecision,
        effects: &mut StepEffects,
    ) -> Result<()> {
        match &decision.action {
            Action::Finish { message, .. } | Action::RespondUser { message, .. } => {
                let message = message.trim();
                let message = if message.is_empty() {
                    DEFAULT_FINISH_MESSAGE
                } else {
                    message
                };
                let execution = self.synthetic_execution(message)?;
                effects.finished = Some((message.to_string(), execution));
            }
            Action::ReadWorkspaceFile { path, .. } => self.read_file(path, effects)?,
            Action::WriteWorkspaceFile { path, content, .. } => {
                self.write_file(path, content, effects)?;
            }
            Action::InstallSkill {
                skill_name,
                target_agent_id,
                source_path,
                description,
                content,
                ..
            } => self.install_skill(
                SkillAction {
                    skill_name,
                    target_agent_id: target_agent_id.as_deref(),
                    source_path: source_path.as_deref(),
                    description: description.as_deref(),
                    content: content.as_deref(),
                },
                effects,
            ),
            Action::DelegateToAgent {
                target_agent_id,
                message,
                expected_output,
                mode,
                task_key,
                session_policy,
            } => self.delegate(
                step,
                Delegation {
                    target: target_agent_id,
                    message,
                    expected_output: expected_output.as_deref(),
                    mode: *mode,
                    task_key: task_key.as_deref(),
                    policy: *session_policy,
                },
                effects,
            )?,
        }
        Ok(())
    }

    fn read_file(&mut self, requested: &str, effects: &mut StepEffects) -> Result<()> {
        let resolved = resolve_workspace_path(&self.workspace, requested);
        if resolved.blocked {
            warn!(requested, "blocked workspace path");
        }
        let mut io = ArtifactIo {
            operation: ArtifactOperation::Read,
            requested_path: requested.to_string(),
            resolved_path: resolved.path.display().to_string(),
            blocked: resolved.blocked,
            missing: false,
            bytes: None,
        };

        if !self.ports.fs.exists(&resolved.path) {
            io.missing = true;
            effects.notes.push(format!("[MISSING] {requested}"));
        } else {
            let content = self.ports.fs.read_file(&resolved.path)?;
            io.bytes = Some(content.len());
            effects.notes.push(format!(
                "[FILE] {requested}\n{}",
                clamp_text(content.trim_end(), self.settings.notes_budget_chars)
            ));
        }
        effects.artifact_io = Some(io);
        Ok(())
    }

    fn write_file(
        &mut self,
        requested: &str,
        content: &str,
        effects: &mut StepEffects,
    ) -> Result<()> {
        let resolved = resolve_workspace_path(&self.workspace, requested);
        if resolved.blocked {
            warn!(requested, "blocked workspace path");
        }
        let mut body = content.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        self.ports.fs.write_file(&resolved.path, &body)?;

        let suffix = if resolved.blocked {
            " (path outside workspace, redirected)"
        } else {
            ""
        };
        effects
            .notes
            .push(format!("[WROTE] {requested} ({} bytes){suffix}", body.len()));
        effects.artifact_io = Some(ArtifactIo {
            operation: ArtifactOperation::Write,
            requested_path: requested.to_string(),
            resolved_path: resolved.path.display().to_string(),
            blocked: resolved.blocked,
            missing: false,
            bytes: Some(body.len()),
        });
        Ok(())
    }

    fn install_skill(&mut self, action: SkillAction<'_>, effects: &mut StepEffects) {
        let orchestrator = self.request.orchestrator_id;
        let target = action.target_agent_id.unwrap_or(orchestrator);
        if !self.roster.iter().any(|agent| agent.agent_id == target) {
            effects.notes.push(format!(
                "[SKILL] cannot install '{}': unknown agent '{target}'",
                action.skill_name
            ));
            return;
        }

        let source = action
            .source_path
            .map(|requested| (requested, resolve_workspace_path(&self.workspace, requested)));
        let request = SkillInstallRequest {
            agent_id: target.to_string(),
            skill_name: action.skill_name.to_string(),
            description: action.description.map(str::to_string),
            content: action.content.map(str::to_string),
            source_path: source.as_ref().map(|(_, resolved)| resolved.path.clone()),
        };

        match self.ports.skills.install_skill(self.paths, &request) {
            Ok(installed) => {
                info!(skill_id = %installed.skill_id, agent_id = %installed.agent_id, "skill installed");
                effects.notes.push(format!(
                    "[SKILL] installed {} for {} from {} at {}",
                    installed.skill_id,
                    installed.agent_id,
                    installed.source,
                    installed.installed_path.display()
                ));
                effects.artifact_io = Some(ArtifactIo {
                    operation: ArtifactOperation::InstallSkill,
                    requested_path: action
                        .source_path
                        .unwrap_or(action.skill_name)
                        .to_string(),
                    resolved_path: installed.installed_path.display().to_string(),
                    blocked: source.as_ref().is_some_and(|(_, resolved)| resolved.blocked),
                    missing: false,
                    bytes: None,
                });
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "skill install failed");
                effects.notes.push(format!(
                    "[SKILL] failed to install '{}' for {target}: {err:#}",
                    action.skill_name
                ));
            }
        }
    }

    fn invalid_target_reason(&self, target: &str) -> Option<String> {
        if target == self.request.orchestrator_id {
            return Some("the orchestrator cannot delegate to itself".to_string());
        }
        match self.roster.iter().find(|agent| agent.agent_id == target) {
            None => Some("unknown agent".to_string()),
            Some(agent) if !agent.can_receive() => {
                Some("agent does not accept delegations".to_string())
            }
            Some(_) => None,
        }
    }

    #[instrument(skip_all, fields(step = step, target = %delegation.target))]
    fn delegate(
        &mut self,
        step: u32,
        delegation: Delegation<'_>,
        effects: &mut StepEffects,
    ) -> Result<()> {
        let orchestrator = self.request.orchestrator_id;
        let target = delegation.target;
        if let Some(reason) = self.invalid_target_reason(target) {
            effects
                .notes
                .push(format!("[INVALID TARGET] {target}: {reason}"));
            return Ok(());
        }

        let task_key = delegation
            .task_key
            .map(str::to_string)
            .unwrap_or_else(|| derived_task_key(target, step));
        let choice = choose_session(
            delegation.policy,
            find_thread(&self.state.threads, &task_key, target),
        );
        if choice.downgraded {
            effects.notes.push(format!(
                "[SESSION] no existing thread '{task_key}' for {target}; starting a fresh session"
            ));
        }
        self.state.delegations += 1;

        let coordination = self.paths.coordination_dir(orchestrator, self.request.run_id);
        let handoff_path = if delegation.mode.writes_artifacts() {
            let path = coordination.join(format!("step-{step:02}-{target}-handoff.md"));
            let notes = clamp_notes(&self.state.notes, self.settings.notes_budget_chars);
            let doc = render_handoff(&HandoffInputs {
                run_id: self.request.run_id,
                step,
                orchestrator_id: orchestrator,
                agent_id: target,
                task_key: &task_key,
                mode: delegation.mode.as_str(),
                user_message: self.request.user_message,
                message: delegation.message,
                expected_output: delegation.expected_output,
                notes: &notes,
            })?;
            self.ports.fs.write_file(&path, &doc)?;
            Some(path)
        } else {
            None
        };

        let message = delegate_message(&delegation, handoff_path.as_deref());
        let session_ref = format!("task-{task_key}");
        let prepared = self
            .ports
            .sessions
            .prepare_run_session(
                self.paths,
                target,
                &SessionRequest {
                    session_ref: Some(&session_ref),
                    force_new: !choice.reuse,
                    disable_session: self.request.disable_session,
                    user_message: &message,
                },
            )
            .with_context(|| format!("prepare session for {target}"))?;

        info!(
            task_key = %task_key,
            reuse = choice.reuse,
            mode = delegation.mode.as_str(),
            "delegating"
        );
        let execution = self.ports.agents.invoke_agent(
            self.paths,
            target,
            &InvokeOptions {
                prompt: &prepared.prompt,
                silent: self.request.silent,
                provider_session_id: choice.provider_session_id.as_deref(),
                force_new_provider_session: !choice.reuse,
            },
        )?;

        let response = response_text(&execution, self.settings.delegation_note_chars);
        let response_path = match &handoff_path {
            Some(_) => {
                let path = coordination.join(format!("step-{step:02}-{target}-response.md"));
                let doc = render_response(self.request.run_id, step, target, &task_key, &execution)?;
                self.ports.fs.write_file(&path, &doc)?;
                Some(path)
            }
            None => None,
        };

        if execution.succeeded()
            && let Some(mut session) = prepared.session.clone()
        {
            session.provider_session_id = execution.provider_session_id.clone();
            self.ports
                .sessions
                .record_assistant_reply(self.paths, &session, &response)
                .with_context(|| format!("record reply for {target}"))?;
        }

        let note = format!(
            "[{target}:{task_key}] {}",
            one_line(&response, self.settings.delegation_note_chars)
        );
        effects.notes.push(note);

        let session_ids = ThreadSessionIds {
            session_key: prepared.session.as_ref().map(|s| s.session_key.clone()),
            session_id: prepared.session.as_ref().map(|s| s.session_id.clone()),
        };
        upsert_thread(
            &mut self.state.threads,
            &task_key,
            target,
            step,
            &execution,
            session_ids.clone(),
            Some(one_line(&response, self.settings.delegation_note_chars)),
        );

        self.state.graph.add_node(SessionNode {
            agent_id: target.to_string(),
            provider_id: Some(execution.provider_id.clone()),
            session_key: session_ids.session_key.clone(),
            session_id: session_ids.session_id.clone(),
            provider_session_id: execution.provider_session_id.clone(),
        });
        if execution.succeeded() {
            self.state
                .graph
                .add_edge(orchestrator, target, Some(format!("step {step}: {task_key}")));
        }

        effects.agent_call = Some(AgentCallLog {
            agent_id: target.to_string(),
            task_key,
            session_policy: delegation.policy,
            reused_session: choice.reuse,
            downgraded: choice.downgraded,
            session_key: session_ids.session_key,
            session_id: session_ids.session_id,
            provider_session_id_in: choice.provider_session_id,
            execution,
            handoff_path: handoff_path.map(|p| p.display().to_string()),
            response_path: response_path.map(|p| p.display().to_string()),
        });
        Ok(())
    }

    /// Zero-exit execution carrying `message` as stdout.
    fn synthetic_execution(&self, message: &str) -> Result<AgentExecution> {
        let provider = self
            .ports
            .agents
            .agent_provider(self.paths, self.request.orchestrator_id)?;
        Ok(AgentExecution {
            code: 0,
            stdout: format!("{message}\n"),
            stderr: String::new(),
            provider_id: provider.provider_id,
            provider_session_id: None,
        })
    }

    fn stop_message(&self, reason: StopReason) -> String {
        let limit = match reason {
            StopReason::DelegationLimit => format!(
                "the delegation limit ({})",
                self.settings.max_delegations
            ),
            _ => format!("the step limit ({})", self.settings.max_steps),
        };
        if self.state.notes.is_empty() {
            return format!("Stopped after reaching {limit} without a final answer.");
        }
        format!(
            "Reached {limit} before the work was finished. Notes so far:\n{}",
            clamp_notes(&self.state.notes, self.settings.notes_budget_chars)
        )
    }
}

struct SkillAction<'a> {
    skill_name: &'a str,
    target_agent_id: Option<&'a str>,
    source_path: Option<&'a str>,
    description: Option<&'a str>,
    content: Option<&'a str>,
}

struct Delegation<'a> {
    target: &'a str,
    message: &'a str,
    expected_output: Option<&'a str>,
    mode: ActionMode,
    task_key: Option<&'a str>,
    policy: SessionPolicy,
}

/// Text actually sent to the delegate for its delivery mode.
fn delegate_message(delegation: &Delegation<'_>, handoff: Option<&Path>) -> String {
    let mut inline = delegation.message.trim().to_string();
    if let Some(expected) = delegation.expected_output.filter(|e| !e.trim().is_empty()) {
        inline.push_str("\n\nExpected output: ");
        inline.push_str(expected.trim());
    }
    match (delegation.mode, handoff) {
        (ActionMode::Artifacts, Some(path)) => format!(
            "Your task is described in the handoff file {}. Read it and reply with your result.",
            path.display()
        ),
        (ActionMode::Hybrid, Some(path)) => {
            format!("{inline}\n\nFull handoff: {}", path.display())
        }
        _ => inline,
    }
}

/// Delegate reply used for notes and sessions: stdout, or a stderr summary.
fn response_text(execution: &AgentExecution, max_chars: usize) -> String {
    let stdout = execution.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    let stderr = one_line(&execution.stderr, max_chars);
    if stderr.is_empty() {
        format!("[no output; exit code {}]", execution.code)
    } else {
        format!("[no output; exit code {}; stderr: {stderr}]", execution.code)
    }
}
