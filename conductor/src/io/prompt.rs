//! Prompt and handoff rendering for the planner loop.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::AgentExecution;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const HANDOFF_TEMPLATE: &str = include_str!("prompts/handoff.md");
const RESPONSE_TEMPLATE: &str = include_str!("prompts/response.md");

/// Droppable planner sections, least important first.
const DROP_ORDER: [&str; 4] = ["conversation", "threads", "events", "notes"];

const TRUNCATED_SUFFIX: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("planner", PLANNER_TEMPLATE)
        .context("load planner template")?;
    env.add_template("handoff", HANDOFF_TEMPLATE)
        .context("load handoff template")?;
    env.add_template("response", RESPONSE_TEMPLATE)
        .context("load response template")?;
    Ok(env)
}

/// Agent line shown to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerAgent {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provider: String,
}

/// Loop state snapshot rendered into the planner prompt.
#[derive(Debug, Clone)]
pub struct PlannerPromptInputs<'a> {
    pub orchestrator_id: &'a str,
    pub user_message: &'a str,
    pub agents: &'a [PlannerAgent],
    pub step: u32,
    pub max_steps: u32,
    pub delegations: u32,
    pub max_delegations: u32,
    /// Notes already clamped to the notes budget.
    pub notes: &'a str,
    pub events: &'a [String],
    pub threads: &'a [String],
    pub conversation: Option<&'a str>,
    /// Coordination directory relative to the orchestrator workspace.
    pub coordination_dir: &'a str,
}

/// Render the planner prompt and fit it into `budget_bytes`.
pub fn build_planner_prompt(input: &PlannerPromptInputs<'_>, budget_bytes: usize) -> Result<String> {
    let env = environment()?;
    let rendered = env
        .get_template("planner")?
        .render(context! {
            orchestrator_id => input.orchestrator_id,
            user_message => input.user_message.trim(),
            agents => input.agents,
            step => input.step,
            max_steps => input.max_steps,
            delegations => input.delegations,
            max_delegations => input.max_delegations,
            notes => (!input.notes.trim().is_empty()).then(|| input.notes.trim()),
            events => input.events,
            threads => input.threads,
            conversation => input.conversation.map(str::trim).filter(|c| !c.is_empty()),
            coordination_dir => input.coordination_dir,
        })
        .context("render planner prompt")?;

    let mut sections = parse_sections(&rendered);
    apply_budget_to_sections(&mut sections, budget_bytes);
    Ok(render_sections(&sections))
}

/// Inputs for the handoff document written before an artifact delegation.
#[derive(Debug, Clone)]
pub struct HandoffInputs<'a> {
    pub run_id: &'a str,
    pub step: u32,
    pub orchestrator_id: &'a str,
    pub agent_id: &'a str,
    pub task_key: &'a str,
    pub mode: &'a str,
    pub user_message: &'a str,
    pub message: &'a str,
    pub expected_output: Option<&'a str>,
    pub notes: &'a str,
}

pub fn render_handoff(input: &HandoffInputs<'_>) -> Result<String> {
    let env = environment()?;
    let rendered = env
        .get_template("handoff")?
        .render(context! {
            run_id => input.run_id,
            step => input.step,
            orchestrator_id => input.orchestrator_id,
            agent_id => input.agent_id,
            task_key => input.task_key,
            mode => input.mode,
            user_message => input.user_message.trim(),
            message => input.message.trim(),
            expected_output => input.expected_output.map(str::trim).filter(|e| !e.is_empty()),
            notes => (!input.notes.trim().is_empty()).then(|| input.notes.trim()),
        })
        .context("render handoff")?;
    Ok(finish_markdown(rendered))
}

pub fn render_response(
    run_id: &str,
    step: u32,
    agent_id: &str,
    task_key: &str,
    execution: &AgentExecution,
) -> Result<String> {
    let env = environment()?;
    let rendered = env
        .get_template("response")?
        .render(context! {
            run_id => run_id,
            step => step,
            agent_id => agent_id,
            task_key => task_key,
            provider_id => execution.provider_id,
            provider_session_id => execution.provider_session_id,
            code => execution.code,
            stdout => execution.stdout.trim(),
            stderr => execution.stderr.trim(),
        })
        .context("render response")?;
    Ok(finish_markdown(rendered))
}

fn finish_markdown(rendered: String) -> String {
    let mut out = rendered.trim_end().to_string();
    out.push('\n');
    out
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
///
/// Empty droppable sections are omitted.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = kind.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        if allowed > TRUNCATED_SUFFIX.len() {
            truncate_at_char_boundary(&mut last.content, allowed - TRUNCATED_SUFFIX.len());
            last.content.push_str(TRUNCATED_SUFFIX);
        } else {
            truncate_at_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
