//! Planner output parsing, validation and normalization.
//!
//! Planner replies are untrusted free text. Each candidate JSON payload is
//! checked against the decision schema, deserialized into a closed raw shape
//! and normalized before any field is used. Anything that does not survive
//! becomes a fixed fallback decision; parsing never fails.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::text::normalize_task_key;
use crate::core::types::{Action, ActionMode, PlannerDecision, SessionPolicy};

const PLANNER_DECISION_SCHEMA: &str =
    include_str!("../../schemas/planner_decision.schema.json");

pub const FALLBACK_RATIONALE: &str = "planner output was not valid JSON";
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I could not work out the next step for this request. Please try rephrasing it.";

static DECISION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(PLANNER_DECISION_SCHEMA).expect("decision schema is valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("decision schema compiles")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").expect("fenced block regex")
});

/// Where an accepted decision was found in the raw planner text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The whole reply was a JSON document.
    Direct,
    /// A fenced code block.
    Fenced,
    /// The span between the first `{` and the last `}`.
    Braces,
    /// Nothing usable; the fixed fallback was returned.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    pub decision: PlannerDecision,
    pub source: DecisionSource,
}

/// Parse raw planner text into a validated decision, or the fallback.
pub fn parse_planner_output(raw: &str) -> ParsedDecision {
    let mut candidates = vec![(DecisionSource::Direct, raw.trim())];
    candidates.extend(
        fenced_blocks(raw)
            .into_iter()
            .map(|block| (DecisionSource::Fenced, block)),
    );
    candidates.extend(brace_span(raw).map(|span| (DecisionSource::Braces, span)));

    for (source, candidate) in candidates {
        match decode_candidate(candidate) {
            Ok(decision) => {
                debug!(?source, action = decision.action.kind(), "planner decision accepted");
                return ParsedDecision { decision, source };
            }
            Err(reason) => debug!(?source, %reason, "planner candidate rejected"),
        }
    }

    warn!(raw_len = raw.len(), "planner output unusable, using fallback decision");
    ParsedDecision {
        decision: fallback_decision(),
        source: DecisionSource::Fallback,
    }
}

/// The fixed safe decision used when planner output cannot be trusted.
pub fn fallback_decision() -> PlannerDecision {
    PlannerDecision {
        rationale: FALLBACK_RATIONALE.to_string(),
        action: Action::RespondUser {
            message: FALLBACK_MESSAGE.to_string(),
            mode: ActionMode::Direct,
        },
    }
}

/// Non-empty fenced blocks, json-tagged ones first, each group in order.
fn fenced_blocks(raw: &str) -> Vec<&str> {
    let (mut tagged, untagged): (Vec<_>, Vec<_>) = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| {
            let body = caps.get(2)?.as_str().trim();
            let is_json = caps
                .get(1)
                .is_some_and(|lang| lang.as_str().eq_ignore_ascii_case("json"));
            (!body.is_empty()).then_some((is_json, body))
        })
        .partition(|(is_json, _)| *is_json);
    tagged.extend(untagged);
    tagged.into_iter().map(|(_, body)| body).collect()
}

fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn decode_candidate(candidate: &str) -> Result<PlannerDecision, String> {
    let value: Value = serde_json::from_str(candidate).map_err(|err| err.to_string())?;
    let errors: Vec<String> = DECISION_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(errors.join("; "));
    }
    let raw: RawDecision = serde_json::from_value(value).map_err(|err| err.to_string())?;
    normalize(raw)
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    rationale: Option<String>,
    action: RawAction,
}

#[derive(Debug, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
enum RawAction {
    DelegateToAgent {
        target_agent_id: String,
        message: String,
        #[serde(default)]
        expected_output: Option<String>,
        #[serde(default)]
        mode: Option<ActionMode>,
        #[serde(default)]
        task_key: Option<String>,
        #[serde(default)]
        session_policy: Option<SessionPolicy>,
    },
    ReadWorkspaceFile {
        path: String,
        #[serde(default)]
        mode: Option<ActionMode>,
    },
    WriteWorkspaceFile {
        path: String,
        content: String,
        #[serde(default)]
        mode: Option<ActionMode>,
    },
    InstallSkill {
        skill_name: String,
        #[serde(default)]
        target_agent_id: Option<String>,
        #[serde(default)]
        source_path: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        mode: Option<ActionMode>,
    },
    RespondUser {
        message: String,
        #[serde(default)]
        mode: Option<ActionMode>,
    },
    Finish {
        message: String,
        #[serde(default)]
        mode: Option<ActionMode>,
    },
}

fn normalize(raw: RawDecision) -> Result<PlannerDecision, String> {
    let rationale = raw.rationale.unwrap_or_default().trim().to_string();
    let action = match raw.action {
        RawAction::DelegateToAgent {
            target_agent_id,
            message,
            expected_output,
            mode,
            task_key,
            session_policy,
        } => Action::DelegateToAgent {
            target_agent_id: required_id(&target_agent_id, "targetAgentId")?,
            message: required_text(&message, "message")?,
            expected_output: optional_text(expected_output),
            mode: mode.unwrap_or(ActionMode::Hybrid),
            task_key: task_key.as_deref().and_then(normalize_task_key),
            session_policy: session_policy.unwrap_or(SessionPolicy::Auto),
        },
        RawAction::ReadWorkspaceFile { path, mode } => Action::ReadWorkspaceFile {
            path: required_text(&path, "path")?,
            mode: mode.unwrap_or(ActionMode::Hybrid),
        },
        RawAction::WriteWorkspaceFile {
            path,
            content,
            mode,
        } => Action::WriteWorkspaceFile {
            path: required_text(&path, "path")?,
            content,
            mode: mode.unwrap_or(ActionMode::Direct),
        },
        RawAction::InstallSkill {
            skill_name,
            target_agent_id,
            source_path,
            description,
            content,
            mode,
        } => Action::InstallSkill {
            skill_name: required_text(&skill_name, "skillName")?,
            target_agent_id: optional_text(target_agent_id).map(|id| id.to_lowercase()),
            source_path: optional_text(source_path),
            description: optional_text(description),
            content: content.filter(|c| !c.trim().is_empty()),
            mode: mode.unwrap_or(ActionMode::Direct),
        },
        RawAction::RespondUser { message, mode } => Action::RespondUser {
            message: message.trim().to_string(),
            mode: mode.unwrap_or(ActionMode::Direct),
        },
        RawAction::Finish { message, mode } => Action::Finish {
            message: message.trim().to_string(),
            mode: mode.unwrap_or(ActionMode::Direct),
        },
    };
    Ok(PlannerDecision { rationale, action })
}

fn required_text(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} must not be blank"));
    }
    Ok(trimmed.to_string())
}

fn required_id(value: &str, field: &str) -> Result<String, String> {
    required_text(value, field).map(|id| id.to_lowercase())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
