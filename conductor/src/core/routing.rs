//! One-shot routing of an inbound message to an entry/target agent.
//!
//! Pure: takes the roster as data and never fails. Unknown hints degrade the
//! confidence score and reason text instead of producing an error.

use crate::core::types::{AgentManifest, RoutingDecision};

const CONFIDENCE_EXACT: f64 = 1.0;
const CONFIDENCE_MENTION: f64 = 0.9;
const CONFIDENCE_DEFAULT: f64 = 0.6;
const CONFIDENCE_FIRST: f64 = 0.3;
const CONFIDENCE_NONE: f64 = 0.0;

/// Decide the entry and target agent for `message`.
///
/// `default_agent_id` is the well-known orchestrator id used when the hint is
/// blank or unknown.
pub fn decide_route(
    roster: &[AgentManifest],
    entry_hint: &str,
    message: &str,
    default_agent_id: &str,
) -> RoutingDecision {
    let hint = entry_hint.trim().to_lowercase();
    let message = message.trim();

    let (entry, confidence, reason) = resolve_entry(roster, &hint, default_agent_id);
    let candidates: Vec<String> = roster
        .iter()
        .filter(|agent| agent.can_receive() && agent.agent_id != entry)
        .map(|agent| agent.agent_id.clone())
        .collect();

    let entry_can_delegate = roster
        .iter()
        .any(|agent| agent.agent_id == entry && agent.can_delegate());
    if entry_can_delegate
        && let Some((mentioned, rest)) = mention(message)
        && candidates.contains(&mentioned)
    {
        return RoutingDecision {
            entry_agent_id: entry,
            target_agent_id: mentioned.clone(),
            confidence: CONFIDENCE_MENTION,
            reason: format!("{reason}; message addresses @{mentioned} directly"),
            rewritten_message: rest.to_string(),
            candidates,
        };
    }

    RoutingDecision {
        entry_agent_id: entry.clone(),
        target_agent_id: entry,
        confidence,
        reason,
        rewritten_message: message.to_string(),
        candidates,
    }
}

fn resolve_entry(
    roster: &[AgentManifest],
    hint: &str,
    default_agent_id: &str,
) -> (String, f64, String) {
    let known = |id: &str| roster.iter().any(|agent| agent.agent_id == id);

    if !hint.is_empty() && known(hint) {
        return (
            hint.to_string(),
            CONFIDENCE_EXACT,
            format!("entry agent '{hint}' requested explicitly"),
        );
    }

    let missing = if hint.is_empty() {
        "no entry agent requested".to_string()
    } else {
        format!("unknown entry agent '{hint}'")
    };

    if known(default_agent_id) {
        return (
            default_agent_id.to_string(),
            CONFIDENCE_DEFAULT,
            format!("{missing}; using default agent '{default_agent_id}'"),
        );
    }

    if let Some(first) = roster.first() {
        return (
            first.agent_id.clone(),
            CONFIDENCE_FIRST,
            format!(
                "{missing}; default agent '{default_agent_id}' not installed, using first agent '{}'",
                first.agent_id
            ),
        );
    }

    let fallback = if hint.is_empty() {
        default_agent_id.to_string()
    } else {
        hint.to_string()
    };
    (
        fallback,
        CONFIDENCE_NONE,
        format!("{missing}; no agents are installed"),
    )
}

/// Split a leading `@agent` mention off the message.
fn mention(message: &str) -> Option<(String, &str)> {
    let rest = message.strip_prefix('@')?;
    let end = rest
        .find(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .unwrap_or(rest.len());
    let id = rest[..end].trim().to_lowercase();
    if id.is_empty() {
        return None;
    }
    let remainder = rest[end..].trim_start_matches([',', ':']).trim();
    Some((id, remainder))
}
