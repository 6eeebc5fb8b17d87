//! Text shaping helpers for notes, events and keys.

use std::sync::LazyLock;

use regex::Regex;

pub const TRUNCATION_MARKER: &str = "\n...[truncated]...\n";

/// Maximum length of a normalized task key.
pub const TASK_KEY_MAX_CHARS: usize = 64;

/// Share of the budget given to the tail when clamping (most recent context).
const TAIL_PERCENT: usize = 70;

static TASK_KEY_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9._:-]+").expect("task key regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Clamp `text` to `budget` characters, keeping the head and the (larger) tail.
pub fn clamp_text(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if budget <= marker_len {
        return text.chars().skip(total - budget).collect();
    }
    let available = budget - marker_len;
    let tail_len = available * TAIL_PERCENT / 100;
    let head_len = available - tail_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Join notes with newlines and clamp the result.
pub fn clamp_notes(notes: &[String], budget: usize) -> String {
    clamp_text(&notes.join("\n"), budget)
}

/// Collapse whitespace onto a single line and cap it at `max_chars`.
pub fn one_line(text: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    if collapsed.chars().count() <= max_chars {
        return collapsed.into_owned();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = collapsed.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Slug-normalize a planner-supplied task key.
///
/// Returns `None` when nothing usable remains.
pub fn normalize_task_key(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let replaced = TASK_KEY_INVALID.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    let capped: String = trimmed.chars().take(TASK_KEY_MAX_CHARS).collect();
    let capped = capped.trim_end_matches('-');
    if capped.is_empty() {
        return None;
    }
    Some(capped.to_string())
}

/// Task key used when the planner does not name one.
pub fn derived_task_key(agent_id: &str, step: u32) -> String {
    format!("{agent_id}-step-{step}")
}
