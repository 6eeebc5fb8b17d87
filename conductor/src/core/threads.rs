//! Task-thread bookkeeping: session policy resolution and upserts.

use crate::core::text::one_line;
use crate::core::types::{AgentExecution, SessionPolicy, TaskThreadState, TaskThreads};

/// How a delegation will treat the target agent's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChoice {
    /// Continue the existing thread's provider session.
    pub reuse: bool,
    /// `reuse` was requested but no matching thread existed.
    pub downgraded: bool,
    /// Provider-session handle to hand to the invocation (reuse only).
    pub provider_session_id: Option<String>,
}

/// Existing thread for `task_key`, but only if it belongs to `agent_id`.
pub fn find_thread<'a>(
    threads: &'a TaskThreads,
    task_key: &str,
    agent_id: &str,
) -> Option<&'a TaskThreadState> {
    threads
        .get(task_key)
        .filter(|thread| thread.agent_id == agent_id)
}

/// Apply the planner's session policy to the thread lookup result.
pub fn choose_session(
    policy: SessionPolicy,
    existing: Option<&TaskThreadState>,
) -> SessionChoice {
    match (policy, existing) {
        (SessionPolicy::New, _) => SessionChoice {
            reuse: false,
            downgraded: false,
            provider_session_id: None,
        },
        (SessionPolicy::Auto | SessionPolicy::Reuse, Some(thread)) => SessionChoice {
            reuse: true,
            downgraded: false,
            provider_session_id: thread.provider_session_id.clone(),
        },
        (SessionPolicy::Auto, None) => SessionChoice {
            reuse: false,
            downgraded: false,
            provider_session_id: None,
        },
        (SessionPolicy::Reuse, None) => SessionChoice {
            reuse: false,
            downgraded: true,
            provider_session_id: None,
        },
    }
}

/// Session identifiers observed for one delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSessionIds {
    pub session_key: Option<String>,
    pub session_id: Option<String>,
}

/// Insert or update the thread for `task_key` after a delegation.
///
/// An existing thread for the same agent keeps its `created_step`; a thread
/// previously bound to another agent is replaced.
pub fn upsert_thread(
    threads: &mut TaskThreads,
    task_key: &str,
    agent_id: &str,
    step: u32,
    execution: &AgentExecution,
    session: ThreadSessionIds,
    last_response: Option<String>,
) -> TaskThreadState {
    let created_step = find_thread(threads, task_key, agent_id)
        .map(|thread| thread.created_step)
        .unwrap_or(step);

    let state = TaskThreadState {
        task_key: task_key.to_string(),
        agent_id: agent_id.to_string(),
        provider_id: Some(execution.provider_id.clone()),
        provider_session_id: execution.provider_session_id.clone(),
        session_key: session.session_key,
        session_id: session.session_id,
        created_step,
        updated_step: step,
        last_response,
    };
    threads.insert(task_key.to_string(), state.clone());
    state
}

/// Compact one-line summary used in the planner prompt.
pub fn summarize_thread(thread: &TaskThreadState, response_chars: usize) -> String {
    let last = thread
        .last_response
        .as_deref()
        .map(|text| one_line(text, response_chars))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}: agent={}; provider={}; providerSessionId={}; updatedStep={}; lastResponse={}",
        thread.task_key,
        thread.agent_id,
        thread.provider_id.as_deref().unwrap_or("-"),
        thread.provider_session_id.as_deref().unwrap_or("-"),
        thread.updated_step,
        last
    )
}
