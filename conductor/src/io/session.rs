//! JSON-backed conversational sessions under `.conductor/sessions/<agent>/`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::init::ConductorPaths;
use super::ports::{
    PreparedSessionRun, SessionCompactionResult, SessionInfo, SessionRequest, SessionStore,
};
use crate::core::text::{clamp_text, one_line};

/// Session key used when the caller does not name one.
pub const DEFAULT_SESSION_KEY: &str = "main";

const SUMMARY_MAX_CHARS: usize = 4_000;
const SUMMARY_LINE_CHARS: usize = 200;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionMessage {
    role: Role,
    content: String,
    timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    session_id: String,
    session_key: String,
    agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider_session_id: Option<String>,
    created_at: String,
    updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default)]
    messages: Vec<SessionMessage>,
}

impl SessionFile {
    fn fresh(agent_id: &str, session_key: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            session_id: Uuid::new_v4().to_string(),
            session_key: session_key.to_string(),
            agent_id: agent_id.to_string(),
            provider_session_id: None,
            created_at: now.clone(),
            updated_at: now,
            summary: None,
            messages: Vec::new(),
        }
    }

    fn push(&mut self, role: Role, content: &str) {
        let now = Utc::now().to_rfc3339();
        self.messages.push(SessionMessage {
            role,
            content: content.to_string(),
            timestamp: now.clone(),
        });
        self.updated_at = now;
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            agent_id: self.agent_id.clone(),
            session_key: self.session_key.clone(),
            session_id: self.session_id.clone(),
            provider_session_id: self.provider_session_id.clone(),
        }
    }

    /// Prior conversation as plain text, or `None` for an empty session.
    fn render_context(&self) -> Option<String> {
        if self.summary.is_none() && self.messages.is_empty() {
            return None;
        }
        let mut out = String::new();
        if let Some(summary) = &self.summary {
            out.push_str("Summary of earlier conversation:\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }
        for message in &self.messages {
            out.push_str(message.role.label());
            out.push_str(": ");
            out.push_str(message.content.trim());
            out.push('\n');
        }
        Some(out.trim_end().to_string())
    }

    /// Fold the oldest messages into the summary once history exceeds `max_messages`.
    fn compact(&mut self, max_messages: usize) -> SessionCompactionResult {
        if self.messages.len() <= max_messages {
            return SessionCompactionResult {
                compacted: false,
                folded_messages: 0,
                remaining_messages: self.messages.len(),
            };
        }
        let keep = max_messages / 2;
        let fold = self.messages.len() - keep;
        let folded: Vec<String> = self
            .messages
            .drain(..fold)
            .map(|m| {
                format!(
                    "- {}: {}",
                    m.role.label(),
                    one_line(&m.content, SUMMARY_LINE_CHARS)
                )
            })
            .collect();

        let mut summary = self.summary.take().unwrap_or_default();
        if !summary.is_empty() {
            summary.push('\n');
        }
        summary.push_str(&folded.join("\n"));
        self.summary = Some(clamp_text(&summary, SUMMARY_MAX_CHARS));

        SessionCompactionResult {
            compacted: true,
            folded_messages: fold,
            remaining_messages: self.messages.len(),
        }
    }
}

/// File-backed [`SessionStore`].
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    max_messages: usize,
}

impl FsSessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }
}

impl SessionStore for FsSessionStore {
    #[instrument(skip_all, fields(agent_id = %agent_id, force_new = request.force_new, disabled = request.disable_session))]
    fn prepare_run_session(
        &self,
        paths: &ConductorPaths,
        agent_id: &str,
        request: &SessionRequest<'_>,
    ) -> Result<PreparedSessionRun> {
        if request.disable_session {
            return Ok(PreparedSessionRun {
                prompt: request.user_message.to_string(),
                context: None,
                session: None,
            });
        }

        let key = request
            .session_ref
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .unwrap_or(DEFAULT_SESSION_KEY);
        let path = session_path(paths, agent_id, key)?;

        let mut file = if request.force_new || !path.exists() {
            debug!(session_key = key, "starting new session");
            SessionFile::fresh(agent_id, key)
        } else {
            load_session(&path)?
        };

        let context = file.render_context();
        let prompt = match &context {
            Some(context) => format!(
                "<conversation>\n{context}\n</conversation>\n\n{}",
                request.user_message
            ),
            None => request.user_message.to_string(),
        };

        file.push(Role::User, request.user_message);
        save_session(&path, &file)?;

        Ok(PreparedSessionRun {
            prompt,
            context,
            session: Some(file.info()),
        })
    }

    #[instrument(skip_all, fields(agent_id = %session.agent_id, session_key = %session.session_key))]
    fn record_assistant_reply(
        &self,
        paths: &ConductorPaths,
        session: &SessionInfo,
        content: &str,
    ) -> Result<SessionCompactionResult> {
        let path = session_path(paths, &session.agent_id, &session.session_key)?;
        let mut file = load_session(&path)?;
        if file.session_id != session.session_id {
            return Err(anyhow!(
                "session {} was replaced while the run was in progress",
                session.session_key
            ));
        }
        file.push(Role::Assistant, content);
        if session.provider_session_id.is_some() {
            file.provider_session_id = session.provider_session_id.clone();
        }
        let result = file.compact(self.max_messages);
        if result.compacted {
            info!(
                folded = result.folded_messages,
                remaining = result.remaining_messages,
                "compacted session"
            );
        }
        save_session(&path, &file)?;
        Ok(result)
    }
}

fn session_path(paths: &ConductorPaths, agent_id: &str, key: &str) -> Result<PathBuf> {
    if key.trim().is_empty() {
        return Err(anyhow!("session key '{key}' is blank"));
    }
    Ok(paths
        .agent_sessions_dir(agent_id)
        .join(format!("{}.json", session_file_stem(key))))
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]` (and a leading `.`).
///
/// Injective, so distinct keys such as `review:v2` and `review-v2` never
/// share a file.
fn session_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => stem.push(char::from(byte)),
            b'.' if !stem.is_empty() => stem.push('.'),
            _ => {
                let _ = write!(stem, "%{byte:02X}");
            }
        }
    }
    stem
}

fn load_session(path: &Path) -> Result<SessionFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse session {}", path.display()))
}

fn save_session(path: &Path, file: &SessionFile) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("session path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(file).context("serialize session")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace session {}", path.display()))
}
