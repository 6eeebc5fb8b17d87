//! Agent manifests stored as `.conductor/agents/<id>/agent.toml`.

use std::fs;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use super::init::ConductorPaths;
use super::ports::ManifestSource;
use crate::core::types::{AgentManifest, AgentMetadata};

/// Reads the roster from the agents directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsManifestSource;

impl ManifestSource for FsManifestSource {
    #[instrument(skip_all, fields(agents_dir = %paths.agents_dir.display()))]
    fn list_manifests(&self, paths: &ConductorPaths) -> Result<Vec<AgentManifest>> {
        if !paths.agents_dir.exists() {
            debug!("agents directory missing, empty roster");
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&paths.agents_dir)
            .with_context(|| format!("read directory {}", paths.agents_dir.display()))?;

        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("read directory entry in {}", paths.agents_dir.display())
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(agent_id) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non-utf8 agent directory");
                continue;
            };
            if !paths.manifest_path(&agent_id).is_file() {
                debug!(agent_id, "skipping agent directory without agent.toml");
                continue;
            }
            manifests.push(load_manifest(paths, &agent_id)?);
        }
        manifests.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        debug!(count = manifests.len(), "loaded manifests");
        Ok(manifests)
    }
}

/// Load a single agent's manifest.
pub fn load_manifest(paths: &ConductorPaths, agent_id: &str) -> Result<AgentManifest> {
    let path = paths.manifest_path(agent_id);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read manifest {}", path.display()))?;
    let metadata: AgentMetadata =
        toml::from_str(&contents).with_context(|| format!("parse manifest {}", path.display()))?;
    if metadata.provider.trim().is_empty() {
        return Err(anyhow!("manifest {} has an empty provider", path.display()));
    }
    Ok(AgentManifest {
        agent_id: agent_id.to_string(),
        metadata,
    })
}

/// Write (or overwrite) an agent's manifest.
pub fn write_manifest(paths: &ConductorPaths, manifest: &AgentManifest) -> Result<()> {
    let id = manifest.agent_id.as_str();
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "agent id '{id}' must be lowercase letters, digits, '-' or '_'"
        ));
    }
    let dir = paths.agent_dir(id);
    fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
    let mut buf = toml::to_string_pretty(&manifest.metadata).context("serialize manifest toml")?;
    buf.push('\n');
    let path = paths.manifest_path(id);
    fs::write(&path, buf).with_context(|| format!("write manifest {}", path.display()))
}
