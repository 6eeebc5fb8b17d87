//! Skill installation into `.conductor/agents/<id>/skills/<slug>/SKILL.md`.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{info, instrument};

use super::init::ConductorPaths;
use super::ports::{InstalledSkill, SkillInstallRequest, SkillInstaller};

const SKILL_FILE: &str = "SKILL.md";

static SLUG_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+").expect("skill slug regex"));

/// Writes skills into the target agent's manifest directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSkillInstaller;

impl SkillInstaller for FsSkillInstaller {
    #[instrument(skip_all, fields(agent_id = %request.agent_id, skill = %request.skill_name))]
    fn install_skill(
        &self,
        paths: &ConductorPaths,
        request: &SkillInstallRequest,
    ) -> Result<InstalledSkill> {
        if !paths.manifest_path(&request.agent_id).is_file() {
            return Err(anyhow!("agent '{}' is not installed", request.agent_id));
        }
        let slug = skill_slug(&request.skill_name)
            .ok_or_else(|| anyhow!("skill name '{}' has no usable characters", request.skill_name))?;
        let skill_dir = paths.skills_dir(&request.agent_id).join(&slug);
        fs::create_dir_all(&skill_dir)
            .with_context(|| format!("create directory {}", skill_dir.display()))?;
        let skill_file = skill_dir.join(SKILL_FILE);

        let source = match (&request.content, &request.source_path) {
            (Some(content), _) => {
                write_skill_file(&skill_file, &with_front_matter(&slug, request, content))?;
                "inline".to_string()
            }
            (None, Some(source)) if source.is_dir() => {
                copy_dir(source, &skill_dir)?;
                if !skill_file.is_file() {
                    return Err(anyhow!("{} has no {SKILL_FILE}", source.display()));
                }
                source.display().to_string()
            }
            (None, Some(source)) => {
                let content = fs::read_to_string(source)
                    .with_context(|| format!("read skill source {}", source.display()))?;
                write_skill_file(&skill_file, &with_front_matter(&slug, request, &content))?;
                source.display().to_string()
            }
            (None, None) => {
                let body = request
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Skill {}.", request.skill_name));
                write_skill_file(&skill_file, &with_front_matter(&slug, request, &body))?;
                "generated".to_string()
            }
        };

        info!(skill_id = %slug, source = %source, "installed skill");
        Ok(InstalledSkill {
            skill_id: slug,
            agent_id: request.agent_id.clone(),
            source,
            installed_path: skill_file,
        })
    }
}

/// Directory-safe skill identifier.
pub fn skill_slug(name: &str) -> Option<String> {
    let lowered = name.trim().to_lowercase();
    let slug = SLUG_INVALID.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    (!slug.is_empty()).then(|| slug.to_string())
}

fn with_front_matter(slug: &str, request: &SkillInstallRequest, body: &str) -> String {
    if body.trim_start().starts_with("---") {
        return body.to_string();
    }
    let description = request
        .description
        .as_deref()
        .map(|d| d.replace('\n', " "))
        .unwrap_or_else(|| request.skill_name.clone());
    format!(
        "---\nname: {slug}\ndescription: {}\n---\n\n{}",
        description.trim(),
        body.trim()
    )
}

fn write_skill_file(path: &Path, contents: &str) -> Result<()> {
    let mut buf = contents.to_string();
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    fs::write(path, buf).with_context(|| format!("write skill {}", path.display()))
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("create directory {}", to.display()))?;
    for entry in fs::read_dir(from).with_context(|| format!("read directory {}", from.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", from.display()))?;
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentManifest, AgentMetadata, DelegationFlags};
    use crate::io::manifest::write_manifest;

    fn setup() -> (tempfile::TempDir, ConductorPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ConductorPaths::new(temp.path());
        write_manifest(
            &paths,
            &AgentManifest {
                agent_id: "writer".to_string(),
                metadata: AgentMetadata {
                    name: "Writer".to_string(),
                    description: String::new(),
                    provider: "claude".to_string(),
                    delegation: DelegationFlags::default(),
                },
            },
        )
        .expect("manifest");
        (temp, paths)
    }

    fn request(name: &str) -> SkillInstallRequest {
        SkillInstallRequest {
            agent_id: "writer".to_string(),
            skill_name: name.to_string(),
            description: Some("Checks tone".to_string()),
            content: None,
            source_path: None,
        }
    }

    #[test]
    fn inline_content_gets_front_matter() {
        let (_temp, paths) = setup();
        let installed = FsSkillInstaller
            .install_skill(
                &paths,
                &SkillInstallRequest {
                    content: Some("Use a friendly tone.".to_string()),
                    ..request("Tone Check")
                },
            )
            .expect("install");
        assert_eq!(installed.skill_id, "tone-check");
        assert_eq!(installed.source, "inline");
        let written = fs::read_to_string(&installed.installed_path).expect("read");
        assert!(written.starts_with("---\nname: tone-check\ndescription: Checks tone\n---"));
        assert!(written.ends_with("Use a friendly tone.\n"));
    }

    #[test]
    fn copies_skill_directories() {
        let (temp, paths) = setup();
        let source = temp.path().join("src-skill");
        fs::create_dir_all(source.join("refs")).expect("dir");
        fs::write(source.join(SKILL_FILE), "---\nname: x\n---\nbody\n").expect("skill");
        fs::write(source.join("refs").join("a.md"), "ref").expect("ref");

        let installed = FsSkillInstaller
            .install_skill(
                &paths,
                &SkillInstallRequest {
                    source_path: Some(source.clone()),
                    ..request("x")
                },
            )
            .expect("install");
        assert!(installed.installed_path.is_file());
        assert!(
            paths
                .skills_dir("writer")
                .join("x")
                .join("refs")
                .join("a.md")
                .is_file()
        );
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let (_temp, paths) = setup();
        let err = FsSkillInstaller
            .install_skill(
                &paths,
                &SkillInstallRequest {
                    agent_id: "ghost".to_string(),
                    ..request("x")
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }

    #[test]
    fn slugs_drop_punctuation() {
        assert_eq!(skill_slug(" Web Search! "), Some("web-search".to_string()));
        assert_eq!(skill_slug("!!!"), None);
    }
}
