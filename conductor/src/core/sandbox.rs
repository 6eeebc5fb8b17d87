//! Workspace path sandboxing for planner file actions.
//!
//! Paths that try to leave the workspace are not rejected; they resolve to a
//! fixed sentinel file inside the workspace so the action becomes harmless.

use std::path::{Component, Path, PathBuf};

/// File name every escaping path is redirected to.
pub const BLOCKED_PATH_NAME: &str = ".blocked-path";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxedPath {
    pub path: PathBuf,
    pub blocked: bool,
}

/// Sentinel path for `root`.
pub fn blocked_path(root: &Path) -> PathBuf {
    root.join(BLOCKED_PATH_NAME)
}

/// Resolve a planner-supplied relative path under `root`.
///
/// `..` segments, absolute paths and paths with no file component resolve
/// to [`blocked_path`].
pub fn resolve_workspace_path(root: &Path, requested: &str) -> SandboxedPath {
    let normalized = requested.trim().replace('\\', "/");
    let candidate = Path::new(&normalized);

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return blocked(root);
            }
        }
    }
    if depth == 0 {
        return blocked(root);
    }
    SandboxedPath {
        path: resolved,
        blocked: false,
    }
}

fn blocked(root: &Path) -> SandboxedPath {
    SandboxedPath {
        path: blocked_path(root),
        blocked: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_stay_under_root() {
        let root = Path::new("/ws/orchestrator");
        let resolved = resolve_workspace_path(root, "./notes/plan.md");
        assert_eq!(resolved.path, root.join("notes").join("plan.md"));
        assert!(!resolved.blocked);
    }

    #[test]
    fn traversal_is_redirected_to_sentinel() {
        let root = Path::new("/ws/orchestrator");
        let resolved = resolve_workspace_path(root, "../../etc/passwd");
        assert_eq!(resolved.path, root.join(BLOCKED_PATH_NAME));
        assert!(resolved.blocked);

        let sneaky = resolve_workspace_path(root, "notes/../../secret");
        assert!(sneaky.blocked);

        let windows = resolve_workspace_path(root, "..\\..\\secret");
        assert!(windows.blocked);
    }

    #[test]
    fn absolute_and_empty_paths_are_blocked() {
        let root = Path::new("/ws/orchestrator");
        assert!(resolve_workspace_path(root, "/etc/passwd").blocked);
        assert!(resolve_workspace_path(root, "  ").blocked);
        assert!(resolve_workspace_path(root, "./").blocked);
    }
}
