//! `std::fs` implementation of the workspace file port.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::ports::WorkspaceFs;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl WorkspaceFs for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Invalid UTF-8 is replaced, not rejected.
    fn read_file(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent)?;
        }
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
    }
}
