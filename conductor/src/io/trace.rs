//! Run traces written once per run to `.conductor/runs/<runId>.json`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::RunTrace;

/// Write `trace` to `path`, refusing to overwrite an existing trace.
#[instrument(skip_all, fields(run_id = %trace.run_id, path = %path.display()))]
pub fn write_trace(path: &Path, trace: &RunTrace) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("trace path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let mut buf = serde_json::to_string_pretty(trace).context("serialize run trace")?;
    buf.push('\n');

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create trace {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("write trace {}", path.display()))?;
    debug!(bytes = buf.len(), "trace written");
    Ok(())
}

pub fn load_trace(path: &Path) -> Result<RunTrace> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read trace {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse trace {}", path.display()))
}
