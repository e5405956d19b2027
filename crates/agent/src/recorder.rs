//! Trace persistence.
//!
//! A trace is written as pretty-printed JSON, one file per run.

use std::path::{Path, PathBuf};
use taskloop_core::error::TraceError;
use taskloop_core::trace::Trace;
use tracing::debug;

/// Serialize a trace to its on-disk form.
pub fn record(trace: &Trace) -> Result<String, TraceError> {
    trace.to_json()
}

/// `<dir>/<run_id>.json`
pub fn default_trace_path(dir: &Path, trace: &Trace) -> PathBuf {
    dir.join(format!("{}.json", trace.run_id))
}

/// Write `trace` to `path`, creating parent directories as needed.
pub async fn save_trace(trace: &Trace, path: &Path) -> Result<(), TraceError> {
    let json = record(trace)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| io_error(path, e))?;

    debug!(run_id = %trace.run_id, path = %path.display(), steps = trace.steps.len(), "Trace saved");
    Ok(())
}

pub async fn load_trace(path: &Path) -> Result<Trace, TraceError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    Trace::from_json(&json)
}

fn io_error(path: &Path, e: std::io::Error) -> TraceError {
    TraceError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
