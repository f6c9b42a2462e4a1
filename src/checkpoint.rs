use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::PipelineError;

fn marker_path(step_dir: &Path, step: &str) -> PathBuf {
    step_dir.join(format!("have_{}", step))
}

/// True if `step` already completed in `step_dir`, signalled by the
/// presence of its `have_<step>` marker file.
pub fn already_step(step_dir: &Path, step: &str) -> bool {
    let marker = marker_path(step_dir, step);
    if marker.exists() {
        info!("step marker exists: {}", marker.display());
        true
    } else {
        info!("step marker does not exist: {}", marker.display());
        false
    }
}

/// Record `step` as complete by touching its marker file. Only called after
/// the whole step (dispatch + merge) succeeded, so a rerun after any earlier
/// failure repeats the step from scratch.
pub fn create_already_step(step_dir: &Path, step: &str) -> Result<(), PipelineError> {
    let marker = marker_path(step_dir, step);
    info!("creating step marker: {}", marker.display());
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)?;
    Ok(())
}
