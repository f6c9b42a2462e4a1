use thiserror::Error;

/// Batch-level failures of the scatter/merge step. Per-job failures never
/// surface here; they are carried in `JobResult` status and only escalate
/// through `JobsFailed` when the caller's policy treats them as fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid sequence index: {0}")]
    InvalidIndex(String),

    #[error("no regions to process after partitioning")]
    NoRegions,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{failed} of {total} jobs did not succeed")]
    JobsFailed { failed: usize, total: usize },

    #[error("merge produced no output: every input was empty or missing")]
    EmptyMergeResult,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for the binary. Configuration and I/O errors share
    /// the generic code; job failures and an empty merge get distinct codes
    /// so wrapping workflows can tell a re-runnable step from bad inputs.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::JobsFailed { .. } => 2,
            PipelineError::EmptyMergeResult => 3,
            _ => 1,
        }
    }
}
