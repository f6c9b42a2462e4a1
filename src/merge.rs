use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{info, warn};
use tempfile::NamedTempFile;

use crate::error::PipelineError;

pub const DEFAULT_COMMENT_PREFIX: &str = "#";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged_files: usize,
    pub skipped_files: usize,
}

/// Concatenate per-region caller outputs, in the order given, into one file.
/// The header block (lines starting with `comment_prefix`) is copied from
/// the first non-empty input only; repeats in later inputs are dropped.
/// Zero-length or missing inputs are skipped with a diagnostic rather than
/// failing the merge. Lines are moved as raw bytes, so content the caller
/// wrote is preserved exactly.
///
/// The output is written to a temp file beside the destination and renamed
/// into place, so a failed merge never leaves a truncated result behind.
pub fn merge_outputs<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
    comment_prefix: &str,
) -> Result<MergeStats, PipelineError> {
    let out_dir = output.parent().filter(|p| !p.as_os_str().is_empty());
    let tmp = match out_dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    let mut writer = BufWriter::new(tmp);
    let prefix = comment_prefix.as_bytes();

    let mut stats = MergeStats::default();
    let mut header_copied = false;
    for input in inputs {
        let input = input.as_ref();
        let len = match std::fs::metadata(input) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("skipping missing merge input {}: {}", input.display(), e);
                stats.skipped_files += 1;
                continue;
            }
        };
        if len == 0 {
            warn!("skipping empty merge input {}", input.display());
            stats.skipped_files += 1;
            continue;
        }

        let mut reader = BufReader::new(File::open(input)?);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if !header_copied || !line.starts_with(prefix) {
                writer.write_all(&line)?;
            }
        }
        header_copied = true;
        stats.merged_files += 1;
    }

    if stats.merged_files == 0 {
        // The temp file is discarded on drop; nothing appears at `output`.
        return Err(PipelineError::EmptyMergeResult);
    }

    let tmp = writer
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    tmp.persist(output).map_err(|e| PipelineError::Io(e.error))?;
    info!(
        "merged {} files ({} skipped) into {}",
        stats.merged_files,
        stats.skipped_files,
        output.display()
    );
    Ok(stats)
}
