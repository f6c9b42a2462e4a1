use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indexmap::IndexMap;
use log::debug;

use crate::error::PipelineError;

pub const DEFAULT_BLOCK_SIZE: u64 = 50_000_000;

/// A contiguous 1-based inclusive coordinate range on a named sequence.
/// The unit of parallel work: one region becomes one caller job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    /// Render as `name:start-end`, the coordinate syntax the wrapped caller
    /// expects for its `-r` flag.
    pub fn to_coord_string(&self) -> String {
        format!("{}:{}-{}", self.name, self.start, self.end)
    }
}

/// Read a `.fai`-style sequence-length table: tab separated rows of
/// `name<TAB>length<TAB>...`, first two columns consumed. Order in the file
/// is preserved; it determines region order and therefore merge order.
/// `max_rows` caps how many leading rows are consumed (used to skip
/// non-primary contigs listed after the main assembly).
pub fn read_fai<P: AsRef<Path>>(
    path: P,
    max_rows: Option<usize>,
) -> Result<IndexMap<String, u64>, PipelineError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut seqlens: IndexMap<String, u64> = IndexMap::new();
    for (lineno, line) in reader.lines().enumerate() {
        if let Some(cap) = max_rows {
            if seqlens.len() >= cap {
                debug!("stopping fai read at row cap of {}", cap);
                break;
            }
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default();
        let length = fields.next().ok_or_else(|| {
            PipelineError::InvalidIndex(format!(
                "line {}: expected `name<TAB>length`, got: {}",
                lineno + 1,
                line
            ))
        })?;
        let length: u64 = length.trim().parse().map_err(|_| {
            PipelineError::InvalidIndex(format!(
                "line {}: length is not an integer: {}",
                lineno + 1,
                length
            ))
        })?;
        if length == 0 {
            return Err(PipelineError::InvalidIndex(format!(
                "sequence {} has length 0",
                name
            )));
        }
        seqlens.insert(name.to_string(), length);
    }

    Ok(seqlens)
}

/// Partition every sequence into successive blocks of `block_size`, the last
/// block of each sequence clipped to the sequence length. Coordinates are
/// 1-based inclusive. An empty table is an error, not an empty run.
pub fn partition_regions(
    seqlens: &IndexMap<String, u64>,
    block_size: u64,
) -> Result<Vec<Region>, PipelineError> {
    if block_size == 0 {
        return Err(PipelineError::InvalidIndex(
            "block size must be positive".to_string(),
        ));
    }

    let mut regions = Vec::new();
    for (name, &length) in seqlens {
        if length == 0 {
            return Err(PipelineError::InvalidIndex(format!(
                "sequence {} has length 0",
                name
            )));
        }
        let mut start = 1;
        while start <= length {
            let end = (start + block_size - 1).min(length);
            regions.push(Region {
                name: name.clone(),
                start,
                end,
            });
            start = end + 1;
        }
    }

    if regions.is_empty() {
        return Err(PipelineError::NoRegions);
    }
    Ok(regions)
}

/// Read an interval list: tab separated `chrom<TAB>start<TAB>end` rows,
/// 0-based half-open, converted to 1-based inclusive. Intervals longer than
/// `block_size` are split into bounded windows so no single job runs over an
/// arbitrarily large span. Blank lines and `#` comment lines are skipped.
pub fn read_intervals<P: AsRef<Path>>(
    path: P,
    block_size: u64,
) -> Result<Vec<Region>, PipelineError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut regions = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < 3 {
            return Err(PipelineError::InvalidIndex(format!(
                "line {}: expected `chrom<TAB>start<TAB>end`, got: {}",
                lineno + 1,
                line
            )));
        }
        let parse = |s: &str| -> Result<u64, PipelineError> {
            s.trim().parse().map_err(|_| {
                PipelineError::InvalidIndex(format!(
                    "line {}: coordinate is not an integer: {}",
                    lineno + 1,
                    s
                ))
            })
        };
        let bed_start = parse(fields[1])?;
        let bed_end = parse(fields[2])?;
        if bed_end <= bed_start {
            return Err(PipelineError::InvalidIndex(format!(
                "line {}: empty or inverted interval {}-{}",
                lineno + 1,
                bed_start,
                bed_end
            )));
        }

        // 0-based half-open -> 1-based inclusive, then window.
        let mut start = bed_start + 1;
        let end = bed_end;
        while start <= end {
            let window_end = (start + block_size - 1).min(end);
            regions.push(Region {
                name: fields[0].to_string(),
                start,
                end: window_end,
            });
            start = window_end + 1;
        }
    }

    if regions.is_empty() {
        return Err(PipelineError::NoRegions);
    }
    Ok(regions)
}
