use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::PipelineError;
use crate::regions::Region;

pub const DEFAULT_OUTPUT_SUFFIX: &str = ".MuSE.txt";

/// Everything needed to render one caller invocation per region. Paths are
/// UTF-8 because they are spliced into an argument vector verbatim.
#[derive(Debug, Clone)]
pub struct CallerSpec {
    pub executable: Utf8PathBuf,
    pub reference: Utf8PathBuf,
    pub tumor_bam: Utf8PathBuf,
    pub normal_bam: Utf8PathBuf,
    /// Per-job outputs are `<output_base>.<id>`; the caller itself appends
    /// `output_suffix` to whatever it is given via `-O`.
    pub output_base: Utf8PathBuf,
    pub output_suffix: String,
}

impl CallerSpec {
    pub fn new(
        executable: impl AsRef<Path>,
        reference: impl AsRef<Path>,
        tumor_bam: impl AsRef<Path>,
        normal_bam: impl AsRef<Path>,
        output_base: impl AsRef<Path>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            executable: utf8_path(executable)?,
            reference: utf8_path(reference)?,
            tumor_bam: utf8_path(tumor_bam)?,
            normal_bam: utf8_path(normal_bam)?,
            output_base: utf8_path(output_base)?,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
        })
    }

    pub fn with_output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = suffix.into();
        self
    }
}

fn utf8_path(p: impl AsRef<Path>) -> Result<Utf8PathBuf, PipelineError> {
    Utf8Path::from_path(p.as_ref())
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| {
            PipelineError::InvalidPath(p.as_ref().display().to_string())
        })
}

/// One scheduled caller invocation bound to one region. `id` is the region
/// index; it keys the result slot and the merge order.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    pub argv: Vec<String>,
    pub output_path: Utf8PathBuf,
}

impl Job {
    /// Command text for logs and metrics.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Render one job per region, in region order. Pure construction: no I/O.
/// Output paths are made unique by the numeric job id suffix, so no two jobs
/// can collide on disk.
pub fn build_jobs(spec: &CallerSpec, regions: &[Region]) -> Result<Vec<Job>, PipelineError> {
    if spec.output_base.as_str().is_empty() {
        return Err(PipelineError::InvalidPath(
            "output base path is empty".to_string(),
        ));
    }

    let jobs = regions
        .iter()
        .enumerate()
        .map(|(id, region)| {
            let per_job_base = format!("{}.{}", spec.output_base, id);
            let output_path =
                Utf8PathBuf::from(format!("{}{}", per_job_base, spec.output_suffix));
            let argv = vec![
                spec.executable.to_string(),
                "call".to_string(),
                "-f".to_string(),
                spec.reference.to_string(),
                "-r".to_string(),
                region.to_coord_string(),
                spec.tumor_bam.to_string(),
                spec.normal_bam.to_string(),
                "-O".to_string(),
                per_job_base,
            ];
            Job {
                id,
                argv,
                output_path,
            }
        })
        .collect();

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CallerSpec {
        CallerSpec::new(
            "/opt/muse/muse",
            "/ref/GRCh38.fa",
            "/bams/tumor.bam",
            "/bams/normal.bam",
            "/scratch/output.file",
        )
        .unwrap()
    }

    fn regions() -> Vec<Region> {
        vec![
            Region {
                name: "chr1".to_string(),
                start: 1,
                end: 40,
            },
            Region {
                name: "chr1".to_string(),
                start: 41,
                end: 80,
            },
        ]
    }

    #[test]
    fn test_one_job_per_region_in_order() {
        let jobs = build_jobs(&spec(), &regions()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, 0);
        assert_eq!(jobs[1].id, 1);
        assert!(jobs[0].argv.contains(&"chr1:1-40".to_string()));
        assert!(jobs[1].argv.contains(&"chr1:41-80".to_string()));
    }

    #[test]
    fn test_argv_shape() {
        let jobs = build_jobs(&spec(), &regions()).unwrap();
        assert_eq!(
            jobs[0].argv,
            vec![
                "/opt/muse/muse",
                "call",
                "-f",
                "/ref/GRCh38.fa",
                "-r",
                "chr1:1-40",
                "/bams/tumor.bam",
                "/bams/normal.bam",
                "-O",
                "/scratch/output.file.0",
            ]
        );
    }

    #[test]
    fn test_output_paths_unique_and_suffixed() {
        let jobs = build_jobs(&spec(), &regions()).unwrap();
        assert_eq!(jobs[0].output_path, "/scratch/output.file.0.MuSE.txt");
        assert_eq!(jobs[1].output_path, "/scratch/output.file.1.MuSE.txt");
        assert_ne!(jobs[0].output_path, jobs[1].output_path);
    }

    #[test]
    fn test_custom_suffix() {
        let spec = spec().with_output_suffix(".vcf");
        let jobs = build_jobs(&spec, &regions()).unwrap();
        assert_eq!(jobs[1].output_path, "/scratch/output.file.1.vcf");
    }

    #[test]
    fn test_empty_output_base_rejected() {
        let mut s = spec();
        s.output_base = Utf8PathBuf::from("");
        assert!(matches!(
            build_jobs(&s, &regions()),
            Err(PipelineError::InvalidPath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let bad = Path::new(OsStr::from_bytes(b"/tmp/\xff"));
        assert!(matches!(
            CallerSpec::new(bad, "/r", "/t", "/n", "/o"),
            Err(PipelineError::InvalidPath(_))
        ));
    }
}
