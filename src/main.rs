use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};

use scattercall::checkpoint::{already_step, create_already_step};
use scattercall::command::{build_jobs, CallerSpec, DEFAULT_OUTPUT_SUFFIX};
use scattercall::dispatch::Dispatcher;
use scattercall::error::PipelineError;
use scattercall::merge::{merge_outputs, DEFAULT_COMMENT_PREFIX};
use scattercall::metrics::write_job_metrics;
use scattercall::regions::{
    partition_regions, read_fai, read_intervals, Region, DEFAULT_BLOCK_SIZE,
};
use scattercall::runner::SubprocessRunner;

/// Region-scatter runner for somatic variant callers
#[derive(Parser, Debug)]
#[command(author, version, about = "Partition, dispatch and merge somatic variant calling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scattered calling step: partition, dispatch, merge
    Call(CallArgs),
    /// Merge per-region caller outputs, copying the header block once
    Merge(MergeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SharedOptions {
    /// Number of worker threads (one subprocess per thread)
    #[arg(short = 'j', long = "threads", required = true)]
    pub threads: usize,
}

/// What to do after the batch finishes with failed jobs. The batch itself
/// never aborts early either way (fail-slow).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFail {
    /// Report failures and exit without merging; the step stays re-runnable
    Abort,
    /// Merge whatever non-empty outputs exist, with diagnostics
    MergePartial,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Reference fasta path
    #[arg(short = 'f', long = "reference", required = true)]
    pub reference: PathBuf,

    /// Tumor bam path
    #[arg(short = 't', long = "tumor-bam", required = true)]
    pub tumor_bam: PathBuf,

    /// Normal bam path
    #[arg(short = 'n', long = "normal-bam", required = true)]
    pub normal_bam: PathBuf,

    /// Sequence-length index (.fai): name<TAB>length rows
    #[arg(long = "fai", conflicts_with = "intervals")]
    pub fai: Option<PathBuf>,

    /// Interval list: chrom<TAB>start<TAB>end rows, 0-based half-open
    #[arg(long = "intervals", conflicts_with = "fai")]
    pub intervals: Option<PathBuf>,

    /// Caller executable
    #[arg(long = "muse", default_value = "muse")]
    pub muse: PathBuf,

    /// Base path for per-region outputs; job i writes <base>.<i>
    #[arg(short = 'O', long = "output-base")]
    pub output_base: Option<PathBuf>,

    /// Merged output path (default: <tumor stem>.MuSE.txt beside the tumor bam)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Maximum region length in base pairs
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    /// Only consume the first N rows of the sequence index
    #[arg(long = "max-contigs")]
    pub max_contigs: Option<usize>,

    /// Wall-clock timeout per job, in seconds
    #[arg(long = "timeout-secs", default_value_t = 3600)]
    pub timeout_secs: u64,

    /// Policy once the batch has finished with failed jobs
    #[arg(long = "on-fail", value_enum, default_value_t = OnFail::Abort)]
    pub on_fail: OnFail,

    /// Prefix marking header/comment lines in caller output
    #[arg(long = "comment-prefix", default_value = DEFAULT_COMMENT_PREFIX)]
    pub comment_prefix: String,

    /// Suffix the caller appends to its -O argument
    #[arg(long = "output-suffix", default_value = DEFAULT_OUTPUT_SUFFIX)]
    pub output_suffix: String,

    /// Write per-job metrics (command, wall time, status) to this TSV
    #[arg(long = "metrics")]
    pub metrics: Option<PathBuf>,

    /// Directory for per-region outputs and the step marker
    /// (default: the tumor bam's directory)
    #[arg(short = 'w', long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// Shared options
    #[command(flatten)]
    pub shared: SharedOptions,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Per-region caller outputs, in region order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Merged output path
    #[arg(short = 'o', long = "output", required = true)]
    pub output: PathBuf,

    /// Prefix marking header/comment lines
    #[arg(long = "comment-prefix", default_value = DEFAULT_COMMENT_PREFIX)]
    pub comment_prefix: String,
}

impl CallArgs {
    fn regions(&self) -> Result<Vec<Region>> {
        match (&self.fai, &self.intervals) {
            (Some(fai), None) => {
                let seqlens = read_fai(fai, self.max_contigs)
                    .with_context(|| format!("failed to read index {}", fai.display()))?;
                Ok(partition_regions(&seqlens, self.block_size)?)
            }
            (None, Some(intervals)) => Ok(read_intervals(intervals, self.block_size)
                .with_context(|| {
                    format!("failed to read intervals {}", intervals.display())
                })?),
            _ => bail!("exactly one of --fai or --intervals is required"),
        }
    }

    pub fn run(self) -> Result<()> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => self
                .tumor_bam
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let tumor_name = self
            .tumor_bam
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PipelineError::InvalidPath(self.tumor_bam.display().to_string())
            })?;
        let tumor_stem = tumor_name.strip_suffix(".bam").unwrap_or(tumor_name);
        let step = format!("{}_MuSE_call", tumor_name);

        if already_step(&work_dir, &step) {
            info!(
                "already completed step `call` of: {}",
                self.tumor_bam.display()
            );
            return Ok(());
        }
        info!("running step `call` of: {}", self.tumor_bam.display());

        let regions = self.regions()?;
        info!("partitioned into {} regions", regions.len());

        let output_base = self
            .output_base
            .clone()
            .unwrap_or_else(|| work_dir.join("output.file"));
        let spec = CallerSpec::new(
            &self.muse,
            &self.reference,
            &self.tumor_bam,
            &self.normal_bam,
            &output_base,
        )?
        .with_output_suffix(self.output_suffix.clone());
        let jobs = build_jobs(&spec, &regions)?;

        let dispatcher = Dispatcher::new(
            SubprocessRunner,
            self.shared.threads,
            Duration::from_secs(self.timeout_secs),
        )?;
        let outcome = dispatcher.run(&jobs)?;

        for res in outcome.failed() {
            error!(
                "job {} {} (exit code {:?}): {}",
                res.job_id,
                res.status.as_str(),
                res.exit_code,
                jobs[res.job_id].command_line()
            );
            error!(
                "job {} stderr: {}",
                res.job_id,
                String::from_utf8_lossy(&res.stderr)
            );
        }
        if let Some(metrics) = &self.metrics {
            write_job_metrics(metrics, &jobs, &outcome);
        }

        if outcome.any_failed && self.on_fail == OnFail::Abort {
            return Err(PipelineError::JobsFailed {
                failed: outcome.num_failed(),
                total: outcome.results.len(),
            }
            .into());
        }

        let merged_path = self
            .output
            .clone()
            .unwrap_or_else(|| work_dir.join(format!("{}.MuSE.txt", tumor_stem)));
        let merge_inputs: Vec<_> = jobs.iter().map(|j| j.output_path.clone()).collect();
        merge_outputs(&merge_inputs, &merged_path, &self.comment_prefix)?;

        create_already_step(&work_dir, &step)?;
        info!(
            "completed step `call` of: {} -> {}",
            self.tumor_bam.display(),
            merged_path.display()
        );
        Ok(())
    }
}

impl MergeArgs {
    pub fn run(self) -> Result<()> {
        merge_outputs(&self.inputs, &self.output, &self.comment_prefix)?;
        Ok(())
    }
}

// Main entry point
pub fn main() {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Call(args) => args.run(),
        Commands::Merge(args) => args.run(),
    };
    if let Err(e) = result {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
