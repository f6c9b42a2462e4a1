use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::command::Job;
use crate::dispatch::RunOutcome;

#[derive(Debug, Serialize)]
struct JobRecord<'a> {
    job_id: usize,
    command: String,
    wall_seconds: f64,
    status: &'a str,
    exit_code: Option<i32>,
}

/// Write one TSV row per job: command text, wall time, terminal status.
/// Fire-and-forget: failures are logged and never fail the step.
pub fn write_job_metrics(path: &Path, jobs: &[Job], outcome: &RunOutcome) {
    if let Err(e) = try_write(path, jobs, outcome) {
        warn!("failed to write job metrics to {}: {}", path.display(), e);
    }
}

fn try_write(path: &Path, jobs: &[Job], outcome: &RunOutcome) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for (job, res) in jobs.iter().zip(&outcome.results) {
        writer.serialize(JobRecord {
            job_id: job.id,
            command: job.command_line(),
            wall_seconds: res.wall_time.as_secs_f64(),
            status: res.status.as_str(),
            exit_code: res.exit_code,
        })?;
    }
    writer.flush()?;
    Ok(())
}
