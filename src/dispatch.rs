use std::time::Duration;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;

use crate::command::Job;
use crate::runner::{JobResult, RunContext, RunJob};

/// Aggregate outcome of one dispatch. `results[i]` is always the result of
/// job `i`, whatever order the workers finished in.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<JobResult>,
    pub any_failed: bool,
}

impl RunOutcome {
    pub fn failed(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.status.is_success())
    }

    pub fn num_failed(&self) -> usize {
        self.failed().count()
    }
}

/// Clonable handle for aborting an in-flight dispatch from another thread.
/// Triggering it kills every live process group and makes unstarted jobs
/// return `Killed` without spawning.
#[derive(Clone)]
pub struct CancelHandle(RunContext);

impl CancelHandle {
    pub fn cancel(&self) {
        warn!("cancellation requested, terminating in-flight jobs");
        self.0.cancel();
    }
}

/// Fans a batch of jobs out over a dedicated pool of exactly `thread_count`
/// workers. Fail-slow: a failed job never aborts its siblings; every job
/// reaches a terminal state and the caller decides what to do with the
/// aggregate.
pub struct Dispatcher<R: RunJob> {
    runner: R,
    thread_count: usize,
    timeout: Duration,
    ctx: RunContext,
}

impl<R: RunJob> Dispatcher<R> {
    pub fn new(runner: R, thread_count: usize, timeout: Duration) -> Result<Self> {
        if thread_count == 0 {
            bail!("thread count must be positive");
        }
        Ok(Self {
            runner,
            thread_count,
            timeout,
            ctx: RunContext::new(),
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.ctx.clone())
    }

    /// Run all jobs to a terminal state. Results come back indexed by job
    /// id: rayon's ordered collect writes each worker's result into the
    /// slot of the job it ran, so completion order never leaks into the
    /// outcome (or into downstream merge order).
    pub fn run(&self, jobs: &[Job]) -> Result<RunOutcome> {
        info!(
            "dispatching {} jobs over {} worker threads (timeout {}s per job)",
            jobs.len(),
            self.thread_count,
            self.timeout.as_secs()
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count)
            .build()?;
        let pb = create_progress_bar(jobs.len());

        let results: Vec<JobResult> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let res = self.runner.run(job, self.timeout, &self.ctx);
                    if !res.status.is_success() {
                        warn!(
                            "job {} {} (exit code {:?}): {}",
                            job.id,
                            res.status.as_str(),
                            res.exit_code,
                            job.command_line()
                        );
                    }
                    pb.inc(1);
                    res
                })
                .collect()
        });
        pb.finish_and_clear();

        let any_failed = results.iter().any(|r| !r.status.is_success());
        debug_assert!(results.iter().enumerate().all(|(i, r)| r.job_id == i));
        info!(
            "dispatch complete: {} of {} jobs succeeded",
            results.iter().filter(|r| r.status.is_success()).count(),
            results.len()
        );
        Ok(RunOutcome {
            results,
            any_failed,
        })
    }
}

impl<R: RunJob> Drop for Dispatcher<R> {
    fn drop(&mut self) {
        // Teardown always sweeps whatever groups are still registered, so a
        // panicking or early-returning caller cannot orphan children.
        self.ctx.sweep();
    }
}

fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs ({per_sec}, {eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::JobStatus;
    use camino::Utf8PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn fake_jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|id| Job {
                id,
                argv: vec!["true".to_string()],
                output_path: Utf8PathBuf::from(format!("/tmp/out.{}", id)),
            })
            .collect()
    }

    fn ok_result(job_id: usize) -> JobResult {
        JobResult {
            job_id,
            status: JobStatus::Success,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Some(0),
            wall_time: Duration::ZERO,
        }
    }

    #[test]
    fn test_results_keyed_by_job_id_despite_scheduling() {
        // Staggered per-job delays scramble completion order; the outcome
        // must still be a bijection on job id in submission order.
        let runner = |job: &Job, _t: Duration, _c: &RunContext| {
            let jitter = (job.id * 7919) % 23;
            thread::sleep(Duration::from_millis(jitter as u64));
            ok_result(job.id)
        };
        let jobs = fake_jobs(32);
        let dispatcher = Dispatcher::new(runner, 4, Duration::from_secs(5)).unwrap();
        let outcome = dispatcher.run(&jobs).unwrap();

        assert_eq!(outcome.results.len(), 32);
        for (i, res) in outcome.results.iter().enumerate() {
            assert_eq!(res.job_id, i);
        }
        assert!(!outcome.any_failed);
    }

    #[test]
    fn test_concurrency_never_exceeds_thread_count() {
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let runner = |job: &Job, _t: Duration, _c: &RunContext| {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            live.fetch_sub(1, Ordering::SeqCst);
            ok_result(job.id)
        };
        let jobs = fake_jobs(16);
        let dispatcher = Dispatcher::new(runner, 3, Duration::from_secs(5)).unwrap();
        dispatcher.run(&jobs).unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_one_failure_does_not_abort_siblings() {
        let runner = |job: &Job, _t: Duration, _c: &RunContext| {
            if job.id == 2 {
                JobResult {
                    job_id: job.id,
                    status: JobStatus::Failed,
                    stdout: Vec::new(),
                    stderr: b"boom".to_vec(),
                    exit_code: Some(1),
                    wall_time: Duration::ZERO,
                }
            } else {
                ok_result(job.id)
            }
        };
        let jobs = fake_jobs(5);
        let dispatcher = Dispatcher::new(runner, 2, Duration::from_secs(5)).unwrap();
        let outcome = dispatcher.run(&jobs).unwrap();

        assert!(outcome.any_failed);
        assert_eq!(outcome.num_failed(), 1);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.results[2].status, JobStatus::Failed);
        for i in [0, 1, 3, 4] {
            assert_eq!(outcome.results[i].status, JobStatus::Success);
        }
    }

    #[test]
    fn test_cancel_handle_stops_unstarted_jobs() {
        // Jobs observe the shared cancel flag the way SubprocessRunner does
        // before spawning. Cancel fires while the first wave is running, so
        // later waves must come back Killed.
        let runner = |job: &Job, _t: Duration, ctx: &RunContext| {
            if ctx.cancelled() {
                return JobResult {
                    job_id: job.id,
                    status: JobStatus::Killed,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    exit_code: None,
                    wall_time: Duration::ZERO,
                };
            }
            thread::sleep(Duration::from_millis(50));
            ok_result(job.id)
        };
        let jobs = fake_jobs(20);
        let dispatcher = Dispatcher::new(runner, 2, Duration::from_secs(5)).unwrap();
        let handle = dispatcher.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.cancel();
        });
        let outcome = dispatcher.run(&jobs).unwrap();
        canceller.join().unwrap();

        assert_eq!(outcome.results.len(), 20);
        assert!(outcome
            .results
            .iter()
            .any(|r| r.status == JobStatus::Killed));
        assert!(outcome.any_failed);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let runner = |job: &Job, _t: Duration, _c: &RunContext| ok_result(job.id);
        assert!(Dispatcher::new(runner, 0, Duration::from_secs(1)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_subprocess_batch_end_to_end() {
        use crate::runner::SubprocessRunner;
        let jobs: Vec<Job> = (0..6)
            .map(|id| Job {
                id,
                argv: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("printf 'job {}'", id),
                ],
                output_path: Utf8PathBuf::from(format!("/tmp/unused.{}", id)),
            })
            .collect();
        let dispatcher =
            Dispatcher::new(SubprocessRunner, 2, Duration::from_secs(30)).unwrap();
        let start = Instant::now();
        let outcome = dispatcher.run(&jobs).unwrap();
        assert!(start.elapsed() < Duration::from_secs(20));
        assert!(!outcome.any_failed);
        for (i, res) in outcome.results.iter().enumerate() {
            assert_eq!(res.stdout, format!("job {}", i).as_bytes());
        }
    }
}
