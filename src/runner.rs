use std::collections::HashMap;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use wait_timeout::ChildExt;

use crate::command::Job;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failed,
    TimedOut,
    Killed,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Killed => "killed",
        }
    }
}

/// Terminal outcome of one job. Owned by the dispatcher once returned and
/// never mutated afterwards.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: usize,
    pub status: JobStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub wall_time: Duration,
}

/// Shared between the dispatcher and its workers: the cancellation flag and
/// the registry of live process groups. Sweeping the registry is the one
/// termination path for timeout, cancellation, and teardown alike, so no
/// child survives its owner regardless of which event fired first.
#[derive(Clone, Default)]
pub struct RunContext {
    cancel: Arc<AtomicBool>,
    groups: Arc<Mutex<HashMap<usize, u32>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Flag all workers to stop and kill every live process group. Jobs not
    /// yet started will short-circuit to `Killed` without spawning.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.sweep();
    }

    /// Kill every process group still registered. Idempotent.
    pub fn sweep(&self) {
        let groups = self.groups.lock().expect("process registry poisoned");
        for (job_id, &pgid) in groups.iter() {
            debug!("sweeping process group {} of job {}", pgid, job_id);
            kill_process_group(pgid);
        }
    }

    fn register(&self, job_id: usize, pgid: u32) {
        self.groups
            .lock()
            .expect("process registry poisoned")
            .insert(job_id, pgid);
    }

    fn deregister(&self, job_id: usize) {
        self.groups
            .lock()
            .expect("process registry poisoned")
            .remove(&job_id);
    }
}

/// Strategy seam between the dispatcher and whatever executes a job. The
/// production implementation shells out; tests substitute in-process
/// callables to exercise scheduling without spawning anything.
pub trait RunJob: Sync {
    fn run(&self, job: &Job, timeout: Duration, ctx: &RunContext) -> JobResult;
}

impl<F> RunJob for F
where
    F: Fn(&Job, Duration, &RunContext) -> JobResult + Sync,
{
    fn run(&self, job: &Job, timeout: Duration, ctx: &RunContext) -> JobResult {
        self(job, timeout, ctx)
    }
}

/// Runs one invocation as a subprocess in its own process group, with piped
/// stdio and a mandatory wall-clock timeout. On timeout or cancellation the
/// whole group is killed, so helpers forked by the caller die with it.
pub struct SubprocessRunner;

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Killed,
    WaitError(std::io::Error),
}

impl RunJob for SubprocessRunner {
    fn run(&self, job: &Job, timeout: Duration, ctx: &RunContext) -> JobResult {
        let started = Instant::now();

        if ctx.cancelled() {
            return result(job.id, JobStatus::Killed, Vec::new(), Vec::new(), None, started);
        }
        let Some((exe, args)) = job.argv.split_first() else {
            return result(
                job.id,
                JobStatus::Failed,
                Vec::new(),
                b"empty argument vector".to_vec(),
                None,
                started,
            );
        };

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New group with pgid == child pid; killpg on that id reaps the
            // caller and anything it forked.
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return result(
                    job.id,
                    JobStatus::Failed,
                    Vec::new(),
                    format!("failed to spawn {}: {}", exe, e).into_bytes(),
                    None,
                    started,
                );
            }
        };
        let pgid = child.id();
        ctx.register(job.id, pgid);
        debug!("job {} spawned pid {}", job.id, pgid);

        // Drain pipes on helper threads so a chatty child cannot deadlock
        // against a full pipe buffer while we sit in wait.
        let stdout_handle = drain_thread(child.stdout.take());
        let stderr_handle = drain_thread(child.stderr.take());

        let outcome = wait_with_deadline(&mut child, timeout, ctx);
        ctx.deregister(job.id);

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        let (status, exit_code) = match outcome {
            WaitOutcome::Exited(st) if st.success() => (JobStatus::Success, st.code()),
            WaitOutcome::Exited(st) => (JobStatus::Failed, st.code()),
            WaitOutcome::TimedOut => (JobStatus::TimedOut, None),
            WaitOutcome::Killed => (JobStatus::Killed, None),
            WaitOutcome::WaitError(e) => {
                warn!("job {}: error waiting on pid {}: {}", job.id, pgid, e);
                (JobStatus::Failed, None)
            }
        };
        result(job.id, status, stdout, stderr, exit_code, started)
    }
}

/// Wait for the child in short slices so cancellation is observed promptly.
/// Expiry or cancellation kills the process group before returning.
fn wait_with_deadline(child: &mut Child, timeout: Duration, ctx: &RunContext) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if ctx.cancelled() {
            terminate(child);
            return WaitOutcome::Killed;
        }
        let now = Instant::now();
        if now >= deadline {
            terminate(child);
            return WaitOutcome::TimedOut;
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        match child.wait_timeout(slice) {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => continue,
            Err(e) => {
                terminate(child);
                return WaitOutcome::WaitError(e);
            }
        }
    }
}

/// Kill the child's whole process group, then reap it.
fn terminate(child: &mut Child) {
    kill_process_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // The child was spawned with process_group(0), so its pid is the pgid.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn drain_thread<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

fn result(
    job_id: usize,
    status: JobStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    started: Instant,
) -> JobResult {
    JobResult {
        job_id,
        status,
        stdout,
        stderr,
        exit_code,
        wall_time: started.elapsed(),
    }
}
