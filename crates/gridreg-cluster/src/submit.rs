use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gridreg_core::DispatchError;
use gridreg_core::{SENTINEL_MAX_WAIT_SECS, SENTINEL_POLL_SECS, SUBMIT_RETRY_BUDGET, SUBMIT_RETRY_SECS};

/// One batch job: a command to run somewhere on the cluster, the resource
/// spec to request, and where its stdio lands. The stdout file doubles as
/// the completion sentinel.
#[derive(Clone, Debug)]
pub struct JobRequest {
    pub command: String,
    pub resources: String,
    pub workdir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: Option<PathBuf>,
    /// Wrap the command in the parallel process-group launcher.
    pub parallel: bool,
}

/// Render the batch script. Requesting the same file for stdout and
/// stderr merges the streams (`-j oe`).
pub fn render_script(req: &JobRequest, launcher: Option<&str>) -> String {
    let mut script = format!("#PBS -l {}", req.resources);
    script.push_str(&format!(" -o {}", req.stdout.display()));
    match &req.stderr {
        Some(stderr) if *stderr == req.stdout => script.push_str(" -j oe"),
        Some(stderr) => script.push_str(&format!(" -e {}", stderr.display())),
        None => {}
    }
    script.push_str(&format!(" -d {}", req.workdir.display()));
    script.push_str("\n\n");
    if req.parallel {
        if let Some(launcher) = launcher {
            script.push_str(launcher);
            script.push(' ');
        }
    }
    script.push_str(&req.command);
    script.push('\n');
    script
}

/// Submission seam. The scheduler is a black box that eventually makes
/// the job's stdout file appear; all we see here is whether it accepted
/// the script.
pub trait JobScheduler: Send + Sync {
    /// Returns `Ok(true)` when the scheduler accepted the job.
    fn submit(&self, script: &Path) -> Result<bool>;
}

/// Shells out to the configured submit command (classically `qsub`).
pub struct CommandScheduler {
    pub submit_command: String,
}

impl JobScheduler for CommandScheduler {
    fn submit(&self, script: &Path) -> Result<bool> {
        let cmd = format!("{} {}", self.submit_command, script.display());
        tracing::info!(%cmd, "submitting batch job");
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .status()
            .with_context(|| format!("run submit command `{}`", cmd))?;
        tracing::info!(code = ?status.code(), "submit command returned");
        Ok(status.success())
    }
}

#[derive(Clone, Debug)]
pub struct SubmitPolicy {
    /// Delay between submission retries.
    pub retry_delay: Duration,
    /// Rejections tolerated before the run is abandoned.
    pub retry_budget: u32,
    /// Sentinel poll interval.
    pub poll_interval: Duration,
    /// Bound on the sentinel wait before the run is declared timed out.
    pub max_wait: Duration,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(SUBMIT_RETRY_SECS),
            retry_budget: SUBMIT_RETRY_BUDGET,
            poll_interval: Duration::from_secs(SENTINEL_POLL_SECS),
            max_wait: Duration::from_secs(SENTINEL_MAX_WAIT_SECS),
        }
    }
}

pub struct JobSubmitter {
    pub scheduler: Box<dyn JobScheduler>,
    pub policy: SubmitPolicy,
    /// Parallel launcher line, e.g. an mpiexec invocation with its flags.
    pub launcher: Option<String>,
}

impl JobSubmitter {
    pub fn new(scheduler: Box<dyn JobScheduler>, policy: SubmitPolicy, launcher: Option<String>) -> Self {
        Self { scheduler, policy, launcher }
    }

    fn script_path(req: &JobRequest) -> PathBuf {
        let mut name = req.stdout.as_os_str().to_os_string();
        name.push(".pbs");
        PathBuf::from(name)
    }

    /// Write the script and submit it, retrying rejections with a fixed
    /// backoff until the retry budget runs out.
    pub fn submit(&self, req: &JobRequest) -> Result<PathBuf> {
        let script = Self::script_path(req);
        std::fs::write(&script, render_script(req, self.launcher.as_deref()))
            .with_context(|| format!("write batch script {}", script.display()))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            if self.scheduler.submit(&script)? {
                return Ok(script);
            }
            if attempts >= self.policy.retry_budget {
                return Err(DispatchError::SubmissionFailed { attempts }.into());
            }
            tracing::warn!(attempts, "submission rejected, retrying");
            std::thread::sleep(self.policy.retry_delay);
        }
    }

    /// Poll for the stdout sentinel. Completion detection is advisory and
    /// polling-interval-bounded; a job faster than one poll interval and a
    /// slow filesystem show the same latency floor.
    pub fn await_report(&self, sentinel: &Path) -> Result<()> {
        let start = Instant::now();
        loop {
            if sentinel.exists() {
                return Ok(());
            }
            if start.elapsed() >= self.policy.max_wait {
                return Err(DispatchError::RunTimedOut {
                    report: sentinel.to_path_buf(),
                    waited_secs: start.elapsed().as_secs(),
                }
                .into());
            }
            std::thread::sleep(self.policy.poll_interval);
        }
    }

    /// Submit and wait for the report sentinel. A sentinel that appears
    /// with zero length means the run died without output; a placeholder
    /// report is synthesized so downstream never sees an ambiguous empty
    /// success.
    pub fn run_to_completion(&self, req: &JobRequest) -> Result<()> {
        // the sentinel signals completion, so a stale one must go first
        if req.stdout.exists() {
            std::fs::remove_file(&req.stdout)
                .with_context(|| format!("remove stale report {}", req.stdout.display()))?;
        }
        self.submit(req)?;
        self.await_report(&req.stdout)?;
        let len = std::fs::metadata(&req.stdout).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            tracing::warn!(report = %req.stdout.display(), "report came back empty");
            std::fs::write(&req.stdout, "[report empty -- regression failed]\n")
                .with_context(|| format!("write placeholder report {}", req.stdout.display()))?;
        }
        Ok(())
    }
}
