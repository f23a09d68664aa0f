use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gridreg_cluster::{
    CommandClusterQuery, CommandScheduler, JobRequest, JobSubmitter, PoolPolicy, ResourcePicker,
    SubmitPolicy,
};
use gridreg_core::{DispatchError, RevisionToken};
use gridreg_notify::{notify_all, MailNotifier, Notifier, RelayNotifier};
use gridreg_queue::RevisionQueue;

use crate::{
    clear_stop, stop_requested, Builder, ClusterBuilder, CommandUpdater, Config, InstanceLock,
    TargetConfig, Updater,
};

/// The top-level control loop. One iteration retires one revision end to
/// end: take a token, update, build, run each target's suite on the
/// cluster, report. Per-revision failures abort that revision only and
/// are always reported; the loop itself runs until stopped.
pub struct Dispatcher {
    pub cfg: Config,
    pub workdir: PathBuf,
    pub queue: RevisionQueue,
    pub updater: Box<dyn Updater>,
    pub builder: Box<dyn Builder>,
    pub picker: ResourcePicker,
    pub submitter: JobSubmitter,
    pub notifiers: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Wire up the process-backed collaborators from config.
    pub fn open(workdir: PathBuf, cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let queue = RevisionQueue::open(cfg.queue_dir())
            .context("queue directory is inaccessible")?;

        let updater = Box::new(CommandUpdater {
            commands: cfg.update.commands.clone(),
            workdir: workdir.clone(),
        });

        let build_submitter = JobSubmitter::new(
            Box::new(CommandScheduler {
                submit_command: cfg.cluster.submit_command.clone(),
            }),
            SubmitPolicy {
                retry_delay: Duration::from_secs(cfg.cluster.submit_retry_secs),
                retry_budget: cfg.cluster.submit_retry_budget,
                poll_interval: Duration::from_secs(cfg.build.poll_secs),
                max_wait: Duration::from_secs(cfg.build.max_wait_secs),
            },
            None,
        );
        let builder = Box::new(ClusterBuilder {
            submitter: build_submitter,
            command: cfg.build.command.clone(),
            clean_command: cfg.build.clean_command.clone(),
            resources: cfg.build.resources.clone(),
            workdir: workdir.clone(),
            report: workdir.join(&cfg.build.report),
        });

        let mut picker = ResourcePicker::new(
            Box::new(CommandClusterQuery {
                command: cfg.cluster.availability_command.clone(),
            }),
            PoolPolicy {
                denylist: cfg.cluster.denylist.clone(),
                dual_slot: cfg.cluster.dual_slot.clone(),
                max_nodes: cfg.cluster.max_nodes,
                min_free_nodes: cfg.cluster.min_free_nodes,
            },
        );
        picker.poll = Duration::from_secs(cfg.cluster.capacity_poll_secs);

        let submitter = JobSubmitter::new(
            Box::new(CommandScheduler {
                submit_command: cfg.cluster.submit_command.clone(),
            }),
            SubmitPolicy {
                retry_delay: Duration::from_secs(cfg.cluster.submit_retry_secs),
                retry_budget: cfg.cluster.submit_retry_budget,
                poll_interval: Duration::from_secs(cfg.cluster.sentinel_poll_secs),
                max_wait: Duration::from_secs(cfg.cluster.sentinel_max_wait_secs),
            },
            cfg.cluster.launcher.clone(),
        );

        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(recipient) = &cfg.notify.mail_to {
            notifiers.push(Box::new(MailNotifier {
                mailer: cfg.notify.mailer.clone(),
                recipient: recipient.clone(),
                product: cfg.notify.product.clone(),
                host: cfg.notify.host.clone(),
            }));
        }
        if let Some(command) = &cfg.notify.relay_command {
            notifiers.push(Box::new(RelayNotifier {
                command: command.clone(),
            }));
        }

        Ok(Self {
            cfg,
            workdir,
            queue,
            updater,
            builder,
            picker,
            submitter,
            notifiers,
        })
    }

    /// Run until a stop is requested. Holds the single-instance lock for
    /// the whole loop.
    pub fn run(&self) -> Result<()> {
        let _lock = InstanceLock::acquire(&self.workdir)?;
        clear_stop(&self.workdir);
        tracing::info!("starting up");

        let mut idle = false;
        loop {
            if stop_requested(&self.workdir) {
                clear_stop(&self.workdir);
                tracing::info!("stop requested, shutting down");
                return Ok(());
            }
            match self.queue.take()? {
                Some(revision) => {
                    idle = false;
                    if let Err(err) = self.run_revision(&revision) {
                        tracing::error!(revision = %revision, %err, "revision failed");
                        self.notify_failure(&revision, &err);
                    }
                }
                None => {
                    // log once per idle-entry, not on every poll
                    if !idle {
                        tracing::info!("nothing to do");
                        idle = true;
                    }
                    std::thread::sleep(Duration::from_secs(self.cfg.queue.poll_secs));
                }
            }
        }
    }

    /// Take and retire at most one revision; used by `dispatch --once`.
    pub fn run_once(&self) -> Result<Option<RevisionToken>> {
        match self.queue.take()? {
            Some(revision) => {
                if let Err(err) = self.run_revision(&revision) {
                    tracing::error!(revision = %revision, %err, "revision failed");
                    self.notify_failure(&revision, &err);
                }
                Ok(Some(revision))
            }
            None => Ok(None),
        }
    }

    /// Update → build → run each target whose executable the build
    /// produced. The token is already consumed, so failures abort this
    /// revision without a retry.
    pub fn run_revision(&self, revision: &RevisionToken) -> Result<()> {
        tracing::info!(revision = %revision, "updating");
        if !self.updater.update(revision)? {
            return Err(DispatchError::UpdateFailed {
                revision: revision.as_str().to_string(),
            }
            .into());
        }

        tracing::info!(revision = %revision, "building");
        if !self.builder.build(self.cfg.build.clean)? {
            return Err(DispatchError::BuildFailed {
                revision: revision.as_str().to_string(),
            }
            .into());
        }
        tracing::info!("build complete");

        for target in &self.cfg.targets {
            let exe = self.workdir.join(&target.exe);
            if !exe.exists() {
                tracing::debug!(target = %target.name, exe = %exe.display(), "executable not built, skipping");
                continue;
            }
            tracing::info!(target = %target.name, revision = %revision, "running regression");
            self.run_target(revision, target)?;
        }
        Ok(())
    }

    fn run_target(&self, revision: &RevisionToken, target: &TargetConfig) -> Result<()> {
        let request = self.picker.acquire()?;
        let report = self
            .workdir
            .join(format!("{}-r{}.log", target.name, revision.as_str()));

        let mut command = format!(
            "{} --batch --exe {} --baseline {} --testpath {} --scratch {} --jobs {}",
            self.cfg.regress.runner,
            self.workdir.join(&target.exe).display(),
            self.cfg.baseline_path().display(),
            self.cfg.testpath().display(),
            self.cfg.regress.scratch_dir,
            request.slots(),
        );
        if self.cfg.regress.update_baselines {
            command.push_str(" --update");
        }
        for device in &target.devices {
            command.push_str(&format!(" --device={}", device));
        }

        let job = JobRequest {
            command,
            resources: request.spec(
                &self.cfg.cluster.node_label,
                &self.cfg.cluster.walltime,
                &self.cfg.cluster.cput,
            ),
            workdir: self.workdir.clone(),
            stdout: report.clone(),
            stderr: Some(report.clone()),
            parallel: true,
        };

        let start = Instant::now();
        self.submitter.run_to_completion(&job)?;
        tracing::info!(
            report = %report.display(),
            elapsed_secs = start.elapsed().as_secs(),
            "report is ready"
        );
        notify_all(&self.notifiers, &report, Some(revision));
        Ok(())
    }

    /// Per-revision failures are always surfaced to a human: synthesize a
    /// small failure report and push it through the notifiers.
    fn notify_failure(&self, revision: &RevisionToken, err: &anyhow::Error) {
        let report = self
            .workdir
            .join(format!("dispatch-failure-r{}.log", revision.as_str()));
        let body = format!("regression dispatch failed for r{}\n\n{}\n", revision.as_str(), err);
        if let Err(write_err) = std::fs::write(&report, body) {
            tracing::warn!(%write_err, "could not write failure report");
            return;
        }
        notify_all(&self.notifiers, &report, Some(revision));
    }
}
