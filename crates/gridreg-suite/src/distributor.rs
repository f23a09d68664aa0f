use std::collections::HashMap;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gridreg_core::{CaseOutcome, SuiteReport, TestResult, WORKER_STALL_SECS};

use crate::TestCase;

/// Fans a list of cases out to worker threads and streams results back.
///
/// With one job this degenerates to in-order serial execution. With more,
/// a shared job channel feeds a fixed set of workers: each worker pulls
/// its next case the moment it finishes the previous one, so faster
/// workers take proportionally more of the suite. Results are recorded in
/// arrival order, not submission order.
pub struct WorkDistributor {
    pub jobs: usize,
    /// Bound on how long the coordinator waits for any single result.
    /// The legacy protocol blocked forever on a dead worker; cases still
    /// outstanding when this expires are recorded as errors.
    pub stall_timeout: Duration,
}

impl WorkDistributor {
    pub fn new(jobs: usize) -> Self {
        Self {
            jobs: jobs.max(1),
            stall_timeout: Duration::from_secs(WORKER_STALL_SECS),
        }
    }

    /// Run every case, recording exactly one outcome per case into the
    /// report. `progress` is called per outcome as it arrives.
    pub fn run(
        &self,
        cases: Vec<TestCase>,
        report: &mut SuiteReport,
        mut progress: impl FnMut(&CaseOutcome),
    ) {
        if self.jobs == 1 || cases.len() <= 1 {
            for case in cases {
                let outcome = CaseOutcome {
                    identity: case.identity.clone(),
                    result: case.run(),
                };
                progress(&outcome);
                report.record(outcome);
            }
            return;
        }

        // outstanding work, keyed by baseline key; drained as results arrive
        let mut pending: HashMap<String, CaseOutcome> = cases
            .iter()
            .map(|case| {
                (
                    case.identity.key(),
                    CaseOutcome {
                        identity: case.identity.clone(),
                        result: TestResult::Error(
                            "worker stalled before returning a result".to_string(),
                        ),
                    },
                )
            })
            .collect();
        let total = cases.len();

        let (job_tx, job_rx) = channel::<TestCase>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = channel::<CaseOutcome>();

        let workers = self.jobs.min(total);
        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            thread::spawn(move || loop {
                let case = match job_rx.lock().unwrap().recv() {
                    Ok(case) => case,
                    // channel closed: no more work
                    Err(_) => break,
                };
                let outcome = CaseOutcome {
                    identity: case.identity.clone(),
                    result: case.run(),
                };
                if result_tx.send(outcome).is_err() {
                    break;
                }
            });
        }
        for case in cases {
            // workers only exit once the sending half is gone
            let _ = job_tx.send(case);
        }
        drop(job_tx);
        drop(result_tx);

        let mut received = 0;
        while received < total {
            match result_rx.recv_timeout(self.stall_timeout) {
                Ok(outcome) => {
                    pending.remove(&outcome.identity.key());
                    received += 1;
                    progress(&outcome);
                    report.record(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        outstanding = pending.len(),
                        "no result within the stall timeout, abandoning outstanding cases"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(
                        outstanding = pending.len(),
                        "all workers exited with cases outstanding"
                    );
                    break;
                }
            }
        }

        // every case gets exactly one recorded result, lost ones included
        let mut abandoned: Vec<CaseOutcome> = pending.into_values().collect();
        abandoned.sort_by(|a, b| a.identity.key().cmp(&b.identity.key()));
        for outcome in abandoned {
            progress(&outcome);
            report.record(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaseCommand, HashMode};
    use gridreg_core::TestIdentity;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::tempdir;

    fn shell_case(dir: &Path, name: &str, body: &str) -> TestCase {
        let script = dir.join(format!("{}.sh", name));
        std::fs::write(
            &script,
            format!(
                "out=\"\"\nfor a in \"$@\"; do\n  case \"$a\" in -sOutputFile=*) out=\"${{a#-sOutputFile=}}\" ;; esac\ndone\n{}\n",
                body
            ),
        )
        .unwrap();
        let input = dir.join(name);
        std::fs::write(&input, b"input").unwrap();
        TestCase {
            identity: TestIdentity::new(input, "ppmraw", 600),
            expected: None,
            command: CaseCommand {
                exe: format!("sh {}", script.display()),
                scratch_dir: dir.to_path_buf(),
                hash_mode: HashMode::RawOutput,
                safer: true,
                ps_prefix: None,
            },
        }
    }

    #[test]
    fn parallel_run_records_every_case_exactly_once() {
        let dir = tempdir().unwrap();
        let cases: Vec<TestCase> = (0..20)
            .map(|i| shell_case(dir.path(), &format!("t{:02}.pcl", i), "printf 'x' > \"$out\""))
            .collect();
        let expected_keys: HashSet<String> = cases.iter().map(|c| c.identity.key()).collect();

        let mut report = SuiteReport::new("fake", dir.path(), 4);
        let distributor = WorkDistributor::new(4);
        distributor.run(cases, &mut report, |_| {});

        assert_eq!(report.total, 20);
        assert_eq!(report.news.len(), 20);
        let seen: HashSet<String> = report.news.iter().map(|o| o.identity.key()).collect();
        assert_eq!(seen, expected_keys);
    }

    #[test]
    fn serial_run_preserves_submission_order() {
        let dir = tempdir().unwrap();
        let cases: Vec<TestCase> = (0..4)
            .map(|i| shell_case(dir.path(), &format!("t{}.pcl", i), "printf 'x' > \"$out\""))
            .collect();
        let names: Vec<_> = cases.iter().map(|c| c.identity.file.clone()).collect();

        let mut report = SuiteReport::new("fake", dir.path(), 1);
        let mut seen = Vec::new();
        WorkDistributor::new(1).run(cases, &mut report, |o| seen.push(o.identity.file.clone()));
        assert_eq!(seen, names);
    }

    #[test]
    fn stalled_worker_forfeits_its_case() {
        let dir = tempdir().unwrap();
        let mut cases = vec![
            shell_case(dir.path(), "quick1.pcl", "printf 'x' > \"$out\""),
            shell_case(dir.path(), "quick2.pcl", "printf 'x' > \"$out\""),
        ];
        cases.push(shell_case(dir.path(), "stuck.pcl", "sleep 5\nprintf 'x' > \"$out\""));

        let mut report = SuiteReport::new("fake", dir.path(), 2);
        let distributor = WorkDistributor {
            jobs: 3,
            stall_timeout: Duration::from_millis(300),
        };
        distributor.run(cases, &mut report, |_| {});

        assert_eq!(report.total, 3);
        assert_eq!(report.news.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0]
            .identity
            .file
            .to_string_lossy()
            .contains("stuck.pcl"));
        match &report.errors[0].result {
            gridreg_core::TestResult::Error(msg) => assert!(msg.contains("stalled")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
