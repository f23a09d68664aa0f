use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use gridreg_baseline::BaselineStore;
use gridreg_core::{SuiteReport, WORKER_STALL_SECS};

use crate::{CaseCommand, HashMode, TestCase, WorkDistributor};

/// Everything one regression run needs: what to run, on what corpus,
/// with which devices and resolutions, and how wide to fan out.
#[derive(Clone, Debug)]
pub struct SuiteOptions {
    /// Executable plus fixed flags, e.g. `./bin/gs -q`.
    pub exe: String,
    /// Corpus root the test globs are relative to.
    pub testpath: PathBuf,
    /// Glob patterns naming the corpus subset; empty means "guess from
    /// the executable".
    pub tests: Vec<String>,
    pub devices: Vec<String>,
    pub dpis: Vec<u32>,
    pub scratch_dir: PathBuf,
    pub hash_mode: HashMode,
    pub jobs: usize,
    /// Quiet mode: no per-case progress line, detail sections in the
    /// rendered report instead.
    pub batch: bool,
    /// Accept differences as the new baseline.
    pub update_baselines: bool,
    pub stall_timeout: Duration,
}

impl SuiteOptions {
    pub fn new(exe: impl Into<String>, testpath: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            testpath: testpath.into(),
            tests: Vec::new(),
            devices: vec!["ppmraw".to_string()],
            dpis: vec![600],
            scratch_dir: std::env::temp_dir(),
            hash_mode: HashMode::Sidecar { hasher: "md5sum".to_string() },
            jobs: 1,
            batch: false,
            update_baselines: false,
            stall_timeout: Duration::from_secs(WORKER_STALL_SECS),
        }
    }

    /// Basename of the executable, for report lines and family guessing.
    pub fn exe_name(&self) -> String {
        let first = self.exe.split_whitespace().next().unwrap_or(&self.exe);
        Path::new(first)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| first.to_string())
    }
}

/// Default corpus globs per interpreter family, keyed off the executable
/// basename. Carried over from the legacy driver, including the exact
/// substring matches (`gs` must be an exact match so it does not also
/// catch `gsvg`).
pub fn default_tests_for_exe(exe_name: &str) -> Vec<String> {
    let mut tests: Vec<String> = Vec::new();
    if exe_name.contains("pcl") {
        tests.push("tests_public/pcl/*".into());
        tests.push("tests_private/pcl/*/*".into());
        tests.push("tests_private/xl/*/*.bin".into());
        tests.push("tests_private/xl/*/*.BIN".into());
        tests.push("tests_private/customer_tests/*".into());
    }
    if exe_name.contains("pspcl") || exe_name == "gs" {
        tests.push("tests_public/ps/*".into());
        tests.push("tests_public/pdf/*".into());
        tests.push("tests_private/comparefiles/*.ps".into());
        tests.push("tests_private/comparefiles/*.pdf".into());
        tests.push("tests_private/comparefiles/*.ai".into());
        tests.push("tests_private/ps/ps3cet/*.PS".into());
        tests.push("tests_private/pdf/PDFIA1.7_SUBSET/*.pdf".into());
        tests.push("tests_private/pdf/PDFIA1.7_SUBSET/*.PDF".into());
    }
    if exe_name.contains("xps") {
        tests.push("tests_private/xps/xpsfts-a4/*.xps".into());
    }
    if exe_name.contains("svg") {
        tests.push("tests_public/svg/svgw3c-1.1-full/svg/*.svg".into());
    }
    tests
}

/// Expand the corpus globs into one case per (file, device, dpi), with
/// the expected hash looked up from the baseline.
pub fn build_cases(opts: &SuiteOptions, baseline: &BaselineStore) -> Result<Vec<TestCase>> {
    let patterns = if opts.tests.is_empty() {
        default_tests_for_exe(&opts.exe_name())
    } else {
        opts.tests.clone()
    };

    let mut cases = Vec::new();
    for pattern in &patterns {
        let full = opts.testpath.join(pattern);
        let full = full.to_string_lossy().to_string();
        let paths = glob::glob(&full).with_context(|| format!("bad test glob `{}`", full))?;
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            // the CET suite only completes with its init prefix and
            // without -dSAFER
            let cet = path
                .parent()
                .map(|d| d.to_string_lossy().contains("ps3cet"))
                .unwrap_or(false);
            for device in &opts.devices {
                for dpi in &opts.dpis {
                    let identity =
                        gridreg_core::TestIdentity::new(path.clone(), device.clone(), *dpi);
                    let expected = baseline.lookup_identity(&identity).map(String::from);
                    cases.push(TestCase {
                        identity,
                        expected,
                        command: CaseCommand {
                            exe: opts.exe.clone(),
                            scratch_dir: opts.scratch_dir.clone(),
                            hash_mode: opts.hash_mode.clone(),
                            safer: !cet,
                            ps_prefix: cet
                                .then(|| "%rom%Resource/Init/gs_cet.ps".to_string()),
                        },
                    });
                }
            }
        }
    }
    Ok(cases)
}

/// Fold a finished report back into the baseline: new tests are always
/// recorded; differences only when the caller accepts them as the new
/// baseline. Returns the number of entries written.
pub fn reconcile(report: &SuiteReport, baseline: &mut BaselineStore, accept_diffs: bool) -> usize {
    let mut updated = 0;
    for case in &report.news {
        if let Some(hash) = case.result.hash() {
            baseline.update(case.identity.key(), hash);
            updated += 1;
        }
    }
    if accept_diffs {
        if !report.diffs.is_empty() {
            tracing::info!(count = report.diffs.len(), "updating baselines with test differences");
        }
        for case in &report.diffs {
            if let Some(hash) = case.result.hash() {
                baseline.update(case.identity.key(), hash);
                updated += 1;
            }
        }
    }
    updated
}

/// Run the whole suite against the baseline and reconcile afterwards.
/// This is the coordinator side; it owns the store for the duration of
/// the run and saves it before returning.
pub fn run_suite(opts: &SuiteOptions, baseline: &mut BaselineStore) -> Result<SuiteReport> {
    let cases = build_cases(opts, baseline)?;
    let mut report = SuiteReport::new(opts.exe_name(), &opts.testpath, opts.jobs);
    if opts.jobs > 1 && !opts.batch {
        println!("running {} tests on {} workers...", cases.len(), opts.jobs);
    }

    let start = Instant::now();
    let distributor = WorkDistributor {
        jobs: opts.jobs,
        stall_timeout: opts.stall_timeout,
    };
    let batch = opts.batch;
    let testpath = opts.testpath.clone();
    distributor.run(cases, &mut report, |outcome| {
        if !batch {
            println!(
                "Checking {} ... {}",
                outcome.identity.description(&testpath),
                outcome.result
            );
        }
    });
    report.finalize(start.elapsed().as_secs_f64());

    reconcile(&report, baseline, opts.update_baselines);
    baseline.save()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn families_follow_the_executable_basename() {
        assert!(default_tests_for_exe("pcl6")
            .iter()
            .any(|t| t.contains("tests_public/pcl")));
        assert!(default_tests_for_exe("gs")
            .iter()
            .any(|t| t.contains("comparefiles")));
        // gsvg must not pick up the gs corpus
        assert!(default_tests_for_exe("gsvg")
            .iter()
            .all(|t| !t.contains("comparefiles")));
        assert!(default_tests_for_exe("gsvg")
            .iter()
            .any(|t| t.contains("svgw3c")));
        assert!(default_tests_for_exe("gxps")
            .iter()
            .any(|t| t.contains("xpsfts")));
    }

    #[test]
    fn cases_are_the_cross_product_of_files_devices_and_dpis() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(corpus.join("a.pcl"), b"x").unwrap();
        std::fs::write(corpus.join("b.pcl"), b"x").unwrap();

        let mut opts = SuiteOptions::new("pcl6", dir.path());
        opts.tests = vec!["corpus/*.pcl".into()];
        opts.devices = vec!["ppmraw".into(), "pbmraw".into()];
        opts.dpis = vec![300, 600];

        let baseline = BaselineStore::load(dir.path().join("baseline.txt"));
        let cases = build_cases(&opts, &baseline).unwrap();
        assert_eq!(cases.len(), 8);
        assert!(cases.iter().all(|c| c.expected.is_none()));
    }

    #[test]
    fn expected_hashes_come_from_the_baseline() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        let input = corpus.join("a.pcl");
        std::fs::write(&input, b"x").unwrap();

        let baseline_path = dir.path().join("baseline.txt");
        let id = gridreg_core::TestIdentity::new(&input, "ppmraw", 600);
        std::fs::write(&baseline_path, format!("{} abc123\n", id.key())).unwrap();

        let mut opts = SuiteOptions::new("pcl6", dir.path());
        opts.tests = vec!["corpus/*.pcl".into()];
        let baseline = BaselineStore::load(&baseline_path);
        let cases = build_cases(&opts, &baseline).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].expected.as_deref(), Some("abc123"));
    }

    #[test]
    fn cet_suite_drops_safer_and_gains_the_prefix() {
        let dir = tempdir().unwrap();
        let cet = dir.path().join("tests_private/ps/ps3cet");
        std::fs::create_dir_all(&cet).unwrap();
        std::fs::write(cet.join("ATS1.PS"), b"x").unwrap();

        let mut opts = SuiteOptions::new("gs", dir.path());
        opts.tests = vec!["tests_private/ps/ps3cet/*.PS".into()];
        let baseline = BaselineStore::load(dir.path().join("b.txt"));
        let cases = build_cases(&opts, &baseline).unwrap();
        assert_eq!(cases.len(), 1);
        assert!(!cases[0].command.safer);
        assert!(cases[0].command.ps_prefix.is_some());
    }

    #[test]
    fn run_suite_reconciles_news_and_saves_the_store() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(corpus.join("a.pcl"), b"x").unwrap();

        let script = dir.path().join("render.sh");
        std::fs::write(
            &script,
            "out=\"\"\nfor a in \"$@\"; do\n  case \"$a\" in -sOutputFile=*) out=\"${a#-sOutputFile=}\" ;; esac\ndone\nprintf 'bits' > \"$out\"\n",
        )
        .unwrap();

        let baseline_path = dir.path().join("baseline.txt");
        let mut opts = SuiteOptions::new(format!("sh {}", script.display()), dir.path());
        opts.tests = vec!["corpus/*.pcl".into()];
        opts.scratch_dir = dir.path().to_path_buf();
        opts.hash_mode = HashMode::RawOutput;
        opts.batch = true;

        let mut baseline = BaselineStore::load(&baseline_path);
        let report = run_suite(&opts, &mut baseline).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.news.len(), 1);

        // the new result was recorded and persisted
        let reloaded = BaselineStore::load(&baseline_path);
        assert_eq!(reloaded.len(), 1);

        // a second run now matches its baseline
        let mut baseline = reloaded;
        let report = run_suite(&opts, &mut baseline).unwrap();
        assert_eq!(report.oks.len(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn diffs_update_the_baseline_only_when_accepted() {
        let dir = tempdir().unwrap();
        let mut report = SuiteReport::new("gs", "/t", 1);
        report.record(gridreg_core::CaseOutcome {
            identity: gridreg_core::TestIdentity::new("/t/a.ps", "ppmraw", 600),
            result: gridreg_core::TestResult::Diff("def456".into()),
        });

        let mut baseline = BaselineStore::load(dir.path().join("b.txt"));
        baseline.update("file:/t/a.ps;device:ppmraw;dpi:600", "abc123");

        assert_eq!(reconcile(&report, &mut baseline, false), 0);
        assert_eq!(baseline.lookup("file:/t/a.ps;device:ppmraw;dpi:600"), Some("abc123"));

        assert_eq!(reconcile(&report, &mut baseline, true), 1);
        assert_eq!(baseline.lookup("file:/t/a.ps;device:ppmraw;dpi:600"), Some("def456"));
    }
}
