use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CaseOutcome, TestResult};

/// Streaming aggregation of a suite run. Created empty, appended to as
/// results arrive, finalized once every case has reported (or the run was
/// cut short). Per-variant lists are in arrival order, not submission
/// order; consumers that care about input order must sort.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Basename of the executable under test, for the summary line.
    pub exe_name: String,
    /// Corpus root stripped from report lines.
    pub testpath: PathBuf,
    /// Worker count the run used.
    pub node_count: usize,
    pub elapsed_secs: f64,
    pub total: usize,
    pub oks: Vec<CaseOutcome>,
    pub diffs: Vec<CaseOutcome>,
    pub fails: Vec<CaseOutcome>,
    pub errors: Vec<CaseOutcome>,
    pub news: Vec<CaseOutcome>,
}

impl SuiteReport {
    pub fn new(exe_name: impl Into<String>, testpath: impl Into<PathBuf>, node_count: usize) -> Self {
        Self {
            exe_name: exe_name.into(),
            testpath: testpath.into(),
            node_count,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: CaseOutcome) {
        self.total += 1;
        match &outcome.result {
            TestResult::Ok(_) => self.oks.push(outcome),
            TestResult::Diff(_) => self.diffs.push(outcome),
            TestResult::Fail(_) => self.fails.push(outcome),
            TestResult::Error(_) => self.errors.push(outcome),
            TestResult::New(_) => self.news.push(outcome),
        }
    }

    pub fn finalize(&mut self, elapsed_secs: f64) {
        self.elapsed_secs = elapsed_secs;
    }

    /// True when every case matched its baseline.
    pub fn is_clean(&self) -> bool {
        self.diffs.is_empty() && self.fails.is_empty() && self.errors.is_empty() && self.news.is_empty()
    }

    /// Render the report text. In batch mode each DIFF/FAIL/ERROR section
    /// lists the affected cases (with captured output for errors), which
    /// is what gets mailed out after a cluster run.
    pub fn render(&self, batch: bool) -> String {
        let testpath: &Path = &self.testpath;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "ran {} tests with {} in {:.3} seconds on {} nodes\n",
            self.total, self.exe_name, self.elapsed_secs, self.node_count
        );
        if !self.diffs.is_empty() {
            let _ = writeln!(out, "DIFFERENCES in {} of {} tests", self.diffs.len(), self.total);
            if batch {
                for case in &self.diffs {
                    let _ = writeln!(out, "  {}", case.identity.description(testpath));
                }
                out.push('\n');
            }
        }
        if !self.fails.is_empty() {
            let _ = writeln!(out, "FAILED {} of {} tests", self.fails.len(), self.total);
            if batch {
                for case in &self.fails {
                    let _ = writeln!(out, "  {}", case.identity.description(testpath));
                }
                out.push('\n');
            }
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "ERROR running {} of {} tests", self.errors.len(), self.total);
            if batch {
                for case in &self.errors {
                    let _ = writeln!(out, "  {}", case.identity.description(testpath));
                    if let TestResult::Error(msg) = &case.result {
                        let _ = writeln!(out, "{}", msg);
                    }
                }
                out.push('\n');
            }
        }
        if self.is_clean() {
            let _ = writeln!(out, "PASSED all {} tests", self.total);
        }
        if !self.news.is_empty() {
            let _ = writeln!(out, "{} NEW files with no previous result", self.news.len());
        }
        out
    }
}
