use serde::{Deserialize, Serialize};

use crate::TestIdentity;

/// Outcome of one completed test case. Exactly one variant holds; test
/// execution never propagates errors past its own boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResult {
    /// Output hash matched the baseline.
    Ok(String),
    /// Output hash differed from the baseline.
    Diff(String),
    /// Assertion-style failure (reserved; the hash pipeline does not
    /// currently produce these, but the report format carries them).
    Fail(String),
    /// The case produced no usable output: the process crashed, timed
    /// out, or wrote no checksum.
    Error(String),
    /// No baseline entry existed for this identity.
    New(String),
}

impl TestResult {
    /// The output hash, for variants that carry one.
    pub fn hash(&self) -> Option<&str> {
        match self {
            TestResult::Ok(h) | TestResult::Diff(h) | TestResult::New(h) => Some(h),
            TestResult::Fail(_) | TestResult::Error(_) => None,
        }
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestResult::Ok(_) => write!(f, "ok"),
            TestResult::Diff(_) => write!(f, "DIFF"),
            TestResult::Fail(_) => write!(f, "FAIL"),
            TestResult::Error(_) => write!(f, "ERROR"),
            TestResult::New(h) => write!(f, "new ({})", h),
        }
    }
}

/// A finished case: identity plus its result. This is what workers send
/// back to the coordinator and what the report aggregates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub identity: TestIdentity,
    pub result: TestResult,
}
