use std::path::PathBuf;

use thiserror::Error;

/// Per-revision failure taxonomy. An empty queue is not an error (the
/// loop idles), a single failing test case is not an error (it is
/// recorded as a result), and a corrupt baseline line is skipped at load
/// time. Everything here aborts one revision, is reported to the
/// notification collaborators, and returns the loop to idle.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("source update to revision {revision} failed")]
    UpdateFailed { revision: String },

    #[error("build failed for revision {revision}")]
    BuildFailed { revision: String },

    #[error("scheduler rejected the job {attempts} times, giving up")]
    SubmissionFailed { attempts: u32 },

    #[error("run produced no report at {report:?} within {waited_secs}s")]
    RunTimedOut { report: PathBuf, waited_secs: u64 },
}
