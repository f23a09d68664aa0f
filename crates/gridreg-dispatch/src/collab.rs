use std::path::PathBuf;

use anyhow::{Context, Result};
use gridreg_cluster::{JobRequest, JobSubmitter};
use gridreg_core::RevisionToken;

/// Source-control checkout seam. The dispatcher only inspects pass/fail.
pub trait Updater: Send + Sync {
    fn update(&self, revision: &RevisionToken) -> Result<bool>;
}

/// Runs the configured update commands in order, substituting `{rev}`.
pub struct CommandUpdater {
    pub commands: Vec<String>,
    pub workdir: PathBuf,
}

impl Updater for CommandUpdater {
    fn update(&self, revision: &RevisionToken) -> Result<bool> {
        for template in &self.commands {
            let cmd = template.replace("{rev}", revision.as_str());
            tracing::info!(%cmd, "updating working copy");
            let status = std::process::Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .current_dir(&self.workdir)
                .status()
                .with_context(|| format!("run update command `{}`", cmd))?;
            if !status.success() {
                tracing::warn!(%cmd, code = ?status.code(), "update command failed");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Compilation seam. The dispatcher only inspects pass/fail.
pub trait Builder: Send + Sync {
    fn build(&self, clean: bool) -> Result<bool>;
}

/// Builds on a compile node through the batch scheduler; the build log
/// doubles as the completion sentinel.
pub struct ClusterBuilder {
    pub submitter: JobSubmitter,
    pub command: String,
    pub clean_command: String,
    pub resources: String,
    pub workdir: PathBuf,
    pub report: PathBuf,
}

impl Builder for ClusterBuilder {
    fn build(&self, clean: bool) -> Result<bool> {
        let command = if clean { &self.clean_command } else { &self.command };
        let req = JobRequest {
            command: command.clone(),
            resources: self.resources.clone(),
            workdir: self.workdir.clone(),
            stdout: self.report.clone(),
            stderr: Some(self.report.clone()),
            parallel: false,
        };
        match self.submitter.run_to_completion(&req) {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(%err, "build job did not complete");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn updater_substitutes_the_revision() {
        let dir = tempdir().unwrap();
        let updater = CommandUpdater {
            commands: vec![format!("echo updated to {{rev}} > {}/rev.txt", dir.path().display())],
            workdir: dir.path().to_path_buf(),
        };
        assert!(updater.update(&RevisionToken::from_str("8700")).unwrap());
        let text = std::fs::read_to_string(dir.path().join("rev.txt")).unwrap();
        assert_eq!(text.trim(), "updated to 8700");
    }

    #[test]
    fn updater_reports_failure_without_running_later_commands() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ran-second");
        let updater = CommandUpdater {
            commands: vec!["false".into(), format!("touch {}", marker.display())],
            workdir: dir.path().to_path_buf(),
        };
        assert!(!updater.update(&RevisionToken::from_str("1")).unwrap());
        assert!(!marker.exists());
    }
}
