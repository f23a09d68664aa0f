use std::path::Path;

use anyhow::{anyhow, Context, Result};
use gridreg_core::RevisionToken;

/// Outbound notification seam. Notification is fire-and-forget: a failed
/// delivery is logged and swallowed, never allowed to fail the run.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver the finished report. Implementations may fail; the caller
    /// goes through [`notify_all`], which swallows errors.
    fn notify(&self, report: &Path, revision: Option<&RevisionToken>) -> Result<()>;
}

/// Deliver a report through every collaborator, swallowing failures.
pub fn notify_all(notifiers: &[Box<dyn Notifier>], report: &Path, revision: Option<&RevisionToken>) {
    for notifier in notifiers {
        if let Err(err) = notifier.notify(report, revision) {
            tracing::warn!(notifier = notifier.name(), %err, "notification failed");
        }
    }
}

/// Mails the report via the system mailer, subject carrying the product
/// name, revision and dispatch host.
pub struct MailNotifier {
    /// Mailer command, classically `mail`; injectable for tests.
    pub mailer: String,
    pub recipient: String,
    /// Product name for the subject line, e.g. `ghostpdl`.
    pub product: String,
    /// Dispatch host tag shown in the subject.
    pub host: String,
}

impl Notifier for MailNotifier {
    fn name(&self) -> &str {
        "mail"
    }

    fn notify(&self, report: &Path, revision: Option<&RevisionToken>) -> Result<()> {
        let mut subject = format!("cluster regression {}", self.product);
        if let Some(rev) = revision {
            subject.push_str(&format!("-r{}", rev.as_str()));
        }
        subject.push_str(&format!(" ({})", self.host));
        let cmd = format!(
            "cat {} | {} -s \"{}\" {}",
            report.display(),
            self.mailer,
            subject,
            self.recipient
        );
        run_notify_command(&cmd)
    }
}

/// Pipes the report text into a relay command (the IRC/commit-bot hook).
pub struct RelayNotifier {
    pub command: String,
}

impl Notifier for RelayNotifier {
    fn name(&self) -> &str {
        "relay"
    }

    fn notify(&self, report: &Path, revision: Option<&RevisionToken>) -> Result<()> {
        let text = std::fs::read_to_string(report)
            .with_context(|| format!("read report {}", report.display()))?;
        if text.is_empty() {
            // nothing worth relaying
            return Ok(());
        }
        let mut cmd = self.command.clone();
        if let Some(rev) = revision {
            cmd.push_str(&format!(" -r{}", rev.as_str()));
        }
        let cmd = format!("cat {} | {}", report.display(), cmd);
        run_notify_command(&cmd)
    }
}

fn run_notify_command(cmd: &str) -> Result<()> {
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .with_context(|| format!("spawn `{}`", cmd))?;
    if !status.success() {
        return Err(anyhow!("`{}` exited with {:?}", cmd, status.code()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn notify_all_swallows_failures() {
        struct Broken;
        impl Notifier for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn notify(&self, _: &Path, _: Option<&RevisionToken>) -> Result<()> {
                Err(anyhow!("delivery refused"))
            }
        }
        let dir = tempdir().unwrap();
        let report = dir.path().join("report.log");
        std::fs::write(&report, "ran 1 tests\n").unwrap();
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(Broken)];
        // must not panic or propagate
        notify_all(&notifiers, &report, None);
    }

    #[test]
    fn mail_subject_carries_product_and_revision() {
        let dir = tempdir().unwrap();
        let report = dir.path().join("report.log");
        std::fs::write(&report, "ran 1 tests\n").unwrap();
        let sink = dir.path().join("sent.txt");

        // fake mailer: record its arguments, discard the body
        let script = dir.path().join("mailer.sh");
        std::fs::write(&script, format!("printf '%s\\n' \"$@\" > {}\ncat > /dev/null\n", sink.display())).unwrap();

        let notifier = MailNotifier {
            mailer: format!("sh {}", script.display()),
            recipient: "regress@example.com".into(),
            product: "ghostpdl".into(),
            host: "xefitra".into(),
        };
        notifier
            .notify(&report, Some(&RevisionToken::from_str("8700")))
            .unwrap();
        let sent = std::fs::read_to_string(&sink).unwrap();
        assert!(sent.contains("cluster regression ghostpdl-r8700 (xefitra)"));
        assert!(sent.contains("regress@example.com"));
    }

    #[test]
    fn relay_skips_empty_reports() {
        let dir = tempdir().unwrap();
        let report = dir.path().join("report.log");
        std::fs::write(&report, "").unwrap();
        let notifier = RelayNotifier { command: "false".into() };
        // `false` would fail if invoked; an empty report short-circuits
        notifier.notify(&report, None).unwrap();
    }
}
