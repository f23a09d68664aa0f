use std::path::PathBuf;

use sha2::{Digest, Sha256};

use gridreg_core::{TestIdentity, TestResult};

/// How a case's output hash is obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashMode {
    /// The render command pipes page output through a checksum program
    /// which leaves `<hash> ...` in the scratch sidecar.
    Sidecar { hasher: String },
    /// The render command writes raw output to the scratch path and we
    /// hash it ourselves.
    RawOutput,
}

/// Invocation template shared by every case of one target.
#[derive(Clone, Debug)]
pub struct CaseCommand {
    /// Executable plus its fixed leading flags, e.g. `./bin/gs -q`.
    pub exe: String,
    pub scratch_dir: PathBuf,
    pub hash_mode: HashMode,
    /// Run with -dSAFER. The CET suites need it off.
    pub safer: bool,
    /// Extra PostScript prelude file, e.g. the CET init file.
    pub ps_prefix: Option<String>,
}

/// One unit of work: render a fixed input under fixed parameters, hash
/// the output, compare to the baseline. `run` encodes every failure mode
/// as a `TestResult` variant; it never propagates an error.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub identity: TestIdentity,
    pub expected: Option<String>,
    pub command: CaseCommand,
}

impl TestCase {
    /// Scratch sidecar path, unique per (file, device, dpi).
    pub fn scratch_path(&self) -> PathBuf {
        let basename = self
            .identity
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        self.command.scratch_dir.join(format!(
            "{}.{}.{}.sum",
            basename, self.identity.device, self.identity.dpi
        ))
    }

    fn is_postscript(&self) -> bool {
        matches!(
            self.identity
                .file
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .as_deref(),
            Some("ps") | Some("eps")
        )
    }

    /// The full shell command for this case. PostScript inputs are driven
    /// through stdin with the job-server option; everything else takes
    /// the input file as the final argument.
    pub fn shell_command(&self) -> String {
        let scratch = self.scratch_path();
        let mut opts = String::from("-dQUIET -dNOPAUSE -dBATCH");
        if self.command.safer {
            opts.push_str(" -dSAFER");
        }
        opts.push_str(" -K1000000 -dMaxBitmap=30000000 -Z:@");
        opts.push_str(&format!(
            " -sDEVICE={} -r{}",
            self.identity.device, self.identity.dpi
        ));
        let output = match &self.command.hash_mode {
            HashMode::Sidecar { hasher } => {
                format!("-sOutputFile=\"|{}>{}\"", hasher, scratch.display())
            }
            HashMode::RawOutput => format!("-sOutputFile={}", scratch.display()),
        };
        if self.is_postscript() {
            let mut psopts = String::from("-dJOBSERVER");
            if let Some(prefix) = &self.command.ps_prefix {
                psopts.push(' ');
                psopts.push_str(prefix);
            }
            format!(
                "{} {} {} {} - < {}",
                self.command.exe,
                opts,
                output,
                psopts,
                self.identity.file.display()
            )
        } else {
            format!(
                "{} {} {} {}",
                self.command.exe,
                opts,
                output,
                self.identity.file.display()
            )
        }
    }

    pub fn run(&self) -> TestResult {
        let scratch = self.scratch_path();
        let cmd = self.shell_command();
        tracing::debug!(%cmd, "running");

        let out = match std::process::Command::new("sh").arg("-c").arg(&cmd).output() {
            Ok(out) => out,
            Err(err) => return TestResult::Error(format!("could not spawn `{}`: {}", cmd, err)),
        };
        let mut captured = String::from_utf8_lossy(&out.stdout).to_string();
        captured.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            // scratch left behind for diagnosis
            return TestResult::Error(captured);
        }

        let hash = match &self.command.hash_mode {
            HashMode::Sidecar { .. } => match std::fs::read_to_string(&scratch) {
                Ok(text) => match text.split_whitespace().next() {
                    Some(hash) => hash.to_string(),
                    None => return TestResult::Error("no output".to_string()),
                },
                Err(_) => return TestResult::Error("no output".to_string()),
            },
            HashMode::RawOutput => match std::fs::read(&scratch) {
                Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
                Err(_) => return TestResult::Error("no output".to_string()),
            },
        };
        let _ = std::fs::remove_file(&scratch);

        match &self.expected {
            None => TestResult::New(hash),
            Some(expected) if *expected == hash => TestResult::Ok(hash),
            Some(_) => TestResult::Diff(hash),
        }
    }
}
