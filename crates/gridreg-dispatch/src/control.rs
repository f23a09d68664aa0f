use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Single-instance enforcement: one dispatcher per working directory.
/// Replaces the legacy pidfile-plus-signal arrangement; the lock is
/// removed on drop, and a crashed dispatcher leaves a stale lock the
/// operator removes by hand (the error message says which file).
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("dispatch.lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow!(
                "dispatcher already running; stop it, or remove the stale lock file {}",
                path.display()
            )),
            Err(err) => {
                Err(err).with_context(|| format!("create lock file {}", path.display()))
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn stop_path(state_dir: &Path) -> PathBuf {
    state_dir.join("dispatch.stop")
}

/// Ask a running dispatcher to shut down after its current iteration.
pub fn request_stop(state_dir: &Path) -> Result<()> {
    let path = stop_path(state_dir);
    std::fs::write(&path, b"stop\n")
        .with_context(|| format!("write stop marker {}", path.display()))?;
    Ok(())
}

pub fn stop_requested(state_dir: &Path) -> bool {
    stop_path(state_dir).exists()
}

pub fn clear_stop(state_dir: &Path) {
    let _ = std::fs::remove_file(stop_path(state_dir));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_until_the_first_is_dropped() {
        let dir = tempdir().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        assert!(InstanceLock::acquire(dir.path()).is_err());
        drop(lock);
        let _relock = InstanceLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn stop_marker_round_trip() {
        let dir = tempdir().unwrap();
        assert!(!stop_requested(dir.path()));
        request_stop(dir.path()).unwrap();
        assert!(stop_requested(dir.path()));
        clear_stop(dir.path());
        assert!(!stop_requested(dir.path()));
    }
}
