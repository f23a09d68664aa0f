use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridreg_core::RevisionToken;
use uuid::Uuid;

/// Directory-as-FIFO of revisions to test. An entry's name is the token;
/// presence means pending work; an empty directory means "no work" and is
/// the normal idle state. Entries sort lexically, so the earliest-sorting
/// token is served first.
///
/// The legacy consumer listed and then deleted in two steps, so two
/// consumers could dispatch the same revision. `take` instead claims an
/// entry by renaming it to a hidden unique name before removing it; a
/// consumer that loses the rename race just moves on to the next entry.
#[derive(Clone, Debug)]
pub struct RevisionQueue {
    dir: PathBuf,
}

impl RevisionQueue {
    /// Open (creating if needed) the queue directory. An inaccessible
    /// directory is the one startup error the dispatcher treats as fatal.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create queue directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Producer side: request a regression run for `token`.
    pub fn push(&self, token: &RevisionToken) -> Result<()> {
        let path = self.dir.join(token.as_str());
        std::fs::write(&path, b"").with_context(|| format!("enqueue {}", path.display()))?;
        Ok(())
    }

    /// Pop the lexically-first pending token, or `None` when the queue is
    /// empty. Callers poll with a backoff sleep; emptiness is not an error.
    pub fn take(&self) -> Result<Option<RevisionToken>> {
        let mut names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("list queue directory {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            // hidden names are in-flight claims, not work
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();

        for name in names {
            let claimed = self.dir.join(format!(".claim-{}-{}", name, Uuid::new_v4()));
            match std::fs::rename(self.dir.join(&name), &claimed) {
                Ok(()) => {
                    if let Err(err) = std::fs::remove_file(&claimed) {
                        tracing::warn!(claim = %claimed.display(), %err, "could not remove claim file");
                    }
                    return Ok(Some(RevisionToken::from_str(name)));
                }
                // another consumer got there first; try the next entry
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("claim queue entry {}", name));
                }
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with('.') {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_queue_takes_none() {
        let dir = tempdir().unwrap();
        let queue = RevisionQueue::open(dir.path().join("queue")).unwrap();
        assert!(queue.take().unwrap().is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn take_serves_lexically_first_and_removes_it() {
        let dir = tempdir().unwrap();
        let queue = RevisionQueue::open(dir.path()).unwrap();
        queue.push(&RevisionToken::from_str("8702")).unwrap();
        queue.push(&RevisionToken::from_str("8699")).unwrap();

        let first = queue.take().unwrap().unwrap();
        assert_eq!(first.as_str(), "8699");
        assert!(!dir.path().join("8699").exists());
        assert_eq!(queue.len().unwrap(), 1);

        let second = queue.take().unwrap().unwrap();
        assert_eq!(second.as_str(), "8702");
        assert!(queue.take().unwrap().is_none());
    }

    #[test]
    fn claim_files_are_not_work() {
        let dir = tempdir().unwrap();
        let queue = RevisionQueue::open(dir.path()).unwrap();
        std::fs::write(dir.path().join(".claim-stale-x"), b"").unwrap();
        assert!(queue.take().unwrap().is_none());
        assert_eq!(queue.len().unwrap(), 0);
    }
}
