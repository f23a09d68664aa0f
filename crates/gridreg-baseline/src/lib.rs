use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridreg_core::TestIdentity;

/// Flat-file store of expected output hashes, keyed by test identity.
///
/// One record per line, `<key> <hash>`, `#` lines are comments. Absence of
/// a key means "new test, no prior baseline" and is distinct from an
/// empty hash. The store is single-writer per run: only the aggregating
/// coordinator loads, mutates and saves it.
#[derive(Clone, Debug, Default)]
pub struct BaselineStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl BaselineStore {
    /// Load the store at `path`. A missing file is not an error: the run
    /// proceeds with an empty baseline and every case comes back `New`.
    /// Malformed lines (no second field) are skipped, never fatal.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = HashMap::new();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "could not open baseline database");
                return Self { path, entries };
            }
        };
        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(key), Some(hash)) => {
                    entries.insert(key.trim().to_string(), hash.trim().to_string());
                }
                _ => continue,
            }
        }
        Self { path, entries }
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn lookup_identity(&self, id: &TestIdentity) -> Option<&str> {
        self.lookup(&id.key())
    }

    /// Overwrite semantics: last write wins.
    pub fn update(&mut self, key: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(key.into(), hash.into());
    }

    /// Rewrite the whole file. Key order is recomputed on every save and
    /// carries no meaning; we sort so diffs between runs stay readable.
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        let mut out = String::from("# regression test baseline\n");
        for key in keys {
            let _ = writeln!(out, "{} {}", key, self.entries[key]);
        }
        std::fs::write(path, out).with_context(|| format!("write baseline {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = BaselineStore::load(dir.path().join("absent.txt"));
        assert!(store.is_empty());
    }

    #[test]
    fn comments_and_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.txt");
        std::fs::write(
            &path,
            "# header\nfile:/t/a.ps;device:ppmraw;dpi:600 abc123\nbrokenline\n",
        )
        .unwrap();
        let store = BaselineStore::load(&path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup("file:/t/a.ps;device:ppmraw;dpi:600"), Some("abc123"));
        assert_eq!(store.lookup("brokenline"), None);
    }

    #[test]
    fn save_load_round_trip_preserves_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baseline.txt");
        let mut store = BaselineStore::load(&path);
        store.update("file:/t/a.ps;device:ppmraw;dpi:600", "abc123");
        store.update("file:/t/b.ps;device:pbmraw;dpi:300", "def456");
        store.save().unwrap();

        let reloaded = BaselineStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup("file:/t/b.ps;device:pbmraw;dpi:300"), Some("def456"));

        // saving the reload produces the same file again
        let copy = dir.path().join("copy.txt");
        reloaded.save_to(&copy).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::fs::read_to_string(&copy).unwrap()
        );
    }

    #[test]
    fn update_is_last_write_wins() {
        let dir = tempdir().unwrap();
        let mut store = BaselineStore::load(dir.path().join("b.txt"));
        store.update("k", "old");
        store.update("k", "new");
        assert_eq!(store.lookup("k"), Some("new"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn identity_lookup_uses_canonical_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.txt");
        std::fs::write(&path, "file:/t/a.ps;device:ppmraw;dpi:600 abc123\n").unwrap();
        let store = BaselineStore::load(&path);
        let id = TestIdentity::new("/t/a.ps", "ppmraw", 600);
        assert_eq!(store.lookup_identity(&id), Some("abc123"));
    }
}
