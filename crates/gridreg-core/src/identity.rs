use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of one regression case: an input file rendered with a fixed
/// device and resolution. The baseline database is keyed by `key()`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestIdentity {
    pub file: PathBuf,
    pub device: String,
    pub dpi: u32,
}

impl TestIdentity {
    pub fn new(file: impl Into<PathBuf>, device: impl Into<String>, dpi: u32) -> Self {
        Self {
            file: file.into(),
            device: device.into(),
            dpi,
        }
    }

    /// Canonical baseline key for this identity.
    pub fn key(&self) -> String {
        makekey(
            &self.file,
            &[
                ("device", self.device.clone()),
                ("dpi", self.dpi.to_string()),
            ],
        )
    }

    /// Short report line, with the corpus root stripped from the path.
    pub fn description(&self, testpath: &Path) -> String {
        let file = self.file.strip_prefix(testpath).unwrap_or(&self.file);
        format!("{} ({} {}dpi)", file.display(), self.device, self.dpi)
    }
}

/// Build a baseline key from a file path plus keyword pairs.
///
/// Pairs are emitted in sorted key order so the key is identical no matter
/// what order the caller assembled them in.
pub fn makekey(file: &Path, pairs: &[(&str, String)]) -> String {
    let mut pairs: Vec<(&str, String)> = pairs.to_vec();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut key = format!("file:{}", file.display());
    for (name, value) in pairs {
        key.push(';');
        key.push_str(name);
        key.push(':');
        key.push_str(&value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_legacy_format() {
        let id = TestIdentity::new("/t/a.ps", "ppmraw", 600);
        assert_eq!(id.key(), "file:/t/a.ps;device:ppmraw;dpi:600");
    }

    #[test]
    fn makekey_is_order_independent() {
        let file = Path::new("/t/a.ps");
        let a = makekey(file, &[("device", "ppmraw".into()), ("dpi", "600".into())]);
        let b = makekey(file, &[("dpi", "600".into()), ("device", "ppmraw".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn description_strips_corpus_root() {
        let id = TestIdentity::new("/home/regress/tests/pcl/frs.pcl", "pbmraw", 300);
        let d = id.description(Path::new("/home/regress/tests"));
        assert_eq!(d, "pcl/frs.pcl (pbmraw 300dpi)");
    }

    #[test]
    fn description_keeps_foreign_paths_whole() {
        let id = TestIdentity::new("/elsewhere/x.pdf", "ppmraw", 600);
        let d = id.description(Path::new("/home/regress/tests"));
        assert_eq!(d, "/elsewhere/x.pdf (ppmraw 600dpi)");
    }
}
