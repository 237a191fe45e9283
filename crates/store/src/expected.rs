//! Expected output files
//!
//! Wrappers declare, before the tool runs, which files the invocation is
//! expected to produce: a map from file ID (the logical output slot) to a
//! target path plus whether the file must exist afterwards. Optional files
//! that never appear are simply dropped from the stored entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A declared output of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFile {
    path: PathBuf,
    required: bool,
}

impl ExpectedFile {
    /// Declare an output at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, required: bool) -> Self {
        Self {
            path: path.into(),
            required,
        }
    }

    /// Where the file is expected to appear.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the tool must produce this file.
    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }
}

/// File ID to expected-file map for one invocation. `BTreeMap` keeps
/// iteration deterministic.
pub type ExpectedFileMap = BTreeMap<String, ExpectedFile>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let file = ExpectedFile::new("/build/a.o", true);
        assert_eq!(file.path(), Path::new("/build/a.o"));
        assert!(file.required());
    }

    #[test]
    fn map_iterates_in_id_order() {
        let mut map = ExpectedFileMap::new();
        map.insert("object".into(), ExpectedFile::new("a.o", true));
        map.insert("coverage".into(), ExpectedFile::new("a.gcno", false));
        let ids: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(ids, ["coverage", "object"]);
    }
}
