//! Per-user Maya scripts folder check.
//!
//! The worm persists by dropping startup scripts next to the user's Maya
//! preferences. Their mere presence under the scripts folder counts as an
//! infection; cleaning deletes them.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Files the worm drops into the scripts folder.
pub const KNOWN_DROPPERS: [&str; 5] = [
    "vaccine.py",
    "vaccine.pyc",
    "userSetup.py",
    "userSetup.pyc",
    "userSetup.mel",
];

/// Checker bound to one scripts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeScriptsCheck {
    dir: PathBuf,
}

impl HomeScriptsCheck {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dropper files currently present.
    ///
    /// Anything that cannot be ruled out (a stat error other than not-found)
    /// counts as present.
    #[must_use]
    pub fn detect(&self) -> Vec<PathBuf> {
        KNOWN_DROPPERS
            .iter()
            .map(|name| self.dir.join(name))
            .filter(|path| match fs::symlink_metadata(path) {
                Ok(_) => true,
                Err(err) => err.kind() != ErrorKind::NotFound,
            })
            .collect()
    }

    /// Best-effort removal of every dropper.
    ///
    /// Failures are not reported here; callers run [`detect`](Self::detect)
    /// again to learn what survived.
    pub fn clean(&self) {
        for name in KNOWN_DROPPERS {
            let path = self.dir.join(name);
            if let Err(err) = fs::remove_file(&path)
                && err.kind() != ErrorKind::NotFound
            {
                eprintln!("[DPH-HOME] unable to remove {}: {err}", path.display());
            }
        }
    }
}
