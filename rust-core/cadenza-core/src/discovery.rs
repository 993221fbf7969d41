//! # Controller Discovery
//!
//! Where controllers live and how their identifiers are found.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Application directories searched for controllers, in order
pub const APP_DIRECTORIES: [&str; 3] = ["api", "view", "commands"];

/// Produces the controller identifiers found in a directory
pub trait ControllerFinder {
    /// Controller identifiers under `directory`, in a stable order
    fn find(&self, directory: &Path) -> Vec<String>;
}

/// Finder backed by an explicit directory → controllers table
#[derive(Debug, Clone, Default)]
pub struct StaticFinder {
    entries: HashMap<PathBuf, Vec<String>>,
}

impl StaticFinder {
    /// Create an empty finder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `controllers` for `directory`
    #[must_use]
    pub fn with<I, S>(mut self, directory: impl Into<PathBuf>, controllers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(directory.into())
            .or_default()
            .extend(controllers.into_iter().map(Into::into));
        self
    }
}

impl ControllerFinder for StaticFinder {
    fn find(&self, directory: &Path) -> Vec<String> {
        self.entries.get(directory).cloned().unwrap_or_default()
    }
}

/// Controller directories under `base_path`
///
/// Existing `api`, `view` and `commands` directories come first, then every
/// `vendor/cadenza/<package>/src/controllers` directory in name order.
#[must_use]
pub fn resolve_controller_directories(base_path: &Path) -> Vec<PathBuf> {
    let mut directories: Vec<PathBuf> = APP_DIRECTORIES
        .iter()
        .map(|dir| base_path.join(dir))
        .filter(|path| path.is_dir())
        .collect();

    if let Ok(entries) = fs::read_dir(base_path.join("vendor").join("cadenza")) {
        let mut packages: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        packages.sort();

        directories.extend(
            packages
                .into_iter()
                .map(|package| package.join("src").join("controllers"))
                .filter(|path| path.is_dir()),
        );
    }

    let mut seen = Vec::with_capacity(directories.len());
    directories.retain(|dir| {
        if seen.contains(dir) {
            false
        } else {
            seen.push(dir.clone());
            true
        }
    });
    directories
}
