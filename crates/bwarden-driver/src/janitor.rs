//! Temp-artifact cleanup
//!
//! Artifacts are grouped by category tag ("temp", "downloads", ...), each
//! mapped to a directory. A purge attempts every artifact and reports
//! per-path failures instead of aborting the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bwarden_core::prelude::*;

/// A single deletable artifact of a service run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempArtifact {
    pub path: PathBuf,
    pub category: String,
}

/// Outcome of one purge pass.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failures: Vec<Error>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.deleted + self.failures.len()
    }
}

/// Enumerates and deletes the temporary artifacts of a service run.
#[derive(Debug, Default)]
pub struct ResourceJanitor {
    roots: HashMap<String, PathBuf>,
}

impl ResourceJanitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category tag and the directory that holds its artifacts.
    pub fn with_category(mut self, category: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(category.into(), root.into());
        self
    }

    /// Enumerate the artifacts currently present for a category.
    ///
    /// A missing or unreadable category directory yields an empty list --
    /// nothing to clean is not an error.
    pub fn list_artifacts(&self, category: &str) -> Vec<TempArtifact> {
        let Some(root) = self.roots.get(category) else {
            debug!("no root registered for category '{}'", category);
            return Vec::new();
        };

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("cannot enumerate {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| TempArtifact {
                path: entry.path(),
                category: category.to_string(),
            })
            .collect()
    }

    /// Delete every artifact in a category, continuing past failures.
    pub fn purge(&self, category: &str) -> PurgeReport {
        let artifacts = self.list_artifacts(category);
        info!(
            "Purging {} artifact(s) in category '{}'",
            artifacts.len(),
            category
        );
        self.purge_artifacts(&artifacts)
    }

    /// Delete a specific artifact list, continuing past failures.
    ///
    /// Every artifact is attempted regardless of earlier failures; the
    /// report carries one error per path that could not be deleted.
    pub fn purge_artifacts(&self, artifacts: &[TempArtifact]) -> PurgeReport {
        let mut report = PurgeReport::default();

        for artifact in artifacts {
            match Self::delete(&artifact.path) {
                Ok(()) => {
                    debug!("deleted {}", artifact.path.display());
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!("failed to delete {}: {}", artifact.path.display(), e);
                    report
                        .failures
                        .push(Error::cleanup(&artifact.path, e.to_string()));
                }
            }
        }

        report
    }

    fn delete(path: &Path) -> std::io::Result<()> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}
