//! Directory traversal
//!
//! Enumerates every regular file under a root. Symbolic links are never
//! followed and never reported, which keeps the walk inside the tree and
//! makes link cycles harmless.

use crate::error::{Result, ScanError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Counters for one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub files: usize,
    pub symlinks_skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TreeWalker {
    max_depth: Option<usize>,
}

impl TreeWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits recursion depth; the root's direct children are depth 1.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Collects all regular files under `root`, depth first.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.for_each_file(root, |path| files.push(path))?;
        Ok(files)
    }

    /// Streams regular files under `root` into `sink` as they are found.
    ///
    /// Fails only if `root` itself is missing or not a directory. Entries that
    /// cannot be read are logged and skipped.
    pub fn for_each_file<F>(&self, root: &Path, mut sink: F) -> Result<WalkStats>
    where
        F: FnMut(PathBuf),
    {
        check_root(root)?;

        let mut walker = WalkDir::new(root).follow_links(false);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut stats = WalkStats::default();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(
                        path = ?e.path(),
                        error = %e,
                        "skipping unreadable entry"
                    );
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                stats.symlinks_skipped += 1;
                tracing::trace!(path = %entry.path().display(), "skipping symlink");
            } else if file_type.is_file() {
                stats.files += 1;
                sink(entry.into_path());
            }
        }

        tracing::debug!(
            root = %root.display(),
            files = stats.files,
            symlinks = stats.symlinks_skipped,
            errors = stats.errors,
            "walk finished"
        );

        Ok(stats)
    }
}

/// Verifies `root` exists and is a directory.
pub fn check_root(root: &Path) -> Result<()> {
    root_status(root, std::fs::metadata(root))
}

/// Maps the result of a metadata lookup on the scan root to a scan error.
pub fn root_status(root: &Path, metadata: std::io::Result<std::fs::Metadata>) -> Result<()> {
    match metadata {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ScanError::RootNotDirectory(root.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ScanError::RootNotFound(root.to_path_buf()))
        }
        Err(source) => Err(ScanError::Io {
            path: root.to_path_buf(),
            source,
        }),
    }
}
