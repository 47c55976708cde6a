//! Scan orchestration
//!
//! Walks a dependency tree, classifies every file through the bounded pool
//! and collects the ones that need signing.

use crate::classifier::BinaryClassifier;
use crate::config::{Config, DEFAULT_MAX_CONCURRENCY};
use crate::error::{Result, ScanError};
use crate::pool::{ConcurrencyPool, TaskHandle};
use crate::walker::{root_status, TreeWalker};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_concurrency: usize,
    /// Files never reported, e.g. the signing tool's own binary
    pub exclude: Vec<PathBuf>,
    pub max_depth: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            exclude: Vec::new(),
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub root: PathBuf,
    pub binaries: BTreeSet<PathBuf>,
    pub files_seen: usize,
    pub excluded: usize,
    pub task_failures: usize,
    pub walk_errors: usize,
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn total_binaries(&self) -> usize {
        self.binaries.len()
    }
}

pub struct ScanOrchestrator {
    classifier: Arc<BinaryClassifier>,
    options: ScanOptions,
    exclude: HashSet<PathBuf>,
}

impl ScanOrchestrator {
    pub fn new(classifier: Arc<BinaryClassifier>, options: ScanOptions) -> Self {
        let exclude = options
            .exclude
            .iter()
            .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
            .collect();

        Self {
            classifier,
            options,
            exclude,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(BinaryClassifier::default()), ScanOptions::default())
    }

    pub fn from_config(config: &Config, exclude: Vec<PathBuf>) -> Self {
        Self::new(
            Arc::new(BinaryClassifier::new(&config.classifier)),
            ScanOptions {
                max_concurrency: config.max_concurrency,
                exclude,
                max_depth: None,
            },
        )
    }

    pub async fn scan(&self, root: &Path) -> Result<ScanReport> {
        let start_time = Instant::now();

        root_status(root, tokio::fs::metadata(root).await)?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| ScanError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        tracing::info!(
            root = %root.display(),
            max_concurrency = self.options.max_concurrency,
            "starting scan"
        );

        let pool = ConcurrencyPool::new(self.options.max_concurrency);
        let (path_tx, mut path_rx) = mpsc::unbounded_channel();

        let mut walker = TreeWalker::new();
        if let Some(depth) = self.options.max_depth {
            walker = walker.with_max_depth(depth);
        }

        let walk_root = root.clone();
        let walk = tokio::task::spawn_blocking(move || {
            walker.for_each_file(&walk_root, |path| {
                // Receiver lives until the walk is joined below.
                let _ = path_tx.send(path);
            })
        });

        let mut pending = Vec::new();
        let mut excluded = 0usize;

        while let Some(path) = path_rx.recv().await {
            if self.exclude.contains(&path) {
                excluded += 1;
                tracing::debug!(path = %path.display(), "excluded from scan");
                continue;
            }

            let classifier = Arc::clone(&self.classifier);
            let task_path = path.clone();
            let handle = pool.submit(async move { classifier.classify(&task_path).await });
            pending.push((path, handle));
        }

        let walk_stats = walk
            .await
            .map_err(|e| ScanError::Walker(e.to_string()))??;

        let (binaries, task_failures) = collect_binaries(pending).await;
        pool.wait_idle().await;

        let report = ScanReport {
            root,
            binaries,
            files_seen: walk_stats.files,
            excluded,
            task_failures,
            walk_errors: walk_stats.errors,
            elapsed: start_time.elapsed(),
        };

        tracing::info!(
            files = report.files_seen,
            binaries = report.total_binaries(),
            excluded = report.excluded,
            failures = report.task_failures,
            "scan complete in {:.2}s",
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }
}

/// Awaits every classification outcome. Failed tasks are logged and counted;
/// they never stop the others from being collected.
async fn collect_binaries(
    pending: Vec<(PathBuf, TaskHandle<bool>)>,
) -> (BTreeSet<PathBuf>, usize) {
    let mut binaries = BTreeSet::new();
    let mut task_failures = 0usize;

    for (path, handle) in pending {
        match handle.await {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "binary found");
                binaries.insert(path);
            }
            Ok(false) => {}
            Err(e) => {
                task_failures += 1;
                tracing::warn!(path = %path.display(), error = %e, "classification task failed");
            }
        }
    }

    (binaries, task_failures)
}

/// Scans `root` with the default allow-lists and returns the binaries found.
pub async fn find_binaries(root: &Path) -> Result<BTreeSet<PathBuf>> {
    Ok(ScanOrchestrator::with_defaults().scan(root).await?.binaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_root_fails_fast() {
        let dir = TempDir::new().unwrap();
        let err = ScanOrchestrator::with_defaults()
            .scan(&dir.path().join("node_modules"))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::RootNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_root() {
        let dir = TempDir::new().unwrap();
        let report = ScanOrchestrator::with_defaults()
            .scan(dir.path())
            .await
            .unwrap();

        assert!(report.binaries.is_empty());
        assert_eq!(report.files_seen, 0);
    }

    #[tokio::test]
    async fn test_failed_task_counted_and_siblings_kept() {
        let pool = ConcurrencyPool::new(2);
        let pending = vec![
            (PathBuf::from("/m/a.node"), pool.submit(async { true })),
            (
                PathBuf::from("/m/broken"),
                pool.submit::<_, bool>(async { panic!("stat exploded") }),
            ),
            (PathBuf::from("/m/index.js"), pool.submit(async { false })),
            (PathBuf::from("/m/b.so"), pool.submit(async { true })),
        ];

        let (binaries, failures) = collect_binaries(pending).await;

        assert_eq!(failures, 1);
        assert_eq!(
            binaries.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("/m/a.node"), PathBuf::from("/m/b.so")]
        );
        pool.wait_idle().await;
        assert_eq!(pool.stats().completed, 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_subtree_reported_as_walk_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.node"), [0x7F, b'E', b'L', b'F']).unwrap();
        fs::write(dir.path().join("addon.node"), [0x7F, b'E', b'L', b'F']).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = ScanOrchestrator::with_defaults().scan(dir.path()).await;

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let report = result.unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert!(report.binaries.contains(&root.join("addon.node")));

        // Root bypasses permission bits; only a denied read surfaces an error.
        if report.files_seen == 1 {
            assert!(report.walk_errors >= 1);
        } else {
            assert_eq!(report.walk_errors, 0);
        }
    }

    #[tokio::test]
    async fn test_exclude_list() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("signer.so");
        let addon = dir.path().join("addon.node");
        fs::write(&tool, [0x7F, b'E', b'L', b'F', 0]).unwrap();
        fs::write(&addon, [0x7F, b'E', b'L', b'F', 0]).unwrap();

        let orchestrator = ScanOrchestrator::new(
            Arc::new(BinaryClassifier::default()),
            ScanOptions {
                exclude: vec![tool.clone()],
                ..ScanOptions::default()
            },
        );
        let report = orchestrator.scan(dir.path()).await.unwrap();

        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(report.excluded, 1);
        assert_eq!(report.files_seen, 2);
        assert_eq!(
            report.binaries.into_iter().collect::<Vec<_>>(),
            vec![root.join("addon.node")]
        );
    }
}
