use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use elfsweep::{
    find_binaries, BinaryClassifier, ClassifierConfig, CodeSigner, CommandSigner, ScanError,
    ScanOptions, ScanOrchestrator, SignerConfig,
};

const ELF_HEADER: &[u8] = &[0x7F, b'E', b'L', b'F', 0x02, 0x01, 0x01, 0x00, 0x00, 0x00];

fn write(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, data).unwrap();
}

#[cfg(unix)]
fn chmod(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn file_names(paths: &BTreeSet<PathBuf>) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect()
}

/// A small node_modules tree with one of each interesting case.
#[cfg(unix)]
fn create_package_tree() -> (TempDir, TempDir) {
    let dir = tempdir().unwrap();
    let outside = tempdir().unwrap();
    let root = dir.path();

    write(&root.join("a.so"), b"not really a library");
    write(&root.join("b.node"), ELF_HEADER);
    write(&root.join("LICENSE"), ELF_HEADER);
    write(&root.join("script.sh"), ELF_HEADER);
    chmod(&root.join("script.sh"), 0o755);

    write(&root.join("esbuild/package.json"), b"{\"name\":\"esbuild\"}");
    write(&root.join("esbuild/bin/esbuild"), ELF_HEADER);
    chmod(&root.join("esbuild/bin/esbuild"), 0o755);
    write(&root.join("esbuild/lib/main.js"), ELF_HEADER);
    write(&root.join("esbuild/bin/cli"), b"#!/usr/bin/env node\nrequire('../lib/main.js')\n");
    chmod(&root.join("esbuild/bin/cli"), 0o755);

    write(&root.join("prebuilds/data.bin"), ELF_HEADER);
    chmod(&root.join("prebuilds/data.bin"), 0o644);

    write(&outside.path().join("lib/hidden.so"), ELF_HEADER);
    write(&outside.path().join("lib/tool"), ELF_HEADER);
    chmod(&outside.path().join("lib/tool"), 0o755);
    std::os::unix::fs::symlink(outside.path().join("lib"), root.join("lib")).unwrap();

    (dir, outside)
}

#[cfg(unix)]
#[tokio::test]
async fn test_end_to_end_selection() {
    let (dir, _outside) = create_package_tree();

    let report = ScanOrchestrator::with_defaults()
        .scan(dir.path())
        .await
        .unwrap();

    let root = fs::canonicalize(dir.path()).unwrap();
    let expected: BTreeSet<PathBuf> = [
        root.join("b.node"),
        root.join("script.sh"),
        root.join("esbuild/bin/esbuild"),
    ]
    .into_iter()
    .collect();

    assert_eq!(report.binaries, expected);
    assert_eq!(report.files_seen, 9);
    assert_eq!(report.task_failures, 0);
    assert!(report.binaries.iter().all(|p| p.is_absolute()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_directory_never_reported() {
    let (dir, outside) = create_package_tree();

    let binaries = find_binaries(dir.path()).await.unwrap();

    let outside = fs::canonicalize(outside.path()).unwrap();
    assert!(binaries.iter().all(|p| !p.starts_with(&outside)));
    assert!(!file_names(&binaries).contains(&"hidden.so".to_string()));
    assert!(!file_names(&binaries).contains(&"tool".to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_scan_is_idempotent() {
    let (dir, _outside) = create_package_tree();
    let orchestrator = ScanOrchestrator::with_defaults();

    let first = orchestrator.scan(dir.path()).await.unwrap();
    let second = orchestrator.scan(dir.path()).await.unwrap();

    assert_eq!(first.binaries, second.binaries);
    assert_eq!(first.files_seen, second.files_seen);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cyclic_symlink_terminates() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("pkg/addon.node"), ELF_HEADER);
    std::os::unix::fs::symlink(dir.path(), dir.path().join("pkg/loop")).unwrap();

    let binaries = find_binaries(dir.path()).await.unwrap();
    assert_eq!(file_names(&binaries), vec!["addon.node"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_files_with_small_pool() {
    let dir = tempdir().unwrap();
    for pkg in 0..40 {
        for file in 0..25 {
            write(
                &dir.path().join(format!("pkg{pkg}/lib/file{file}.js")),
                b"module.exports = {}",
            );
        }
        write(&dir.path().join(format!("pkg{pkg}/build/addon.node")), ELF_HEADER);
    }

    let orchestrator = ScanOrchestrator::new(
        Arc::new(BinaryClassifier::default()),
        ScanOptions {
            max_concurrency: 3,
            ..ScanOptions::default()
        },
    );
    let report = orchestrator.scan(dir.path()).await.unwrap();

    assert_eq!(report.files_seen, 40 * 26);
    assert_eq!(report.binaries.len(), 40);
    assert!(report.binaries.iter().all(|p| p.ends_with("build/addon.node")));
}

#[tokio::test]
async fn test_custom_rules() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("libfoo.dylib"), ELF_HEADER);
    write(&dir.path().join("b.node"), ELF_HEADER);

    let config = ClassifierConfig {
        elf_extensions: vec!["dylib".to_string()],
        extra_text_extensions: vec!["node".to_string()],
        ..ClassifierConfig::default()
    };
    let orchestrator = ScanOrchestrator::new(
        Arc::new(BinaryClassifier::new(&config)),
        ScanOptions::default(),
    );

    let report = orchestrator.scan(dir.path()).await.unwrap();
    assert_eq!(file_names(&report.binaries), vec!["libfoo.dylib"]);
}

#[tokio::test]
async fn test_root_with_parent_components_is_resolved() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("node_modules/x/addon.node"), ELF_HEADER);

    let nested = dir.path().join("node_modules/x/../");
    let binaries = find_binaries(&nested).await.unwrap();

    let expected = fs::canonicalize(dir.path().join("node_modules/x/addon.node")).unwrap();
    assert_eq!(binaries.into_iter().collect::<Vec<_>>(), vec![expected]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_signing_tool_on_path_is_excluded() {
    let dir = tempdir().unwrap();
    let bin = dir.path().join("signpost/bin");
    let tool = bin.join("binary-sign-tool");
    write(&tool, ELF_HEADER);
    chmod(&tool, 0o755);
    write(&dir.path().join("pkg/addon.node"), ELF_HEADER);

    // Configured by bare name, found through the search path.
    let signer = CommandSigner::with_search_path(&SignerConfig::default(), Some(&bin));
    let exclude: Vec<PathBuf> = signer.tool_path().map(Path::to_path_buf).into_iter().collect();
    assert_eq!(exclude, vec![tool.clone()]);

    let orchestrator = ScanOrchestrator::new(
        Arc::new(BinaryClassifier::default()),
        ScanOptions {
            exclude,
            ..ScanOptions::default()
        },
    );
    let report = orchestrator.scan(dir.path()).await.unwrap();

    assert_eq!(report.excluded, 1);
    assert_eq!(report.files_seen, 2);
    assert_eq!(file_names(&report.binaries), vec!["addon.node"]);
}

#[tokio::test]
async fn test_invalid_root_fails_loudly() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("file.txt"), b"hi");

    let missing = find_binaries(&dir.path().join("missing")).await;
    assert!(matches!(missing, Err(ScanError::RootNotFound(_))));

    let not_dir = find_binaries(&dir.path().join("file.txt")).await;
    assert!(matches!(not_dir, Err(ScanError::RootNotDirectory(_))));
}
