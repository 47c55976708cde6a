//! Code-signing hand-off
//!
//! The scan only finds binaries; producing and checking signatures is the job
//! of an external tool. This module is the seam to that tool: a trait the
//! signing pass talks to, and an implementation that shells out.

use crate::config::SignerConfig;
use crate::error::SignError;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const FILE_PLACEHOLDER: &str = "{file}";

/// An external code-signing collaborator.
///
/// Signing passes call it one file at a time, never concurrently.
///
/// # Example
///
/// ```ignore
/// struct NoopSigner;
///
/// impl CodeSigner for NoopSigner {
///     fn is_signed(&self, _path: &Path) -> Result<bool, SignError> {
///         Ok(true)
///     }
///
///     fn sign(&self, _path: &Path) -> Result<(), SignError> {
///         Ok(())
///     }
/// }
/// ```
pub trait CodeSigner {
    /// Reports whether `path` already carries a signature.
    fn is_signed(&self, path: &Path) -> Result<bool, SignError>;

    /// Signs `path` in place.
    fn sign(&self, path: &Path) -> Result<(), SignError>;

    /// The signer's own executable, which must never be signed by itself.
    fn tool_path(&self) -> Option<&Path> {
        None
    }
}

/// Runs a signing tool as a child process
#[derive(Debug, Clone)]
pub struct CommandSigner {
    /// Configured tool, already looked up on `PATH` when it is a bare name
    tool: PathBuf,
    inspect_args: Vec<String>,
    sign_args: Vec<String>,
}

impl CommandSigner {
    pub fn new(config: &SignerConfig) -> Self {
        Self::with_search_path(config, std::env::var_os("PATH"))
    }

    /// Like [`CommandSigner::new`], resolving a bare tool name against
    /// `search_path` instead of the process `PATH`.
    pub fn with_search_path(
        config: &SignerConfig,
        search_path: Option<impl AsRef<OsStr>>,
    ) -> Self {
        Self {
            tool: resolve_tool(&config.tool, search_path),
            inspect_args: config.inspect_args.clone(),
            sign_args: config.sign_args.clone(),
        }
    }

    fn run(&self, args: &[String], path: &Path) -> Result<Output, SignError> {
        Command::new(&self.tool)
            .args(expand_args(args, path))
            .output()
            .map_err(|source| SignError::Spawn {
                tool: self.tool.clone(),
                source,
            })
    }
}

impl CodeSigner for CommandSigner {
    fn is_signed(&self, path: &Path) -> Result<bool, SignError> {
        let output = self.run(&self.inspect_args, path)?;
        Ok(output.status.success())
    }

    fn sign(&self, path: &Path) -> Result<(), SignError> {
        let output = self.run(&self.sign_args, path)?;
        if output.status.success() {
            return Ok(());
        }

        Err(SignError::Failed {
            path: path.to_path_buf(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn tool_path(&self) -> Option<&Path> {
        Some(&self.tool)
    }
}

/// Looks a bare command name up on `search_path`; paths with a separator are
/// used as given.
fn resolve_tool(tool: &Path, search_path: Option<impl AsRef<OsStr>>) -> PathBuf {
    if tool.components().count() != 1 || tool.is_absolute() {
        return tool.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_default();
    match which::which_in(tool, search_path, cwd) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(tool = %tool.display(), error = %e, "signing tool not found on PATH");
            tool.to_path_buf()
        }
    }
}

fn expand_args(args: &[String], path: &Path) -> Vec<OsString> {
    args.iter()
        .map(|arg| {
            if arg == FILE_PLACEHOLDER {
                path.as_os_str().to_os_string()
            } else if arg.contains(FILE_PLACEHOLDER) {
                OsString::from(arg.replace(FILE_PLACEHOLDER, &path.to_string_lossy()))
            } else {
                OsString::from(arg)
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct SigningReport {
    pub signed: Vec<PathBuf>,
    pub already_signed: Vec<PathBuf>,
    /// Unsigned files left alone because of a dry run
    pub pending: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl SigningReport {
    pub fn total(&self) -> usize {
        self.signed.len() + self.already_signed.len() + self.pending.len() + self.failed.len()
    }
}

/// Inspects each path in turn and signs those without a signature.
///
/// A failure on one file is recorded and the pass moves on.
pub fn sign_all<'a, S, I>(
    signer: &S,
    paths: I,
    dry_run: bool,
    progress_callback: Option<&dyn Fn(usize, usize)>,
) -> SigningReport
where
    S: CodeSigner + ?Sized,
    I: IntoIterator<Item = &'a PathBuf>,
    I::IntoIter: ExactSizeIterator,
{
    let paths = paths.into_iter();
    let total = paths.len();
    let mut report = SigningReport::default();

    for (i, path) in paths.enumerate() {
        match signer.is_signed(path) {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "already signed");
                report.already_signed.push(path.clone());
            }
            Ok(false) if dry_run => {
                tracing::info!(path = %path.display(), "would sign");
                report.pending.push(path.clone());
            }
            Ok(false) => match signer.sign(path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "signed");
                    report.signed.push(path.clone());
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "signing failed");
                    report.failed.push((path.clone(), e.to_string()));
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "signature inspection failed");
                report.failed.push((path.clone(), e.to_string()));
            }
        }

        if let Some(callback) = progress_callback {
            callback(i + 1, total);
        }
    }

    report
}
