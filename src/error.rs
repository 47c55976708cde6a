use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a scan before any file is classified
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Scan root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Directory walker stopped unexpectedly: {0}")]
    Walker(String),
}

/// Outcome of a pool task that did not produce a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was dropped before completing")]
    Dropped,
}

/// Errors reported by a code-signing collaborator
#[derive(Error, Debug)]
pub enum SignError {
    #[error("Failed to launch signing tool {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Signing tool failed on {path} (exit code {code:?}): {stderr}")]
    Failed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;
