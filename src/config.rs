//! Scan configuration
//!
//! Everything here is plain data: the allow-lists the classifier is built
//! from, pool sizing, and the command line of the external signing tool.
//! A JSON file can override any field; missing fields keep their defaults.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory scanned when no root is given, relative to the working directory
pub const DEFAULT_ROOT: &str = "node_modules";

/// Upper bound on classification tasks in flight at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "mts", "cts", "jsx", "tsx", "json", "json5", "map", "md",
    "markdown", "txt", "css", "scss", "sass", "less", "html", "htm", "xml", "svg", "yml",
    "yaml", "toml", "ini", "lock", "flow", "coffee", "vue", "gyp", "gypi", "c", "cc", "cpp",
    "h", "hpp", "py", "pyi", "rst",
];

const DEFAULT_TEXT_BASENAMES: &[&str] = &[
    "license",
    "licence",
    "changelog",
    "changes",
    "authors",
    "contributors",
    "notice",
    "readme",
    "history",
    "copying",
    "patents",
    "makefile",
];

const DEFAULT_ELF_EXTENSIONS: &[&str] = &["so", "node"];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Static allow-lists driving the classification cascade
///
/// The base lists replace the built-in defaults when set in a config file;
/// the `extra_*` lists are appended to whatever base list is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Extensions (without the dot) that always mean "text"
    pub text_extensions: Vec<String>,
    /// File stems that always mean "text" (LICENSE, CHANGELOG, ...)
    pub text_basenames: Vec<String>,
    /// Extensions trusted enough to go straight to the magic check
    pub elf_extensions: Vec<String>,
    pub extra_text_extensions: Vec<String>,
    pub extra_text_basenames: Vec<String>,
    pub extra_elf_extensions: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            text_extensions: owned(DEFAULT_TEXT_EXTENSIONS),
            text_basenames: owned(DEFAULT_TEXT_BASENAMES),
            elf_extensions: owned(DEFAULT_ELF_EXTENSIONS),
            extra_text_extensions: Vec::new(),
            extra_text_basenames: Vec::new(),
            extra_elf_extensions: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    pub fn effective_text_extensions(&self) -> impl Iterator<Item = &str> {
        self.text_extensions
            .iter()
            .chain(&self.extra_text_extensions)
            .map(String::as_str)
    }

    pub fn effective_text_basenames(&self) -> impl Iterator<Item = &str> {
        self.text_basenames
            .iter()
            .chain(&self.extra_text_basenames)
            .map(String::as_str)
    }

    pub fn effective_elf_extensions(&self) -> impl Iterator<Item = &str> {
        self.elf_extensions
            .iter()
            .chain(&self.extra_elf_extensions)
            .map(String::as_str)
    }
}

/// How to call the external signing tool
///
/// `{file}` in an argument is replaced by the path being inspected or signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub tool: PathBuf,
    pub inspect_args: Vec<String>,
    pub sign_args: Vec<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("binary-sign-tool"),
            inspect_args: owned(&["display-sign", "-inFile", "{file}"]),
            sign_args: owned(&[
                "sign", "-inFile", "{file}", "-outFile", "{file}", "-selfSign", "1",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub max_concurrency: usize,
    pub classifier: ClassifierConfig,
    pub signer: SignerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            classifier: ClassifierConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file; absent fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ScanError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.classifier.effective_elf_extensions().next().is_none() {
            return Err(ScanError::Config(
                "at least one ELF extension is required".to_string(),
            ));
        }

        Ok(())
    }
}
