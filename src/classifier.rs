//! Binary classification
//!
//! Decides whether a single file is a native ELF binary that needs a code
//! signature. Checks run from cheapest to most expensive and the first
//! decisive check wins: two name-based allow-lists, a trusted-extension
//! shortcut, the execute bit, and finally a 4-byte magic read.

use crate::config::ClassifierConfig;
use std::collections::HashSet;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// `0x7F 'E' 'L' 'F'`
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Why a file was or was not selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    TextExtension,
    TextBasename,
    ElfMagic,
    MissingMagic,
    NotExecutable,
    Unreadable(io::ErrorKind),
}

impl VerdictReason {
    pub fn name(&self) -> &'static str {
        match self {
            VerdictReason::TextExtension => "text extension",
            VerdictReason::TextBasename => "text basename",
            VerdictReason::ElfMagic => "ELF magic",
            VerdictReason::MissingMagic => "no ELF magic",
            VerdictReason::NotExecutable => "not executable",
            VerdictReason::Unreadable(_) => "unreadable",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictReason::Unreadable(kind) => write!(f, "{} ({})", self.name(), kind),
            _ => write!(f, "{}", self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub is_binary: bool,
    pub reason: VerdictReason,
}

impl Verdict {
    fn binary(reason: VerdictReason) -> Self {
        Self {
            is_binary: true,
            reason,
        }
    }

    fn not_binary(reason: VerdictReason) -> Self {
        Self {
            is_binary: false,
            reason,
        }
    }
}

#[inline]
pub fn has_elf_magic(prefix: &[u8]) -> bool {
    prefix.len() >= ELF_MAGIC.len() && prefix[..ELF_MAGIC.len()] == ELF_MAGIC
}

/// Classifies files using immutable allow-lists fixed at construction
#[derive(Debug, Clone)]
pub struct BinaryClassifier {
    text_extensions: HashSet<String>,
    text_basenames: HashSet<String>,
    elf_extensions: HashSet<String>,
}

impl Default for BinaryClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl BinaryClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            text_extensions: normalize(config.effective_text_extensions()),
            text_basenames: normalize(config.effective_text_basenames()),
            elf_extensions: normalize(config.effective_elf_extensions()),
        }
    }

    /// Returns true when `path` should be signed. Never fails; anything that
    /// cannot be read is treated as "not a binary".
    pub async fn classify(&self, path: &Path) -> bool {
        self.verdict(path).await.is_binary
    }

    pub async fn verdict(&self, path: &Path) -> Verdict {
        if let Some(verdict) = self.classify_by_name(path) {
            return verdict;
        }

        if !self.has_elf_extension(path) {
            match tokio::fs::metadata(path).await {
                Ok(metadata) if !is_executable(&metadata) => {
                    return Verdict::not_binary(VerdictReason::NotExecutable);
                }
                Ok(_) => {}
                Err(e) => return unreadable(path, e),
            }
        }

        match read_magic(path).await {
            Ok(true) => Verdict::binary(VerdictReason::ElfMagic),
            Ok(false) => Verdict::not_binary(VerdictReason::MissingMagic),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Verdict::not_binary(VerdictReason::MissingMagic)
            }
            Err(e) => unreadable(path, e),
        }
    }

    /// The filesystem-free head of the cascade. `Some` means the name alone
    /// decided the verdict.
    pub fn classify_by_name(&self, path: &Path) -> Option<Verdict> {
        let extension = lowercase_extension(path);

        if extension
            .as_deref()
            .is_some_and(|ext| self.text_extensions.contains(ext))
        {
            return Some(Verdict::not_binary(VerdictReason::TextExtension));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase());

        if stem
            .as_deref()
            .is_some_and(|s| self.text_basenames.contains(s))
        {
            return Some(Verdict::not_binary(VerdictReason::TextBasename));
        }

        None
    }

    pub fn has_elf_extension(&self, path: &Path) -> bool {
        lowercase_extension(path).is_some_and(|ext| self.elf_extensions.contains(&ext))
    }
}

fn normalize<'a>(items: impl Iterator<Item = &'a str>) -> HashSet<String> {
    items
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn unreadable(path: &Path, e: io::Error) -> Verdict {
    tracing::debug!(path = %path.display(), error = %e, "classification fell back to not-binary");
    Verdict::not_binary(VerdictReason::Unreadable(e.kind()))
}

async fn read_magic(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path).await?;
    let mut prefix = [0u8; ELF_MAGIC.len()];
    file.read_exact(&mut prefix).await?;
    Ok(has_elf_magic(&prefix))
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

// No execute bit to consult; let every remaining file reach the magic check.
#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    true
}
