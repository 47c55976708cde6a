pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod platform;
pub mod pool;
pub mod scan;
pub mod signing;
pub mod walker;

pub use classifier::{has_elf_magic, BinaryClassifier, Verdict, VerdictReason, ELF_MAGIC};
pub use config::{ClassifierConfig, Config, SignerConfig};
pub use error::{Result, ScanError, SignError, TaskError};
pub use pool::{ConcurrencyPool, PoolStats, TaskHandle};
pub use scan::{find_binaries, ScanOptions, ScanOrchestrator, ScanReport};
pub use signing::{sign_all, CodeSigner, CommandSigner, SigningReport};
pub use walker::{TreeWalker, WalkStats};
