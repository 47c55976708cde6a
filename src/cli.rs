use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "elfsweep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Find and sign native ELF binaries inside dependency trees", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum number of files classified at once
    #[arg(short = 'j', long, global = true)]
    pub concurrency: Option<usize>,

    /// Run even when not on the signing target platform
    #[arg(long, global = true)]
    pub skip_platform_check: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List binaries that need a signature
    Scan {
        /// Directory to scan [default: ./node_modules]
        root: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Scan, then sign every unsigned binary
    Sign {
        /// Directory to scan [default: ./node_modules]
        root: Option<PathBuf>,

        /// Signing tool executable
        #[arg(short, long)]
        tool: Option<PathBuf>,

        /// Inspect signatures but do not sign
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective classification rules
    ListRules,
}

#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn for_signing(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message("Signing binaries...".to_string());
        Self { bar }
    }

    pub fn set_position(&self, current: usize) {
        self.bar.set_position(current as u64);
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}
