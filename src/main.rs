use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use elfsweep::cli::{Cli, Commands, ProgressReporter};
use elfsweep::{platform, sign_all, CodeSigner, CommandSigner, Config, ScanOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    config.validate()?;

    if matches!(cli.command, Some(Commands::ListRules)) {
        print_rules(&config);
        return Ok(());
    }

    if !cli.skip_platform_check && !platform::is_supported() {
        tracing::warn!(
            platform = %platform::current_platform(),
            "code signing only applies to {}; skipping",
            platform::TARGET_PLATFORM
        );
        return Ok(());
    }

    match cli.command {
        Some(Commands::Scan { root, json }) => run_scan(&config, root, json).await,
        Some(Commands::Sign {
            root,
            tool,
            dry_run,
        }) => run_sign(config, root, tool, dry_run).await,
        Some(Commands::ListRules) => Ok(()),
        None => run_sign(config, None, None, false).await,
    }
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_root(config: &Config, root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| config.root.clone())
}

async fn run_scan(config: &Config, root: Option<PathBuf>, json: bool) -> Result<()> {
    let root = resolve_root(config, root);
    let report = ScanOrchestrator::from_config(config, Vec::new())
        .scan(&root)
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    if json {
        let binaries: Vec<String> = report
            .binaries
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let out = serde_json::json!({
            "root": report.root.display().to_string(),
            "files_seen": report.files_seen,
            "binaries": binaries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for path in &report.binaries {
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn run_sign(
    mut config: Config,
    root: Option<PathBuf>,
    tool: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let root = resolve_root(&config, root);
    if let Some(tool) = tool {
        config.signer.tool = tool;
    }

    let signer = CommandSigner::new(&config.signer);
    let exclude: Vec<PathBuf> = signer.tool_path().map(Path::to_path_buf).into_iter().collect();

    let report = ScanOrchestrator::from_config(&config, exclude)
        .scan(&root)
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    if report.binaries.is_empty() {
        tracing::info!("no binaries need signing");
        return Ok(());
    }

    let progress = ProgressReporter::for_signing(report.binaries.len() as u64);
    let worker_progress = progress.clone();
    let binaries = report.binaries;

    let signing = tokio::task::spawn_blocking(move || {
        let progress_cb = |current: usize, _total: usize| worker_progress.set_position(current);
        sign_all(&signer, &binaries, dry_run, Some(&progress_cb))
    })
    .await
    .context("Signing pass panicked")?;

    progress.finish(&format!(
        "{} signed, {} already signed, {} failed",
        signing.signed.len(),
        signing.already_signed.len(),
        signing.failed.len()
    ));

    if dry_run {
        for path in &signing.pending {
            println!("unsigned: {}", path.display());
        }
    }

    if !signing.failed.is_empty() {
        for (path, error) in &signing.failed {
            eprintln!("Failed to sign {}: {}", path.display(), error);
        }
        anyhow::bail!("{} binaries could not be signed", signing.failed.len());
    }

    Ok(())
}

fn print_rules(config: &Config) {
    let classifier = &config.classifier;
    let join = |items: Vec<&str>| items.join(" ");

    println!(
        "text extensions: {}",
        join(classifier.effective_text_extensions().collect())
    );
    println!(
        "text basenames:  {}",
        join(classifier.effective_text_basenames().collect())
    );
    println!(
        "ELF extensions:  {}",
        join(classifier.effective_elf_extensions().collect())
    );
    println!("max concurrency: {}", config.max_concurrency);
}
