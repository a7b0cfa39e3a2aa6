//! mindplan - Main Entry Point
//!
//! Thin command line over the `mindplan` library.

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use mindplan::formatting::{format_issues, format_save_report, format_validation, render_tree};
use mindplan::plan::ids::assign_missing_ids;
use mindplan::{FileStore, FsStore, PlanConfig, codec, resolve, split_save, validation};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// mindplan - compose, check and rewrite multi-file project plans
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a plan and print it as a tree
    Show {
        /// Root plan file
        root: PathBuf,
    },
    /// Resolve a plan and report errors and warnings
    Validate {
        /// Root plan file
        root: PathBuf,
    },
    /// Rewrite every file of a plan in canonical form
    Normalize {
        /// Root plan file
        root: PathBuf,
    },
    /// Give every node without an id a fresh UUID
    AssignIds {
        /// Plan file to update in place
        file: PathBuf,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "mindplan=info".into()),
    );
    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let Some(command) = args.command else {
        let mut cmd = Args::command();
        cmd.print_help().ok();
        println!();
        return Ok(ExitCode::from(2));
    };

    init_tracing();
    let config = match &args.config {
        Some(path) => PlanConfig::load(path)?,
        None => PlanConfig::default(),
    };
    let store = FsStore::new();

    match command {
        Command::Show { root } => show(&store, &root, &config).await,
        Command::Validate { root } => validate_plan(&store, &root, &config).await,
        Command::Normalize { root } => normalize(&store, &root, &config).await,
        Command::AssignIds { file } => assign_ids(&store, &file).await,
    }
}

async fn show(store: &dyn FileStore, root: &Path, config: &PlanConfig) -> Result<ExitCode> {
    let resolution = resolve(store, root, config).await;
    print!("{}", render_tree(&resolution.document, Some(&resolution.provenance)));
    eprint!("{}", format_issues("Errors", &resolution.errors));
    eprint!("{}", format_issues("Warnings", &resolution.warnings));
    Ok(if resolution.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn validate_plan(store: &dyn FileStore, root: &Path, config: &PlanConfig) -> Result<ExitCode> {
    let resolution = resolve(store, root, config).await;
    let mut report = validation::validate_with(&resolution.document, None, &config.validation_options());
    report.files_processed = resolution.files_loaded();
    print!("{}", format_validation(root, &report));
    print!("{}", format_issues("Load errors", &resolution.errors));
    print!("{}", format_issues("Load warnings", &resolution.warnings));
    Ok(if report.valid && resolution.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn normalize(store: &dyn FileStore, root: &Path, config: &PlanConfig) -> Result<ExitCode> {
    let resolution = resolve(store, root, config).await;
    if !resolution.errors.is_empty() {
        eprint!("{}", format_issues("Errors", &resolution.errors));
        bail!("{} could not be loaded cleanly; nothing was written", root.display());
    }
    let report = split_save(store, &resolution.document, &resolution.provenance, config).await;
    print!("{}", format_save_report(&report));
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn assign_ids(store: &dyn FileStore, file: &Path) -> Result<ExitCode> {
    let text = store
        .read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut document = codec::decode_file(file, &text)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let assigned = assign_missing_ids(&mut document);
    if assigned > 0 {
        let content = codec::encode_file(file, &document)?;
        store
            .write(file, &content)
            .await
            .with_context(|| format!("failed to write {}", file.display()))?;
    }
    println!("Assigned {} new id(s) in {}", assigned, file.display());
    Ok(ExitCode::SUCCESS)
}
