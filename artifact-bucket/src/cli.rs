/// # artifact-bucket CLI Interface (Module)
///
/// Command parsing and orchestration glue for the `artifact-bucket` binary.
/// All synchronisation logic lives in `artifact-bucket-core`; this module
/// only loads configuration, builds the store, drives one release pipeline
/// and prints its per-target report.
///
/// ## Subcommands
/// - `upload-maven` / `delete-maven`: a Maven-layout release directory
/// - `upload-npm` / `delete-npm`: one npm tarball plus its `package.json`
///
/// Every subcommand takes `--dry-run`, which runs the whole pipeline
/// against an in-process store instead of S3.
///
/// ## Exit status
/// [`run`] returns an error when any target reports a failed artifact or
/// metadata key, so the process exits non-zero.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use artifact_bucket_core::contract::RemoteStore;
use artifact_bucket_core::maven::release::{delete_maven, upload_maven};
use artifact_bucket_core::memory_store::InMemoryStore;
use artifact_bucket_core::npm::release::{delete_npm, upload_npm, NpmPackage};
use artifact_bucket_core::sync::SyncEngine;
use artifact_bucket_core::synchronise::SynchroniseReport;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::load_config::{load_config, CliConfig};
use crate::s3_store::S3Store;

/// CLI for artifact-bucket: publish and roll back releases in shared buckets.
#[derive(Parser)]
#[clap(
    name = "artifact-bucket",
    version,
    about = "Synchronise Maven and npm releases into reference-counted S3 buckets"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a Maven release directory and regenerate its metadata
    UploadMaven {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Product owning the uploaded files
        #[clap(long)]
        product: String,
        /// Release directory laid out as a Maven repository
        #[clap(long)]
        root: PathBuf,
        /// Run against an in-memory store
        #[clap(long)]
        dry_run: bool,
    },
    /// Remove a product's Maven release and regenerate metadata
    DeleteMaven {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        product: String,
        #[clap(long)]
        root: PathBuf,
        #[clap(long)]
        dry_run: bool,
    },
    /// Publish one npm package version
    UploadNpm {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        product: String,
        /// Package tarball (`.tgz`)
        #[clap(long)]
        tarball: PathBuf,
        /// The `package.json` shipped inside the tarball
        #[clap(long)]
        package_json: PathBuf,
        #[clap(long)]
        dry_run: bool,
    },
    /// Remove a product's npm package version
    DeleteNpm {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        product: String,
        #[clap(long)]
        tarball: PathBuf,
        #[clap(long)]
        package_json: PathBuf,
        #[clap(long)]
        dry_run: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let (command, report) = match cli.command {
        Commands::UploadMaven {
            config,
            product,
            root,
            dry_run,
        } => {
            let config = load_config(config)?;
            let engine = build_engine(&config, dry_run).await?;
            let files = collect_files(&root)?;
            let report = upload_maven(
                &engine,
                &files,
                &root,
                &product,
                &config.targets,
                &config.ignore()?,
                chrono::Utc::now(),
            )
            .await;
            ("upload-maven", report)
        }
        Commands::DeleteMaven {
            config,
            product,
            root,
            dry_run,
        } => {
            let config = load_config(config)?;
            let engine = build_engine(&config, dry_run).await?;
            let files = collect_files(&root)?;
            let report = delete_maven(
                &engine,
                &files,
                &root,
                &product,
                &config.targets,
                &config.ignore()?,
                chrono::Utc::now(),
            )
            .await;
            ("delete-maven", report)
        }
        Commands::UploadNpm {
            config,
            product,
            tarball,
            package_json,
            dry_run,
        } => {
            let config = load_config(config)?;
            let package = load_package(tarball, &package_json).await?;
            let engine = build_engine(&config, dry_run).await?;
            let report = upload_npm(&engine, &package, &product, &config.targets).await;
            ("upload-npm", report)
        }
        Commands::DeleteNpm {
            config,
            product,
            tarball,
            package_json,
            dry_run,
        } => {
            let config = load_config(config)?;
            let package = load_package(tarball, &package_json).await?;
            let engine = build_engine(&config, dry_run).await?;
            let report = delete_npm(&engine, &package, &product, &config.targets).await;
            ("delete-npm", report)
        }
    };

    print_report(command, &report);
    if report.is_success() {
        info!(command, "Release synchronised on every target");
        Ok(())
    } else {
        error!(command, "Release finished with failures");
        Err(anyhow::anyhow!("{command} finished with failures, see report above"))
    }
}

async fn build_engine(config: &CliConfig, dry_run: bool) -> Result<SyncEngine<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = if dry_run {
        warn!("Dry run: synchronising into an in-memory store, no bucket is touched");
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(
            S3Store::connect(&config.s3_settings())
                .await
                .context("Failed to configure S3 client")?,
        )
    };
    Ok(SyncEngine::new(store, config.sync.clone()))
}

async fn load_package(tarball: PathBuf, package_json: &Path) -> Result<NpmPackage> {
    if !tarball.is_file() {
        anyhow::bail!("Tarball {} does not exist", tarball.display());
    }
    NpmPackage::load(tarball, package_json)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", package_json.display()))
}

/// Every regular file under `root`, sorted.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Release root {} is not a directory", root.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    info!(root = %root.display(), files = files.len(), "Collected release files");
    Ok(files)
}

fn print_report(command: &str, report: &SynchroniseReport) {
    println!("{command} report:");
    for target in &report.targets {
        let status = if target.is_success() { "ok" } else { "FAILED" };
        println!(
            "  [{status}] {}: {} synced, {} metadata changed, {} failed artifacts, {} failed metadata",
            target.target,
            target.synced.len(),
            target.changed_metadata.len(),
            target.failed_artifacts.len(),
            target.failed_metadata.len(),
        );
        for key in &target.failed_artifacts {
            println!("    failed artifact: {key}");
        }
        for key in &target.failed_metadata {
            println!("    failed metadata: {key}");
        }
        for path in &target.invalidation_paths {
            println!("    invalidate: {path}");
        }
    }
}
