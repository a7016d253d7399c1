/// `load_config` module: loads the static YAML config and applies environment overrides.
///
/// This is the only place where untrusted YAML is parsed and mapped to the
/// strongly-typed structs of `artifact-bucket-core`.
///
/// # Responsibilities
/// - Parse the YAML file into [`CliConfig`] (targets, ignore patterns, engine tunables, store endpoint)
/// - Apply `ARTIFACT_BUCKET_ENDPOINT` / `ARTIFACT_BUCKET_REGION` over the file values
/// - Validate before anything touches a bucket: at least one target, unique
///   target names, concurrency of at least one, compilable ignore patterns
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary.
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use artifact_bucket_core::config::{SyncConfig, Target};
use artifact_bucket_core::synchronise::IgnorePatterns;
use serde::Deserialize;
use tracing::{error, info};

use crate::s3_store::S3Settings;

pub const ENDPOINT_ENV: &str = "ARTIFACT_BUCKET_ENDPOINT";
pub const REGION_ENV: &str = "ARTIFACT_BUCKET_REGION";

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Ordered; the first target is the main one.
    pub targets: Vec<Target>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(flatten)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CliConfig {
    pub fn ignore(&self) -> Result<IgnorePatterns> {
        IgnorePatterns::compile(&self.ignore_patterns).context("Invalid ignore pattern")
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            max_retries: self.max_retries,
            timeout_ms: self.timeout_ms,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("Config must declare at least one target");
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                bail!("Target with bucket '{}' has an empty name", target.bucket);
            }
            if target.bucket.trim().is_empty() {
                bail!("Target '{}' has an empty bucket", target.name);
            }
            if !names.insert(target.name.as_str()) {
                bail!("Duplicate target name '{}'", target.name);
            }
        }
        if self.sync.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.sync.hash_workers == 0 {
            bail!("hash_workers must be at least 1");
        }
        self.ignore()?;
        Ok(())
    }
}

/// Loads the YAML config at `path`, applies environment overrides and validates it.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
        info!(endpoint = %endpoint, "{ENDPOINT_ENV} found in env, overriding endpoint");
        config.endpoint = Some(endpoint);
    }
    if let Ok(region) = std::env::var(REGION_ENV) {
        info!(region = %region, "{REGION_ENV} found in env, overriding region");
        config.region = Some(region);
    }

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Config failed validation");
        return Err(e);
    }

    for target in &config.targets {
        target.trace_loaded();
    }
    config.sync.trace_loaded();
    info!(
        targets = config.targets.len(),
        ignore_patterns = config.ignore_patterns.len(),
        "Config loaded and validated successfully"
    );
    Ok(config)
}
