use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use nomad_sync::config::global_config_path;
use nomad_sync::SyncConfig;
use serde::Serialize;

use super::Context;
use crate::output;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print where the configuration file lives
    Path,
    /// Write a default configuration file if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check that every URL is well-formed and secure
    Validate,
}

#[derive(Debug, Serialize)]
struct PathReport {
    path: PathBuf,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    path: PathBuf,
    written: bool,
}

pub fn run(args: ConfigArgs, context: &Context) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = context.load_config()?;
            output::print_output(context.format, &config, |config| {
                toml::to_string_pretty(config).unwrap_or_else(|error| error.to_string())
            })?;
        }
        ConfigAction::Path => {
            let path = config_path(context)?;
            let report = PathReport { exists: path.exists(), path };
            output::print_output(context.format, &report, |report| {
                report.path.display().to_string()
            })?;
        }
        ConfigAction::Init { force } => {
            let path = config_path(context)?;
            let report = init(path, force)?;
            output::print_output(context.format, &report, |report| {
                if report.written {
                    format!("wrote {}", report.path.display())
                } else {
                    format!("{} already exists (use --force to overwrite)", report.path.display())
                }
            })?;
        }
        ConfigAction::Validate => {
            let config = context.load_config()?;
            config.validate()?;
            output::print_output(context.format, &serde_json::json!({ "valid": true }), |_| {
                "configuration is valid".to_string()
            })?;
        }
    }
    Ok(())
}

fn config_path(context: &Context) -> Result<PathBuf> {
    match &context.config_path {
        Some(path) => Ok(path.clone()),
        None => global_config_path().context("could not determine home directory"),
    }
}

fn init(path: PathBuf, force: bool) -> Result<InitReport> {
    if path.exists() && !force {
        return Ok(InitReport { path, written: false });
    }
    SyncConfig::default()
        .save_to(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(InitReport { path, written: true })
}
