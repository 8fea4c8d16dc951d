use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_yaml::from_str;
use tracing::info;

use crate::commands::{self, BatchArgs, DEFAULT_OUTPUT_DIR};
use ragkit_search::AppConfig;

/// A YAML run file: one project, several input workbooks.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub project: String,
    #[serde(default)]
    pub community_level: Option<u32>,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub score: bool,
    pub inputs: Vec<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

pub fn run_from_config(config: &AppConfig, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read run config {}", path.display()))?;
    let cfg: RunConfig = from_str(&raw).context("invalid ragkit run config")?;
    let reports = run_pipeline(cfg, |args| commands::batch(config, args))?;
    for report in reports {
        println!("{}", report.display());
    }
    Ok(())
}

fn run_pipeline<FBatch>(cfg: RunConfig, batch_fn: FBatch) -> Result<Vec<PathBuf>>
where
    FBatch: Fn(BatchArgs) -> Result<PathBuf>,
{
    if cfg.inputs.is_empty() {
        return Err(anyhow!("run config must declare at least one input"));
    }
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("failed to create {}", cfg.output_dir.display()))?;
    let mut reports = Vec::with_capacity(cfg.inputs.len());
    for (idx, input) in cfg.inputs.iter().enumerate() {
        info!(
            "run input {}/{}: {}",
            idx + 1,
            cfg.inputs.len(),
            input.display()
        );
        let name = input
            .file_name()
            .ok_or_else(|| anyhow!("input {} has no file name", input.display()))?;
        reports.push(batch_fn(BatchArgs {
            input: input.clone(),
            project: cfg.project.clone(),
            community_level: cfg.community_level,
            response_type: cfg.response_type.clone(),
            score: cfg.score,
            output: Some(cfg.output_dir.join(name)),
        })?);
    }
    Ok(reports)
}
