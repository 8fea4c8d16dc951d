use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ragkit_core::{
    project_path, BatchSettings, FileResultCache, LlmScorer, SearchEngine,
    DEFAULT_COMMUNITY_LEVEL, DEFAULT_RESPONSE_TYPE,
};
use ragkit_llm::{LlmClient, LlmProvider, LlmSettings};

use crate::{CommandSearchEngine, HttpSearchEngine};

pub const DEFAULT_PROJECTS_ROOT: &str = "./projects";
pub const DEFAULT_CACHE_DIR: &str = "./cache";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "http://127.0.0.1:8010";
pub const DEFAULT_SEARCH_COMMAND: &str = "graphrag-query";
pub const DEFAULT_SCORE_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchBackend {
    Http {
        endpoint: String,
        api_key: Option<String>,
        timeout: Option<Duration>,
    },
    Command {
        program: PathBuf,
    },
}

/// Process-wide settings, read once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub projects_root: PathBuf,
    pub cache_dir: PathBuf,
    pub search: SearchBackend,
    pub community_level: u32,
    pub response_type: String,
    pub scorer: LlmSettings,
    pub verbose: bool,
    pub bind_addr: String,
    /// Largest request body the service accepts on upload routes.
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend_name = var("RAGKIT_SEARCH_BACKEND").unwrap_or_else(|| "http".to_string());
        let search = match backend_name.trim().to_lowercase().as_str() {
            "http" => SearchBackend::Http {
                endpoint: var("RAGKIT_SEARCH_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
                api_key: var("RAGKIT_SEARCH_API_KEY"),
                timeout: var("RAGKIT_SEARCH_TIMEOUT_SECS")
                    .map(|raw| {
                        raw.trim()
                            .parse::<u64>()
                            .map(Duration::from_secs)
                            .with_context(|| format!("invalid RAGKIT_SEARCH_TIMEOUT_SECS {raw:?}"))
                    })
                    .transpose()?,
            },
            "command" => SearchBackend::Command {
                program: var("RAGKIT_SEARCH_COMMAND")
                    .unwrap_or_else(|| DEFAULT_SEARCH_COMMAND.to_string())
                    .into(),
            },
            other => return Err(anyhow!("unknown search backend {other}")),
        };

        let community_level = match var("RAGKIT_COMMUNITY_LEVEL") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid RAGKIT_COMMUNITY_LEVEL {raw:?}"))?,
            None => DEFAULT_COMMUNITY_LEVEL,
        };

        let max_upload_mb = match var("RAGKIT_MAX_UPLOAD_MB") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|mb| *mb > 0)
                .ok_or_else(|| anyhow!("invalid RAGKIT_MAX_UPLOAD_MB {raw:?}"))?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        let provider_name = var("RAGKIT_SCORE_PROVIDER").unwrap_or_else(|| "azure".to_string());
        let provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!("unknown score provider {provider_name}"))?;
        let mut scorer = LlmSettings::new(
            provider,
            var("RAGKIT_SCORE_MODEL").unwrap_or_else(|| DEFAULT_SCORE_MODEL.to_string()),
        );
        // One request per grade.
        scorer.max_retries = 0;
        match provider {
            LlmProvider::AzureOpenAi => {
                scorer.api_key = var("AZURE_API_KEY");
                scorer.base_url = var("AZURE_API_BASE");
                scorer.api_version = var("AZURE_API_VERSION");
                scorer.deployment = var("AZURE_CHAT_DEPLOYMENT_NAME");
            }
            LlmProvider::OpenAi => {
                scorer.api_key = var("OPENAI_API_KEY");
                scorer.base_url = var("OPENAI_BASE_URL");
            }
            LlmProvider::Local => {}
        }

        Ok(Self {
            projects_root: var("RAGKIT_PROJECTS_ROOT")
                .unwrap_or_else(|| DEFAULT_PROJECTS_ROOT.to_string())
                .into(),
            cache_dir: var("RAGKIT_CACHE_DIR")
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string())
                .into(),
            search,
            community_level,
            response_type: var("RAGKIT_RESPONSE_TYPE")
                .unwrap_or_else(|| DEFAULT_RESPONSE_TYPE.to_string()),
            scorer,
            verbose: var("RAGKIT_VERBOSE")
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn search_engine(&self) -> Result<Box<dyn SearchEngine>> {
        let engine: Box<dyn SearchEngine> = match &self.search {
            SearchBackend::Http {
                endpoint,
                api_key,
                timeout,
            } => Box::new(HttpSearchEngine::new(
                endpoint.clone(),
                api_key.clone(),
                *timeout,
            )?),
            SearchBackend::Command { program } => {
                Box::new(CommandSearchEngine::new(program.clone()))
            }
        };
        Ok(engine)
    }

    pub fn cache(&self) -> FileResultCache {
        FileResultCache::new(&self.cache_dir)
    }

    pub fn scorer(&self) -> Result<LlmScorer> {
        let client = LlmClient::new(&self.scorer).context("scorer is not configured")?;
        LlmScorer::new(client)
    }

    /// Batch settings for `project` with the configured defaults. The project
    /// directory must exist under the projects root.
    pub fn batch_settings(&self, project: &str) -> Result<BatchSettings> {
        let root = project_path(&self.projects_root, project)?;
        let mut settings = BatchSettings::new(project.trim(), root);
        settings.community_level = self.community_level;
        settings.response_type = self.response_type.clone();
        Ok(settings)
    }
}

pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
