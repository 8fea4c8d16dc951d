use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
const DEFAULT_MAX_RETRIES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    AzureOpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::AzureOpenAi => "azure",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "azure" | "azure_openai" | "azure-openai" => Some(LlmProvider::AzureOpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

/// Connection settings for one chat model. Built by the caller; nothing here
/// reads the environment.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub deployment: Option<String>,
    pub max_retries: usize,
}

impl LlmSettings {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            base_url: None,
            api_version: None,
            deployment: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    max_retries: usize,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Azure(AzureConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AzureConfig {
    api_key: String,
    base_url: String,
    api_version: String,
    deployment: String,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let config = match settings.provider {
            LlmProvider::OpenAi => {
                let api_key = required(&settings.api_key, "OpenAI api key")?;
                validate_openai_key(&api_key)?;
                ProviderConfig::OpenAi(OpenAiConfig {
                    api_key,
                    base_url: settings
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                })
            }
            LlmProvider::AzureOpenAi => ProviderConfig::Azure(AzureConfig {
                api_key: required(&settings.api_key, "Azure api key")?,
                base_url: required(&settings.base_url, "Azure api base")?,
                api_version: settings
                    .api_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                deployment: settings
                    .deployment
                    .clone()
                    .unwrap_or_else(|| settings.model.clone()),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider: settings.provider,
            model: settings.model.clone(),
            max_retries: settings.max_retries,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => {
                let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
                let payload = chat_payload(Some(&self.model), req);
                self.send_chat("openai", &payload, || {
                    self.http.post(&url).bearer_auth(&cfg.api_key)
                })
                .await
            }
            ProviderConfig::Azure(cfg) => {
                let url = azure_url(cfg);
                let payload = chat_payload(None, req);
                self.send_chat("azure openai", &payload, || {
                    self.http.post(&url).header("api-key", &cfg.api_key)
                })
                .await
            }
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn send_chat<F>(&self, label: &str, payload: &Value, request: F) -> Result<LlmResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match request().json(payload).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err).with_context(|| format!("{label} request failed"));
                    }
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(anyhow!(
                        "{label} rate limited after {} retries",
                        self.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                sleep(wait).await;
                continue;
            }
            let value = decode_body(label, response).await?;
            let content = extract_openai_text(&value)
                .ok_or_else(|| anyhow!("missing text in {label} response"))?;
            let usage: OpenAiUsage = value
                .get("usage")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default();
            return Ok(LlmResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        let content = synthesize_local_response(req);
        LlmResponse {
            content,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

fn required(value: &Option<String>, what: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(anyhow!("{what} is not set")),
    }
}

fn validate_openai_key(value: &str) -> Result<()> {
    if !value.starts_with("sk-") {
        return Err(anyhow!(
            "OpenAI api key must start with 'sk-' (see https://platform.openai.com/)"
        ));
    }
    Ok(())
}

fn azure_url(cfg: &AzureConfig) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        cfg.base_url.trim_end_matches('/'),
        cfg.deployment,
        cfg.api_version
    )
}

fn chat_payload(model: Option<&str>, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({"role": "system", "content": system }));
    }
    messages.push(json!({"role": "user", "content": req.user }));
    let mut payload = json!({ "messages": messages });
    if let Some(model) = model {
        payload["model"] = json!(model);
    }
    payload
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

const REFERENCE_MARKER: &str = "Reference answer:";
const GENERATED_MARKER: &str = "AI generated answer:";

/// Offline stand-in for a chat model. Grading prompts get a word-overlap
/// grade; anything else is echoed back in short form.
fn synthesize_local_response(req: &LlmRequest) -> String {
    if req.user.contains(REFERENCE_MARKER) && req.user.contains(GENERATED_MARKER) {
        let reference = extract_context_block(&req.user, REFERENCE_MARKER, GENERATED_MARKER);
        let generated = extract_context_block(&req.user, GENERATED_MARKER, "\u{0}");
        return overlap_grade(&reference, &generated).to_string();
    }
    summarize_text(&req.user, 40)
}

fn overlap_grade(reference: &str, generated: &str) -> u32 {
    let words = |text: &str| -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    let reference = words(reference);
    if reference.is_empty() {
        return 0;
    }
    let generated = words(generated);
    let shared = reference.intersection(&generated).count();
    ((shared * 100) as f64 / reference.len() as f64).round() as u32
}

async fn decode_body(label: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!("{label} returned error (status {status}): {body}"));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {label} response"))
}

fn extract_context_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}
