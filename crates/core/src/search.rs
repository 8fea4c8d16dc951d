use std::path::Path;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_RESPONSE_TYPE: &str = "Multiple Paragraphs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    Local,
    Global,
    Drift,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Local => "local",
            SearchMethod::Global => "global",
            SearchMethod::Drift => "drift",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(SearchMethod::Local),
            "global" => Some(SearchMethod::Global),
            "drift" => Some(SearchMethod::Drift),
            _ => None,
        }
    }
}

/// Arguments handed to the external search engine. Streaming is never
/// requested.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub method: SearchMethod,
    pub root_dir: &'a Path,
    pub query: &'a str,
    pub community_level: u32,
    pub response_type: &'a str,
    pub dynamic_community_selection: bool,
}

impl SearchRequest<'_> {
    pub fn streaming(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub response: String,
    #[serde(default)]
    pub context_data: Value,
}

pub trait SearchEngine {
    fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResult>;
}

impl<F> SearchEngine for F
where
    F: Fn(&SearchRequest<'_>) -> Result<SearchResult>,
{
    fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        self(request)
    }
}

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[Data:[^\]]*\]").expect("citation pattern"));

/// Strips the `[Data: Reports (1, 2); Entities (5)]` evidence annotations the
/// search engine appends to its sentences, leaving the prose that a reader
/// sees.
pub fn extract_real_text(response: &str) -> String {
    CITATION.replace_all(response, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_real_text_drops_citations() {
        let raw = "Acme was founded in 1990 [Data: Reports (1, 2); Entities (5, +more)].\n\nIt sells anvils [Data: Sources (3)]. ";
        assert_eq!(
            extract_real_text(raw),
            "Acme was founded in 1990.\n\nIt sells anvils."
        );
    }

    #[test]
    fn extract_real_text_keeps_plain_text() {
        assert_eq!(extract_real_text("  plain answer "), "plain answer");
        assert_eq!(extract_real_text(""), "");
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!(SearchMethod::from_str("DRIFT"), Some(SearchMethod::Drift));
        assert_eq!(SearchMethod::from_str(" global "), Some(SearchMethod::Global));
        assert_eq!(SearchMethod::from_str("basic"), None);
        assert_eq!(SearchMethod::default().as_str(), "local");
    }

    #[test]
    fn closures_act_as_engines() {
        let engine = |req: &SearchRequest<'_>| -> Result<SearchResult> {
            Ok(SearchResult {
                response: format!("{}:{}", req.method.as_str(), req.query),
                context_data: Value::Null,
            })
        };
        let req = SearchRequest {
            method: SearchMethod::Global,
            root_dir: Path::new("/projects/demo"),
            query: "q",
            community_level: 2,
            response_type: DEFAULT_RESPONSE_TYPE,
            dynamic_community_selection: false,
        };
        assert!(!req.streaming());
        assert_eq!(engine.search(&req).unwrap().response, "global:q");
    }
}
