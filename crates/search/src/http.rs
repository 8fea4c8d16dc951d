use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ragkit_core::{SearchEngine, SearchRequest, SearchResult};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Talks to a GraphRAG query server over HTTP: `POST {endpoint}/search/{method}`.
#[derive(Clone)]
pub struct HttpSearchEngine {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchEngine {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build search http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, request: &SearchRequest<'_>) -> String {
        format!(
            "{}/search/{}",
            self.endpoint.trim_end_matches('/'),
            request.method.as_str()
        )
    }
}

pub(crate) fn request_body(request: &SearchRequest<'_>) -> Value {
    json!({
        "root_dir": request.root_dir.to_string_lossy(),
        "query": request.query,
        "community_level": request.community_level,
        "response_type": request.response_type,
        "streaming": request.streaming(),
        "dynamic_community_selection": request.dynamic_community_selection,
    })
}

impl SearchEngine for HttpSearchEngine {
    fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        let url = self.url(request);
        debug!(url = %url, "search request");
        let mut builder = self.http.post(&url).json(&request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .with_context(|| format!("search request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("search engine returned {status}: {body}"));
        }
        response
            .json::<SearchResult>()
            .context("failed to decode search response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkit_core::SearchMethod;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;

    fn request<'a>(root: &'a Path, method: SearchMethod) -> SearchRequest<'a> {
        SearchRequest {
            method,
            root_dir: root,
            query: "who founded acme?",
            community_level: 2,
            response_type: "Multiple Paragraphs",
            dynamic_community_selection: false,
        }
    }

    /// Serves one canned response and hands the raw request back to the test.
    fn serve_once(status: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                let done = line == "\r\n";
                head.push_str(&line);
                if done {
                    break;
                }
            }
            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).unwrap();
            head.push_str(&String::from_utf8_lossy(&payload));
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            tx.send(head).unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn body_carries_every_parameter() {
        let body = request_body(&request(Path::new("/projects/demo"), SearchMethod::Local));
        assert_eq!(body["root_dir"], "/projects/demo");
        assert_eq!(body["community_level"], 2);
        assert_eq!(body["response_type"], "Multiple Paragraphs");
        assert_eq!(body["streaming"], false);
        assert_eq!(body["dynamic_community_selection"], false);
    }

    #[test]
    fn posts_to_method_route_and_parses_result() {
        let (endpoint, rx) = serve_once(
            "200 OK",
            r#"{"response": "Acme was founded by Wile.", "context_data": {"reports": []}}"#,
        );
        let engine =
            HttpSearchEngine::new(format!("{endpoint}/"), Some("token".into()), None).unwrap();
        let result = engine
            .search(&request(Path::new("/projects/demo"), SearchMethod::Drift))
            .unwrap();
        assert_eq!(result.response, "Acme was founded by Wile.");
        assert_eq!(result.context_data, json!({"reports": []}));
        let raw = rx.recv().unwrap();
        assert!(raw.starts_with("POST /search/drift HTTP/1.1"));
        assert!(raw.to_lowercase().contains("authorization: bearer token"));
        assert!(raw.contains("who founded acme?"));
    }

    #[test]
    fn error_status_becomes_error() {
        let (endpoint, _rx) = serve_once("500 Internal Server Error", r#"{"detail": "index missing"}"#);
        let engine = HttpSearchEngine::new(endpoint, None, None).unwrap();
        let err = engine
            .search(&request(Path::new("/p"), SearchMethod::Local))
            .unwrap_err();
        assert!(err.to_string().contains("index missing"));
    }
}
