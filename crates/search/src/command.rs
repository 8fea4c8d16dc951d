use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use ragkit_core::{SearchEngine, SearchRequest, SearchResult};
use tracing::debug;

/// Runs an external query program per search and reads one JSON object
/// `{response, context_data}` from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSearchEngine {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl CommandSearchEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the generated search flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, request: &SearchRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("--root")
            .arg(request.root_dir)
            .arg("--method")
            .arg(request.method.as_str())
            .arg("--query")
            .arg(request.query)
            .arg("--community-level")
            .arg(request.community_level.to_string())
            .arg("--response-type")
            .arg(request.response_type);
        if request.dynamic_community_selection {
            cmd.arg("--dynamic-community-selection");
        }
        cmd
    }
}

impl SearchEngine for CommandSearchEngine {
    fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        debug!(program = %self.program.display(), method = request.method.as_str(), "search command");
        let output = self
            .command(request)
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            ));
        }
        serde_json::from_slice(&output.stdout).with_context(|| {
            format!(
                "{} printed something other than a search result",
                self.program.display()
            )
        })
    }
}
