use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ragkit_core::{
    context_json, list_projects, read_workbook_path, run_batch, write_report, LlmScorer,
    Scorer, SearchEngine, SearchMethod, SearchRequest,
};
use ragkit_search::AppConfig;
use tracing::{info, warn};

pub const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone, PartialEq)]
pub struct BatchArgs {
    pub input: PathBuf,
    pub project: String,
    pub community_level: Option<u32>,
    pub response_type: Option<String>,
    pub score: bool,
    pub output: Option<PathBuf>,
}

/// Report path: explicit output, else the input's file name under `output/`.
pub fn report_path(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }
    let name = input
        .file_name()
        .ok_or_else(|| anyhow!("input {} has no file name", input.display()))?;
    Ok(Path::new(DEFAULT_OUTPUT_DIR).join(name))
}

pub fn batch(config: &AppConfig, args: BatchArgs) -> Result<PathBuf> {
    let sheets = read_workbook_path(&args.input)
        .with_context(|| format!("failed to read workbook {}", args.input.display()))?;
    let mut settings = config.batch_settings(&args.project)?;
    if let Some(level) = args.community_level {
        settings.community_level = level;
    }
    if let Some(response_type) = args.response_type {
        settings.response_type = response_type;
    }
    settings.score = args.score;

    let engine = config.search_engine()?;
    let cache = config.cache();
    let scorer: Option<LlmScorer> = if settings.score {
        Some(config.scorer()?)
    } else {
        None
    };
    info!(
        input = %args.input.display(),
        sheets = sheets.len(),
        rows = sheets.total_rows(),
        project = %settings.project,
        "starting batch"
    );
    let outcome = run_batch(
        sheets,
        &settings,
        engine.as_ref(),
        &cache,
        scorer.as_ref().map(|s| s as &dyn Scorer),
    )?;
    for warning in &outcome.warnings {
        warn!("{warning}");
    }
    let path = report_path(&args.input, args.output.as_deref())?;
    write_report(&path, &outcome.sheets)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    info!(
        report = %path.display(),
        rows = outcome.stats.rows,
        cache_hits = outcome.stats.cache_hits,
        cache_misses = outcome.stats.cache_misses,
        scored = outcome.stats.scored,
        warnings = outcome.warnings.len(),
        "batch finished"
    );
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub text: String,
    pub project: String,
    pub method: String,
    pub community_level: Option<u32>,
    pub response_type: Option<String>,
    pub dynamic_community_selection: bool,
    pub context: bool,
}

pub fn query(config: &AppConfig, args: QueryArgs) -> Result<()> {
    let method = SearchMethod::from_str(&args.method)
        .ok_or_else(|| anyhow!("unknown search method {}", args.method))?;
    let settings = config.batch_settings(&args.project)?;
    let response_type = args.response_type.unwrap_or(settings.response_type);
    let request = SearchRequest {
        method,
        root_dir: &settings.project_root,
        query: &args.text,
        community_level: args.community_level.unwrap_or(settings.community_level),
        response_type: &response_type,
        dynamic_community_selection: args.dynamic_community_selection,
    };
    let result = config.search_engine()?.search(&request)?;
    println!("{}", result.response);
    if args.context {
        println!("{}", context_json(&result.context_data));
    }
    Ok(())
}

pub fn score(config: &AppConfig, query: &str, reference: &str, generated: &str) -> Result<()> {
    let scorer = config.scorer()?;
    let grade = scorer.score(query, reference, generated)?;
    println!("{grade}");
    Ok(())
}

pub fn projects(config: &AppConfig) -> Result<()> {
    for name in list_projects(&config.projects_root)? {
        println!("{name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkit_core::{export, CellValue, QueryRow, Sheet};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn report_path_defaults_to_output_dir() {
        let path = report_path(Path::new("/data/questions.xlsx"), None).unwrap();
        assert_eq!(path, PathBuf::from("output/questions.xlsx"));
        let explicit = report_path(Path::new("q.xlsx"), Some(Path::new("/tmp/r.xlsx"))).unwrap();
        assert_eq!(explicit, PathBuf::from("/tmp/r.xlsx"));
    }

    #[cfg(unix)]
    #[test]
    fn batch_runs_command_backend_end_to_end() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("projects/demo")).unwrap();
        let script = dir.path().join("fake-query.sh");
        fs::write(
            &script,
            "#!/bin/sh\nprintf '{\"response\": \"resp-%s\", \"context_data\": {}}' \"$6\"\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let sheet = Sheet::from_rows(
            "Sheet1",
            vec![
                [("query", "a")].into_iter().collect::<QueryRow>(),
                [("query", "b"), ("answer", "x")].into_iter().collect(),
            ],
        );
        let input = dir.path().join("questions.xlsx");
        fs::write(&input, export(&[sheet].into_iter().collect()).unwrap()).unwrap();

        let root = dir.path().join("projects").to_string_lossy().into_owned();
        let cache = dir.path().join("cache").to_string_lossy().into_owned();
        let program = script.to_string_lossy().into_owned();
        let vars = [
            ("RAGKIT_PROJECTS_ROOT", root.as_str()),
            ("RAGKIT_CACHE_DIR", cache.as_str()),
            ("RAGKIT_SEARCH_BACKEND", "command"),
            ("RAGKIT_SEARCH_COMMAND", program.as_str()),
        ];
        let config = AppConfig::from_lookup(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
        .unwrap();

        let output = dir.path().join("out/report.xlsx");
        let path = batch(
            &config,
            BatchArgs {
                input,
                project: "demo".into(),
                community_level: None,
                response_type: None,
                score: false,
                output: Some(output.clone()),
            },
        )
        .unwrap();
        assert_eq!(path, output);
        let report = read_workbook_path(&output).unwrap();
        let sheet = report.get("Sheet1").unwrap();
        assert_eq!(sheet.cell(1, "demo_response"), Some(&CellValue::from("resp-b")));
        assert_eq!(fs::read_dir(dir.path().join("cache")).unwrap().count(), 2);
    }
}
