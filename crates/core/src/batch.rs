use std::path::PathBuf;
use std::time::Instant;

use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, ResultCache};
use crate::error::{FatalBatchError, RowWarning};
use crate::score::Scorer;
use crate::search::{
    extract_real_text, SearchEngine, SearchMethod, SearchRequest, DEFAULT_RESPONSE_TYPE,
};
use crate::sheet::{CellValue, Sheet, SheetCollection};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub project: String,
    pub project_root: PathBuf,
    pub community_level: u32,
    pub response_type: String,
    pub score: bool,
}

impl BatchSettings {
    pub fn new(project: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            project_root: project_root.into(),
            community_level: DEFAULT_COMMUNITY_LEVEL,
            response_type: DEFAULT_RESPONSE_TYPE.to_string(),
            score: false,
        }
    }

    pub fn response_column(&self) -> String {
        format!("{}_response", self.project)
    }

    pub fn response_count_column(&self) -> String {
        format!("{}_response_count", self.project)
    }

    pub fn context_data_column(&self) -> String {
        format!("{}_context_data", self.project)
    }

    pub fn response_type_column(&self) -> String {
        format!("{}_response_type", self.project)
    }

    pub fn score_column(&self) -> String {
        format!("{}_score", self.project)
    }
}

pub const DEFAULT_COMMUNITY_LEVEL: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub rows: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub scored: usize,
    pub score_failures: usize,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub sheets: SheetCollection,
    pub warnings: Vec<RowWarning>,
    pub stats: BatchStats,
}

/// Runs local search over every row of every sheet, replaying cached results
/// where possible.
pub struct BatchRunner<'a> {
    search: &'a dyn SearchEngine,
    cache: &'a dyn ResultCache,
    scorer: Option<&'a dyn Scorer>,
    extract: fn(&str) -> String,
}

impl<'a> BatchRunner<'a> {
    pub fn new(search: &'a dyn SearchEngine, cache: &'a dyn ResultCache) -> Self {
        Self {
            search,
            cache,
            scorer: None,
            extract: extract_real_text,
        }
    }

    pub fn with_scorer(mut self, scorer: &'a dyn Scorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_extractor(mut self, extract: fn(&str) -> String) -> Self {
        self.extract = extract;
        self
    }

    pub fn run(
        &self,
        mut sheets: SheetCollection,
        settings: &BatchSettings,
    ) -> Result<BatchOutcome, FatalBatchError> {
        if settings.score && self.scorer.is_none() {
            return Err(FatalBatchError::ScorerMissing);
        }
        for sheet in sheets.iter() {
            validate_sheet(sheet)?;
        }
        let mut warnings = Vec::new();
        let mut stats = BatchStats::default();
        for sheet in sheets.iter_mut() {
            let timer = Instant::now();
            info!(
                sheet = %sheet.name,
                rows = sheet.len(),
                project = %settings.project,
                "processing sheet"
            );
            self.run_sheet(sheet, settings, &mut stats, &mut warnings)?;
            info!(
                sheet = %sheet.name,
                elapsed = ?timer.elapsed(),
                "finished sheet"
            );
        }
        Ok(BatchOutcome {
            sheets,
            warnings,
            stats,
        })
    }

    fn run_sheet(
        &self,
        sheet: &mut Sheet,
        settings: &BatchSettings,
        stats: &mut BatchStats,
        warnings: &mut Vec<RowWarning>,
    ) -> Result<(), FatalBatchError> {
        let response_col = settings.response_column();
        let count_col = settings.response_count_column();
        let context_col = settings.context_data_column();
        let type_col = settings.response_type_column();
        let score_col = settings.score_column();
        for column in [&response_col, &count_col, &context_col, &type_col] {
            sheet.ensure_column(column);
        }
        let total = sheet.len();
        let sheet_name = sheet.name.clone();
        for (idx, row) in sheet.rows.iter_mut().enumerate() {
            let position = idx + 1;
            let query = row.query().ok_or_else(|| FatalBatchError::MissingQuery {
                sheet: sheet_name.clone(),
                row: position,
            })?;
            info!(sheet = %sheet_name, "row {position}/{total}");
            let key = CacheKey {
                method: SearchMethod::Local,
                project: &settings.project,
                row: position,
                community_level: settings.community_level,
                response_type: &settings.response_type,
                query: &query,
            }
            .render();
            stats.rows += 1;
            let entry = match self.cache.get(&key) {
                Some(entry) => {
                    debug!(key = %key, "cache hit");
                    stats.cache_hits += 1;
                    entry
                }
                None => {
                    stats.cache_misses += 1;
                    let request = SearchRequest {
                        method: SearchMethod::Local,
                        root_dir: &settings.project_root,
                        query: &query,
                        community_level: settings.community_level,
                        response_type: &settings.response_type,
                        dynamic_community_selection: false,
                    };
                    let result =
                        self.search
                            .search(&request)
                            .map_err(|source| FatalBatchError::Search {
                                sheet: sheet_name.clone(),
                                row: position,
                                source,
                            })?;
                    let entry = CacheEntry {
                        response: result.response,
                        context_data: result.context_data,
                    };
                    if let Err(err) = self.cache.put(&key, &entry) {
                        let warning = RowWarning::CacheWrite {
                            sheet: sheet_name.clone(),
                            row: position,
                            message: err.to_string(),
                        };
                        warn!("{warning}");
                        warnings.push(warning);
                    }
                    entry
                }
            };

            let real_text = (self.extract)(&entry.response);
            row.set(response_col.as_str(), entry.response.as_str());
            row.set(count_col.as_str(), real_text.chars().count());
            row.set(context_col.as_str(), context_json(&entry.context_data));
            row.set(type_col.as_str(), settings.response_type.as_str());

            if !settings.score {
                continue;
            }
            let (Some(scorer), Some(answer)) = (self.scorer, row.answer()) else {
                continue;
            };
            match scorer.score(&query, &answer, &entry.response) {
                Ok(grade) => {
                    stats.scored += 1;
                    row.set(score_col.as_str(), CellValue::Number(grade as f64));
                }
                Err(err) => {
                    stats.score_failures += 1;
                    let warning = RowWarning::Score {
                        sheet: sheet_name.clone(),
                        row: position,
                        message: err.to_string(),
                    };
                    warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }
        if sheet
            .rows
            .iter()
            .any(|row| row.get(&score_col).is_some())
        {
            sheet.ensure_column(&score_col);
        }
        Ok(())
    }
}

pub fn run_batch(
    sheets: SheetCollection,
    settings: &BatchSettings,
    search: &dyn SearchEngine,
    cache: &dyn ResultCache,
    scorer: Option<&dyn Scorer>,
) -> Result<BatchOutcome, FatalBatchError> {
    let mut runner = BatchRunner::new(search, cache);
    if let Some(scorer) = scorer {
        runner = runner.with_scorer(scorer);
    }
    runner.run(sheets, settings)
}

fn validate_sheet(sheet: &Sheet) -> Result<(), FatalBatchError> {
    for (idx, row) in sheet.rows.iter().enumerate() {
        if row.query().is_none() {
            return Err(FatalBatchError::MissingQuery {
                sheet: sheet.name.clone(),
                row: idx + 1,
            });
        }
    }
    Ok(())
}

/// Context data rendered with four-space indentation; non-ASCII is kept as is.
pub fn context_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match serde::Serialize::serialize(value, &mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => value.to_string(),
    }
}
