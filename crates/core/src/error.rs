use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole batch. No report is produced when one of these
/// is returned.
#[derive(Error, Debug)]
pub enum FatalBatchError {
    #[error("sheet '{sheet}' row {row}: query must be in every row")]
    MissingQuery { sheet: String, row: usize },
    #[error("search failed for sheet '{sheet}' row {row}: {source}")]
    Search {
        sheet: String,
        row: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("scoring was requested but no scorer is configured")]
    ScorerMissing,
}

/// Per-row problems that degrade the output without stopping the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWarning {
    CacheWrite {
        sheet: String,
        row: usize,
        message: String,
    },
    Score {
        sheet: String,
        row: usize,
        message: String,
    },
}

impl RowWarning {
    pub fn sheet(&self) -> &str {
        match self {
            RowWarning::CacheWrite { sheet, .. } | RowWarning::Score { sheet, .. } => sheet,
        }
    }

    pub fn row(&self) -> usize {
        match self {
            RowWarning::CacheWrite { row, .. } | RowWarning::Score { row, .. } => *row,
        }
    }
}

impl std::fmt::Display for RowWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowWarning::CacheWrite {
                sheet,
                row,
                message,
            } => write!(f, "sheet '{sheet}' row {row}: cache write failed: {message}"),
            RowWarning::Score {
                sheet,
                row,
                message,
            } => write!(f, "sheet '{sheet}' row {row}: scoring failed: {message}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("failed to persist cache entry {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read workbook: {0}")]
    Read(#[from] calamine::XlsxError),
    #[error("failed to write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
    #[error("workbook does not contain any worksheets")]
    NoSheets,
    #[error("failed to persist report {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("scorer request failed: {0}")]
    Request(#[from] anyhow::Error),
    #[error("scorer reply has no integer grade: {0:?}")]
    Unparseable(String),
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("invalid project name: {0:?}")]
    InvalidName(String),
    #[error("unknown project: {0}")]
    Unknown(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
