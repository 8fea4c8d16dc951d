mod batch;
mod cache;
mod error;
mod fingerprint;
mod project;
mod score;
mod search;
mod sheet;
mod workbook;

pub use batch::{
    context_json, run_batch, BatchOutcome, BatchRunner, BatchSettings, BatchStats,
    DEFAULT_COMMUNITY_LEVEL,
};
pub use cache::{CacheEntry, CacheKey, FileResultCache, MemoryResultCache, ResultCache};
pub use error::{
    CacheError, FatalBatchError, ProjectError, RowWarning, ScoreError, WorkbookError,
};
pub use fingerprint::{fingerprint, FINGERPRINT_BYTES};
pub use project::{list_projects, project_path};
pub use score::{grading_request, parse_grade, LlmScorer, Scorer, MAX_GRADE};
pub use search::{
    extract_real_text, SearchEngine, SearchMethod, SearchRequest, SearchResult,
    DEFAULT_RESPONSE_TYPE,
};
pub use sheet::{
    normalize_headers, CellValue, QueryRow, Sheet, SheetCollection, ANSWER_COLUMN, QUERY_COLUMN,
};
pub use workbook::{
    export, read_workbook, read_workbook_path, write_report, MAX_CELL_CHARS, XLSX_MIME,
};
