use std::cell::Cell;
use std::fs;

use ragkit_core::{
    export, read_workbook, read_workbook_path, run_batch, write_report, BatchSettings, CellValue,
    FileResultCache, QueryRow, SearchRequest, SearchResult, Sheet, SheetCollection,
};
use serde_json::json;
use tempfile::tempdir;

fn workbook() -> SheetCollection {
    let first = Sheet::from_rows(
        "Sheet1",
        vec![
            [("query", "a")].into_iter().collect::<QueryRow>(),
            [("query", "b"), ("answer", "x")].into_iter().collect(),
        ],
    );
    let second = Sheet::from_rows(
        "Regression",
        vec![[("id", CellValue::Number(7.0)), ("query", "c".into())]
            .into_iter()
            .collect()],
    );
    [first, second].into_iter().collect()
}

#[test]
fn uploaded_workbook_is_augmented_and_cached_on_disk() {
    let dir = tempdir().unwrap();
    let cache = FileResultCache::new(dir.path().join("cache"));
    let calls = Cell::new(0);
    let search = |req: &SearchRequest<'_>| -> anyhow::Result<SearchResult> {
        calls.set(calls.get() + 1);
        Ok(SearchResult {
            response: format!("resp-{} [Data: Reports (1)]", req.query),
            context_data: json!({"reports": [{"id": 1}]}),
        })
    };
    let upload = export(&workbook()).unwrap();
    let sheets = read_workbook(&upload).unwrap();
    let settings = BatchSettings::new("demo", dir.path().join("projects/demo"));

    let outcome = run_batch(sheets, &settings, &search, &cache, None).unwrap();
    assert!(outcome.warnings.is_empty());
    assert_eq!(calls.get(), 3);
    assert_eq!(fs::read_dir(cache.dir()).unwrap().count(), 3);

    let report = dir.path().join("out/report.xlsx");
    write_report(&report, &outcome.sheets).unwrap();
    let parsed = read_workbook_path(&report).unwrap();
    assert_eq!(parsed.names(), vec!["Sheet1", "Regression"]);
    let regression = parsed.get("Regression").unwrap();
    assert_eq!(
        regression.columns,
        vec![
            "id",
            "query",
            "demo_response",
            "demo_response_count",
            "demo_context_data",
            "demo_response_type"
        ]
    );
    assert_eq!(regression.cell(0, "demo_response_count"), Some(&CellValue::Number(6.0)));
    let sheet1 = parsed.get("Sheet1").unwrap();
    assert_eq!(sheet1.len(), 2);
    assert_eq!(sheet1.rows[1].answer().as_deref(), Some("x"));

    let rerun = run_batch(read_workbook(&upload).unwrap(), &settings, &search, &cache, None)
        .unwrap();
    assert_eq!(calls.get(), 3);
    assert_eq!(rerun.stats.cache_hits, 3);
    assert_eq!(rerun.sheets, outcome.sheets);
}

#[test]
fn corrupt_cache_file_is_recomputed() {
    let dir = tempdir().unwrap();
    let cache = FileResultCache::new(dir.path());
    let search = |req: &SearchRequest<'_>| -> anyhow::Result<SearchResult> {
        Ok(SearchResult {
            response: format!("resp-{}", req.query),
            context_data: json!(null),
        })
    };
    let settings = BatchSettings::new("demo", dir.path());
    run_batch(workbook(), &settings, &search, &cache, None).unwrap();
    for entry in fs::read_dir(dir.path()).unwrap() {
        fs::write(entry.unwrap().path(), b"{ not json").unwrap();
    }
    let outcome = run_batch(workbook(), &settings, &search, &cache, None).unwrap();
    assert_eq!(outcome.stats.cache_misses, 3);
    let sheet = outcome.sheets.get("Sheet1").unwrap();
    assert_eq!(sheet.cell(1, "demo_response"), Some(&CellValue::from("resp-b")));
    let third = run_batch(workbook(), &settings, &search, &cache, None).unwrap();
    assert_eq!(third.stats.cache_hits, 3);
}

#[test]
fn projects_with_non_ascii_names_do_not_share_results() {
    let dir = tempdir().unwrap();
    let cache = FileResultCache::new(dir.path().join("cache"));
    let search = |req: &SearchRequest<'_>| -> anyhow::Result<SearchResult> {
        Ok(SearchResult {
            response: format!("from {}", req.root_dir.display()),
            context_data: json!(null),
        })
    };
    let sheets = || -> SheetCollection {
        [Sheet::from_rows(
            "Sheet1",
            vec![[("query", "b")].into_iter().collect::<QueryRow>()],
        )]
        .into_iter()
        .collect()
    };
    let first = BatchSettings::new("项目", dir.path().join("projects/项目"));
    run_batch(sheets(), &first, &search, &cache, None).unwrap();

    let second = BatchSettings::new("资料", dir.path().join("projects/资料"));
    let outcome = run_batch(sheets(), &second, &search, &cache, None).unwrap();
    assert_eq!(outcome.stats.cache_hits, 0);
    assert_eq!(outcome.stats.cache_misses, 1);
    let expected = format!("from {}", dir.path().join("projects/资料").display());
    assert_eq!(
        outcome.sheets.get("Sheet1").unwrap().cell(0, "资料_response"),
        Some(&CellValue::from(expected.as_str()))
    );
}
