use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use calamine::{Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::WorkbookError;
use crate::sheet::{normalize_headers, CellValue, QueryRow, Sheet, SheetCollection};

/// Longest text a spreadsheet cell accepts.
pub const MAX_CELL_CHARS: usize = 32_767;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub fn read_workbook(bytes: &[u8]) -> Result<SheetCollection, WorkbookError> {
    read_from(Cursor::new(bytes.to_vec()))
}

pub fn read_workbook_path(path: &Path) -> Result<SheetCollection, WorkbookError> {
    let file = fs::File::open(path)?;
    read_from(std::io::BufReader::new(file))
}

fn read_from<RS: Read + Seek>(reader: RS) -> Result<SheetCollection, WorkbookError> {
    let mut workbook: Xlsx<RS> = Xlsx::new(reader)?;
    let names = workbook.sheet_names();
    if names.is_empty() {
        return Err(WorkbookError::NoSheets);
    }
    let mut sheets = SheetCollection::new();
    for name in names {
        let range = workbook.worksheet_range(&name)?;
        let mut rows_iter = range.rows();
        let Some(header_row) = rows_iter.next() else {
            sheets.push(Sheet::new(name, Vec::new()));
            continue;
        };
        let raw_headers: Vec<String> = header_row.iter().map(header_text).collect();
        let columns = normalize_headers(&trim_trailing_blank(raw_headers));
        let mut sheet = Sheet::new(name, columns.clone());
        for row in rows_iter {
            let record: QueryRow = columns
                .iter()
                .zip(row.iter().map(cell_value).chain(std::iter::repeat(CellValue::Empty)))
                .map(|(column, value)| (column.clone(), value))
                .collect();
            if record.is_blank() {
                continue;
            }
            sheet.rows.push(record);
        }
        sheets.push(sheet);
    }
    Ok(sheets)
}

fn trim_trailing_blank(mut headers: Vec<String>) -> Vec<String> {
    while headers.last().map(|h| h.trim().is_empty()).unwrap_or(false) {
        headers.pop();
    }
    headers
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => cell_value(other).to_string(),
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(text) => CellValue::Text(text.clone()),
        Data::Float(value) => CellValue::Number(*value),
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Bool(value) => CellValue::Bool(*value),
        other => CellValue::Text(other.to_string()),
    }
}

/// Serializes every sheet into one `.xlsx` document held in memory. Either the
/// full document is returned or an error; no partial output escapes.
pub fn export(sheets: &SheetCollection) -> Result<Vec<u8>, WorkbookError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    for sheet in sheets.iter() {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;
        write_sheet(worksheet, sheet, &header_format)?;
    }
    Ok(workbook.save_to_buffer()?)
}

fn write_sheet(
    worksheet: &mut Worksheet,
    sheet: &Sheet,
    header_format: &Format,
) -> Result<(), WorkbookError> {
    for (col, column) in sheet.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, column, header_format)?;
    }
    for (idx, row) in sheet.rows.iter().enumerate() {
        let row_num = (idx + 1) as u32;
        for (col, column) in sheet.columns.iter().enumerate() {
            let col = col as u16;
            match row.get(column) {
                None | Some(CellValue::Empty) => {}
                Some(CellValue::Bool(value)) => {
                    worksheet.write_boolean(row_num, col, *value)?;
                }
                Some(CellValue::Number(value)) => {
                    worksheet.write_number(row_num, col, *value)?;
                }
                Some(CellValue::Text(text)) => {
                    let text = clamp_cell(text, &sheet.name, row_num, column);
                    worksheet.write_string(row_num, col, text)?;
                }
            }
        }
    }
    Ok(())
}

fn clamp_cell<'a>(text: &'a str, sheet: &str, row: u32, column: &str) -> &'a str {
    match text.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => {
            warn!(
                sheet,
                row,
                column,
                chars = text.chars().count(),
                "cell text truncated to {MAX_CELL_CHARS} characters"
            );
            &text[..end]
        }
        None => text,
    }
}

/// Writes the report next to its destination first and renames it into place.
pub fn write_report(path: &Path, sheets: &SheetCollection) -> Result<(), WorkbookError> {
    let bytes = export(sheets)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|source| WorkbookError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
