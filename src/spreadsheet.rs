//! Plain string-grid reading and writing for recipient lists and report exports.

use crate::error::{Result, WppError};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::Workbook;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Workbook,
    Csv,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(Format::Workbook),
        "csv" => Ok(Format::Csv),
        _ => Err(WppError::validation(format!(
            "unsupported spreadsheet format '{}': use .xlsx, .xls, .ods or .csv",
            path.display()
        ))),
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Phone numbers typed into a sheet come back as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e16 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Rows of the first sheet, every cell rendered as text.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let rows = match format_of(path)? {
        Format::Workbook => {
            let mut workbook = open_workbook_auto(path)?;
            let range = match workbook.worksheet_range_at(0) {
                Some(range) => range?,
                None => return Ok(Vec::new()),
            };
            range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect())
                .collect()
        }
        Format::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(path)?;
            let mut rows = Vec::new();
            for record in reader.records() {
                rows.push(record?.iter().map(str::to_string).collect());
            }
            rows
        }
    };
    debug!("read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Writes `rows` as text cells. `sheet_name` is ignored for CSV.
pub fn write_rows(path: &Path, sheet_name: &str, rows: &[Vec<String>]) -> Result<()> {
    match format_of(path)? {
        Format::Workbook => {
            if !path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
            {
                return Err(WppError::validation("workbooks can only be written as .xlsx"));
            }
            let mut workbook = Workbook::new();
            let sheet = workbook.add_worksheet();
            sheet.set_name(sheet_name)?;
            for (r, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    sheet.write_string(r as u32, c as u16, value)?;
                }
            }
            workbook.save(path)?;
        }
        Format::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(path)?;
            for row in rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
    }
    debug!("wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
