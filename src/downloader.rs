#![cfg(feature = "web")]

use rust_xlsxwriter::{Workbook, XlsxError};
use std::collections::HashSet;
use thiserror::Error;

use crate::cell::CellValue;
use crate::dataset::{Row, TabularDataset};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write XLSX: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("failed to finish CSV output: {0}")]
    Io(String),
}

/// Export formats offered for a filtered view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => crate::loader::FileKind::XLSX_MIME,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Header for an export: the dataset's columns, then any extra keys later
/// rows carry, in order of first appearance.
fn export_columns(dataset: &TabularDataset, rows: &[&Row]) -> Vec<String> {
    let mut columns: Vec<String> = dataset.columns().to_vec();
    let mut seen: HashSet<String> = columns.iter().cloned().collect();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.to_string()) {
                columns.push(key.to_string());
            }
        }
    }
    columns
}

/// Convert rows to CSV
///
/// The first line holds the column names; absent cells are left blank.
/// Quoting of commas, quotes and newlines is left to the `csv` writer.
pub fn to_csv(dataset: &TabularDataset, rows: &[&Row]) -> Result<String, ExportError> {
    let columns = export_columns(dataset, rows);
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(&columns)?;
    for row in rows {
        writer.write_record(
            columns
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default()),
        )?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Io(e.to_string()))
}

/// Convert rows to XLSX format
///
/// Writes a single worksheet named after the sheet, with the column names in
/// the first row. Numbers stay numeric.
pub fn to_xlsx(sheet_name: &str, dataset: &TabularDataset, rows: &[&Row]) -> Result<Vec<u8>, ExportError> {
    let columns = export_columns(dataset, rows);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    for (c, column) in columns.iter().enumerate() {
        worksheet.write_string(0, c as u16, column)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let excel_row = (r + 1) as u32;
        for (c, column) in columns.iter().enumerate() {
            match row.get(column) {
                Some(CellValue::Number(n)) => {
                    worksheet.write_number(excel_row, c as u16, *n)?;
                }
                Some(CellValue::Text(s)) => {
                    worksheet.write_string(excel_row, c as u16, s)?;
                }
                None => {}
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}
