use calamine::{Data, Reader, Xls, Xlsx, open_workbook_from_rs};
use log::info;
use std::fmt::Display;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use crate::cell::CellValue;
use crate::error::ParseError;
use crate::workbook::{RawSheet, Workbook};

/// Spreadsheet formats accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Legacy Excel 97-2003 workbook.
    Xls,
    Xlsx,
    Csv,
}

impl FileKind {
    pub const XLS_MIME: &'static str = "application/vnd.ms-excel";
    pub const XLSX_MIME: &'static str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const CSV_MIME: &'static str = "text/csv";

    /// Accept only the three spreadsheet content types. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn from_declared_type(declared: &str) -> Result<Self, ParseError> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            Self::XLS_MIME => Ok(FileKind::Xls),
            Self::XLSX_MIME => Ok(FileKind::Xlsx),
            Self::CSV_MIME => Ok(FileKind::Csv),
            _ => Err(ParseError::UnsupportedType(declared.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("xls") => Ok(FileKind::Xls),
            Some("xlsx") => Ok(FileKind::Xlsx),
            Some("csv") => Ok(FileKind::Csv),
            Some(ext) => Err(ParseError::UnsupportedType(format!(".{}", ext))),
            None => Err(ParseError::UnsupportedType("file without extension".to_string())),
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            FileKind::Xls => Self::XLS_MIME,
            FileKind::Xlsx => Self::XLSX_MIME,
            FileKind::Csv => Self::CSV_MIME,
        }
    }
}

/// Parse an uploaded file. The declared content type is checked before any
/// parsing is attempted.
pub fn load_bytes(bytes: &[u8], declared_type: &str) -> Result<Workbook, ParseError> {
    let kind = FileKind::from_declared_type(declared_type)?;
    parse(bytes, kind)
}

/// Parse a spreadsheet file from disk, picking the format from its extension.
///
/// # Examples
/// ```no_run
/// use sheetview::loader::load_path;
///
/// match load_path("data.csv") {
///     Ok(workbook) => println!("Loaded sheets: {:?}", workbook.sheet_names()),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_path(path: impl AsRef<Path>) -> Result<Workbook, ParseError> {
    let path = path.as_ref();
    let kind = FileKind::from_path(path)?;
    let bytes = std::fs::read(path).map_err(|e| ParseError::Unreadable(e.to_string()))?;
    parse(&bytes, kind)
}

pub fn parse(bytes: &[u8], kind: FileKind) -> Result<Workbook, ParseError> {
    let sheets = match kind {
        FileKind::Csv => vec![from_csv(bytes)?],
        FileKind::Xlsx => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(malformed)?;
            from_excel(workbook)?
        }
        FileKind::Xls => {
            let workbook: Xls<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(malformed)?;
            from_excel(workbook)?
        }
    };
    let workbook = Workbook::from_raw_sheets(sheets)?;
    info!(
        "parsed {:?} upload ({} bytes) into {} sheet(s)",
        kind,
        bytes.len(),
        workbook.sheet_names().len()
    );
    Ok(workbook)
}

fn malformed(e: impl Display) -> ParseError {
    ParseError::Malformed(e.to_string())
}

/// Name given to the single sheet of a CSV upload.
const CSV_SHEET_NAME: &str = "Sheet1";

fn from_csv(bytes: &[u8]) -> Result<RawSheet, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut sheet = RawSheet::new(CSV_SHEET_NAME);
    let mut headers = HeaderRow::default();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(malformed)?;
        if index == 0 {
            for field in record.iter() {
                headers.push(CellValue::infer(field));
            }
            continue;
        }
        let fields = record
            .iter()
            .enumerate()
            .map(|(col, field)| (headers.name(col), CellValue::infer(field)))
            .collect();
        sheet.records.push(fields);
    }
    Ok(sheet)
}

fn from_excel<R, RS>(mut workbook: R) -> Result<Vec<RawSheet>, ParseError>
where
    R: Reader<RS>,
    RS: Read + Seek,
    R::Error: Display,
{
    let sheet_names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for sheet_name in sheet_names {
        let range = workbook.worksheet_range(&sheet_name).map_err(malformed)?;
        let mut sheet = RawSheet::new(sheet_name);
        let mut headers = HeaderRow::default();

        for (index, row) in range.rows().enumerate() {
            if index == 0 {
                for cell in row {
                    headers.push(convert_value(cell));
                }
                continue;
            }
            let fields = row
                .iter()
                .enumerate()
                .map(|(col, cell)| (headers.name(col), convert_value(cell)))
                .collect();
            sheet.records.push(fields);
        }
        sheets.push(sheet);
    }

    Ok(sheets)
}

fn convert_value(cell: &Data) -> Option<CellValue> {
    let value = match cell {
        Data::Empty => return None,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        // Dates keep their serial number, as a spreadsheet stores them.
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::Error(e) => CellValue::Text(e.to_string()),
        other => CellValue::Text(other.to_string()),
    };
    value.present()
}

/// Column names taken from the first row of a sheet.
///
/// Blank headers become `__EMPTY` and repeated names get a `_1`, `_2`, ...
/// suffix so every column name in a sheet is unique.
#[derive(Default)]
struct HeaderRow {
    names: Vec<String>,
}

impl HeaderRow {
    fn push(&mut self, cell: Option<CellValue>) {
        let base = cell
            .map(|v| v.to_string())
            .unwrap_or_else(|| "__EMPTY".to_string());
        let mut candidate = base.clone();
        let mut suffix = 0;
        while self.names.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        self.names.push(candidate);
    }

    fn name(&mut self, col: usize) -> String {
        while self.names.len() <= col {
            self.push(None);
        }
        self.names[col].clone()
    }
}
