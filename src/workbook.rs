use std::collections::HashMap;

use crate::cell::CellValue;
use crate::dataset::{Row, TabularDataset};
use crate::error::ParseError;

/// A sheet as delivered by the file parser: a name and its records in source order.
///
/// Each record is a list of `(column, value)` pairs; `None` marks an empty cell.
#[derive(Clone, Debug, Default)]
pub struct RawSheet {
    pub name: String,
    pub records: Vec<Vec<(String, Option<CellValue>)>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>) -> Self {
        RawSheet {
            name: name.into(),
            records: Vec::new(),
        }
    }
}

/// All sheets parsed from one uploaded file.
#[derive(Clone, Debug, PartialEq)]
pub struct Workbook {
    sheet_names: Vec<String>,
    sheets: HashMap<String, TabularDataset>,
}

impl Workbook {
    /// Build one dataset per raw sheet, keeping sheet and row order.
    ///
    /// Empty cells are left out of the rows and records without any value are
    /// skipped. Fails when there are no sheets or two sheets share a name.
    pub fn from_raw_sheets(raw: Vec<RawSheet>) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::EmptyWorkbook);
        }

        let mut workbook = Workbook::empty();
        for sheet in raw {
            let rows = sheet
                .records
                .into_iter()
                .map(|record| {
                    record
                        .into_iter()
                        .filter_map(|(column, value)| value.map(|v| (column, v)))
                        .collect::<Row>()
                })
                .filter(|row| !row.is_empty())
                .collect();
            workbook.push_sheet(sheet.name, TabularDataset::new(rows))?;
        }
        Ok(workbook)
    }

    /// Assemble a workbook from already-built datasets, e.g. from stored state.
    pub fn from_sheets(
        sheets: impl IntoIterator<Item = (String, TabularDataset)>,
    ) -> Result<Self, ParseError> {
        let mut workbook = Workbook::empty();
        for (name, dataset) in sheets {
            workbook.push_sheet(name, dataset)?;
        }
        if workbook.sheet_names.is_empty() {
            return Err(ParseError::EmptyWorkbook);
        }
        Ok(workbook)
    }

    fn empty() -> Self {
        Workbook {
            sheet_names: Vec::new(),
            sheets: HashMap::new(),
        }
    }

    fn push_sheet(&mut self, name: String, dataset: TabularDataset) -> Result<(), ParseError> {
        if self.sheets.contains_key(&name) {
            return Err(ParseError::DuplicateSheet(name));
        }
        self.sheet_names.push(name.clone());
        self.sheets.insert(name, dataset);
        Ok(())
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    pub fn sheet(&self, name: &str) -> Option<&TabularDataset> {
        self.sheets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sheets.contains_key(name)
    }

    pub fn first_sheet(&self) -> Option<&str> {
        self.sheet_names.first().map(String::as_str)
    }

    /// Sheets in workbook order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TabularDataset)> {
        self.sheet_names
            .iter()
            .filter_map(|name| self.sheets.get(name).map(|d| (name.as_str(), d)))
    }

    /// A copy holding only the named sheets, in the order of `names`.
    /// Names without a sheet and repeats are skipped.
    pub fn restricted_to(&self, names: &[String]) -> Workbook {
        let mut out = Workbook::empty();
        for name in names {
            if out.sheets.contains_key(name) {
                continue;
            }
            if let Some(dataset) = self.sheets.get(name) {
                out.sheet_names.push(name.clone());
                out.sheets.insert(name.clone(), dataset.clone());
            }
        }
        out
    }
}
