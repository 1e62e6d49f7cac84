use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::cell::CellValue;

/// One record of a sheet: column name to value, in the column order of the source.
///
/// Absent cells have no entry. Serialises as a JSON object whose key order
/// follows the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value; empty values are dropped.
    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        let Some(value) = value.present() else {
            self.cells.retain(|(c, _)| *c != column);
            return;
        };
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<CellValue>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v.into());
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to text or numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let mut row = Row::new();
                while let Some((column, value)) =
                    access.next_entry::<String, Option<CellValue>>()?
                {
                    if let Some(value) = value {
                        row.insert(column, value);
                    }
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// What kind of values a column holds, inferred once when the dataset is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every present value is a number.
    Numeric,
    /// Every present value is text.
    Text,
    Mixed,
    /// No row has a value in this column.
    Empty,
}

impl ColumnKind {
    fn absorb(self, value: &CellValue) -> Self {
        match (self, value.is_number()) {
            (ColumnKind::Empty, true) | (ColumnKind::Numeric, true) => ColumnKind::Numeric,
            (ColumnKind::Empty, false) | (ColumnKind::Text, false) => ColumnKind::Text,
            _ => ColumnKind::Mixed,
        }
    }
}

/// The rows of one sheet.
///
/// `columns` are the keys of the first row. Later rows may carry fewer or
/// extra keys; only the first row's keys are canonical. The dataset is
/// immutable once built: a new upload replaces it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularDataset {
    columns: Vec<String>,
    rows: Vec<Row>,
    kinds: HashMap<String, ColumnKind>,
}

impl TabularDataset {
    pub fn new(rows: Vec<Row>) -> Self {
        let columns: Vec<String> = rows
            .first()
            .map(|r| r.keys().map(str::to_string).collect())
            .unwrap_or_default();

        let mut kinds: HashMap<String, ColumnKind> = HashMap::new();
        for row in &rows {
            for (column, value) in row.iter() {
                let kind = kinds.entry(column.to_string()).or_insert(ColumnKind::Empty);
                *kind = kind.absorb(value);
            }
        }

        TabularDataset {
            columns,
            rows,
            kinds,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_kind(&self, column: &str) -> ColumnKind {
        self.kinds.get(column).copied().unwrap_or(ColumnKind::Empty)
    }
}

impl Serialize for TabularDataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TabularDataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Row>::deserialize(deserializer).map(TabularDataset::new)
    }
}
