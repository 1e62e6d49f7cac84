use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A present cell value. Empty cells are never stored; a row simply lacks the key.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_number(&self) -> bool {
        matches!(self, CellValue::Number(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(_) => None,
        }
    }

    /// Normalise an ingested value: empty text counts as an absent cell.
    pub fn present(self) -> Option<Self> {
        match &self {
            CellValue::Text(s) if s.is_empty() => None,
            CellValue::Number(n) if !n.is_finite() => None,
            _ => Some(self),
        }
    }

    /// Classify a raw text field the way a spreadsheet importer would:
    /// plain decimal numbers become numbers, everything else stays text.
    pub fn infer(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if looks_numeric(trimmed) {
            match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => return Some(CellValue::Number(n)),
                // Overflowing literals such as `1e999` stay text.
                _ => {}
            }
        }
        Some(CellValue::Text(raw.to_string()))
    }

    /// Ordering used for filter option lists: numbers numerically, otherwise
    /// by string form. Numbers sort before text with the same string form.
    pub fn domain_cmp(&self, other: &Self, numeric: bool) -> Ordering {
        if numeric {
            if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
                return a.total_cmp(&b);
            }
        }
        self.to_string()
            .cmp(&other.to_string())
            .then_with(|| other.is_number().cmp(&self.is_number()))
    }
}

fn looks_numeric(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Integral values print without a fractional part, as spreadsheets show them.
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e21 => {
                write!(f, "{}", *n as i128)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serializer.serialize_i64(*n as i64)
            }
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}
