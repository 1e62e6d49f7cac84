use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Which sheets end users may see, and which one they see first.
///
/// Mutations return a new value instead of changing `self`, so a rejected
/// change leaves the caller's state untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilitySet {
    visible_sheets: Vec<String>,
    selected_sheet: String,
}

impl VisibilitySet {
    /// Wrap stored values as-is. Use [`VisibilitySet::normalized`] to enforce
    /// the selection invariant.
    pub fn new(visible_sheets: Vec<String>, selected_sheet: impl Into<String>) -> Self {
        VisibilitySet {
            visible_sheets,
            selected_sheet: selected_sheet.into(),
        }
    }

    /// A freshly loaded workbook shows only its first sheet.
    pub fn initial(first_sheet: &str) -> Self {
        VisibilitySet::new(vec![first_sheet.to_string()], first_sheet)
    }

    pub fn visible_sheets(&self) -> &[String] {
        &self.visible_sheets
    }

    pub fn selected_sheet(&self) -> &str {
        &self.selected_sheet
    }

    pub fn is_visible(&self, sheet: &str) -> bool {
        self.visible_sheets.iter().any(|s| s == sheet)
    }

    pub fn is_empty(&self) -> bool {
        self.visible_sheets.is_empty()
    }

    /// Replace the visible set.
    ///
    /// Fails without side effects when `sheets` is empty or names a sheet not
    /// in `known_sheets`. Repeated names are collapsed, keeping the first.
    /// If the current selection is no longer visible it moves to the first
    /// sheet of the new set.
    pub fn with_visible(
        &self,
        sheets: Vec<String>,
        known_sheets: &[String],
    ) -> Result<Self, ValidationError> {
        if sheets.is_empty() {
            return Err(ValidationError::EmptyVisibleSet);
        }

        let mut visible_sheets: Vec<String> = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            if !known_sheets.contains(&sheet) {
                return Err(ValidationError::UnknownSheet(sheet));
            }
            if !visible_sheets.contains(&sheet) {
                visible_sheets.push(sheet);
            }
        }

        let selected_sheet = if visible_sheets.contains(&self.selected_sheet) {
            self.selected_sheet.clone()
        } else {
            visible_sheets[0].clone()
        };

        Ok(VisibilitySet {
            visible_sheets,
            selected_sheet,
        })
    }

    /// Point the selection at `sheet` whether or not it is currently visible;
    /// a pending visibility change may still add it.
    pub fn with_selected(&self, sheet: impl Into<String>) -> Self {
        VisibilitySet {
            visible_sheets: self.visible_sheets.clone(),
            selected_sheet: sheet.into(),
        }
    }

    /// Enforce the selection invariant: a member of the visible set when the
    /// set is non-empty, otherwise empty.
    pub fn normalized(mut self) -> Self {
        if !self.is_visible(&self.selected_sheet) {
            self.selected_sheet = self.visible_sheets.first().cloned().unwrap_or_default();
        }
        self
    }
}
