use crate::dataset::TabularDataset;
use crate::error::ValidationError;
use crate::storage::{PublishedState, SessionStore};
use crate::view::{ViewPage, ViewQuery};
use crate::visibility::VisibilitySet;
use crate::workbook::Workbook;

/// Read-only session of a regular user.
///
/// Holds only the visible sheets of the published workbook. Switching
/// sheets starts a fresh [`ViewQuery`].
#[derive(Clone, Debug)]
pub struct Viewer {
    workbook: Option<Workbook>,
    visibility: VisibilitySet,
    query: ViewQuery,
}

impl Viewer {
    pub fn open(store: &dyn SessionStore) -> Self {
        Viewer::from_published(&PublishedState::read_or_default(store))
    }

    /// Restrict `state` to its visible sheets, keeping the stored visible
    /// order. The saved selection is kept if it is visible, otherwise the
    /// first visible sheet is selected.
    pub fn from_published(state: &PublishedState) -> Self {
        let Some(workbook) = &state.workbook else {
            return Viewer {
                workbook: None,
                visibility: VisibilitySet::default(),
                query: ViewQuery::new(),
            };
        };

        let visible = workbook.restricted_to(state.visibility.visible_sheets());
        let visibility =
            VisibilitySet::new(visible.sheet_names().to_vec(), state.visibility.selected_sheet())
                .normalized();

        Viewer {
            workbook: Some(visible),
            visibility,
            query: ViewQuery::new(),
        }
    }

    /// Visible sheets in the order the admin made them visible.
    pub fn sheet_names(&self) -> &[String] {
        self.visibility.visible_sheets()
    }

    pub fn selected_sheet(&self) -> Option<&str> {
        Some(self.visibility.selected_sheet()).filter(|s| !s.is_empty())
    }

    pub fn has_data(&self) -> bool {
        !self.visibility.is_empty()
    }

    pub fn select(&mut self, sheet: &str) -> Result<(), ValidationError> {
        if !self.visibility.is_visible(sheet) {
            return Err(ValidationError::UnknownSheet(sheet.to_string()));
        }
        if self.visibility.selected_sheet() != sheet {
            self.visibility = self.visibility.with_selected(sheet);
            self.query.reset();
        }
        Ok(())
    }

    pub fn sheet(&self, name: &str) -> Option<&TabularDataset> {
        self.workbook.as_ref()?.sheet(name)
    }

    pub fn dataset(&self) -> Option<&TabularDataset> {
        self.sheet(self.selected_sheet()?)
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut ViewQuery {
        &mut self.query
    }

    pub fn current_page(&self) -> Option<ViewPage<'_>> {
        self.dataset().map(|d| self.query.evaluate(d))
    }
}
