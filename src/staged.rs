use log::{info, warn};
use serde::Serialize;
use std::mem;

use crate::error::{PersistenceError, ValidationError};
use crate::storage::{self, MemoryStore, PublishedState, SessionStore, StoreSnapshot};
use crate::visibility::VisibilitySet;
use crate::workbook::Workbook;

/// Staged replacement of the published workbook.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkbookChange {
    Replace(Workbook),
    /// Drop all published data.
    Clear,
}

/// Sparse set of pending changes. `None` means "keep the published value".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub workbook: Option<WorkbookChange>,
    pub visible_sheets: Option<Vec<String>>,
    pub selected_sheet: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum EditState {
    #[default]
    Clean,
    Pending(Overlay),
}

impl EditState {
    pub fn is_pending(&self) -> bool {
        matches!(self, EditState::Pending(_))
    }
}

/// One semantic difference between the overlay and published state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    NewFile,
    VisibilityAdded(Vec<String>),
    VisibilityRemoved(Vec<String>),
    SelectionChanged(String),
    NoChanges,
}

impl Change {
    pub fn kind(&self) -> &'static str {
        match self {
            Change::NewFile => "file",
            Change::VisibilityAdded(_) => "visibility-added",
            Change::VisibilityRemoved(_) => "visibility-removed",
            Change::SelectionChanged(_) => "selection",
            Change::NoChanges => "none",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Change::NewFile => "New Excel file loaded".to_string(),
            Change::VisibilityAdded(sheets) => format!("Made visible: {}", sheets.join(", ")),
            Change::VisibilityRemoved(sheets) => {
                format!("Hidden from users: {}", sheets.join(", "))
            }
            Change::SelectionChanged(sheet) => format!("Changed selected sheet to: {}", sheet),
            Change::NoChanges => "No changes to apply".to_string(),
        }
    }
}

impl Serialize for Change {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Change", 2)?;
        s.serialize_field("type", self.kind())?;
        s.serialize_field("description", &self.description())?;
        s.end()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
}

/// User-facing outcome of an admin action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Notice {
            level,
            message: message.into(),
        }
    }
}

/// Published state as it was before a destructive clear.
#[derive(Clone, Debug)]
struct Recovery {
    published: PublishedState,
    stored: StoreSnapshot,
}

/// The admin's editing session: published state, the pending overlay, and
/// the recovery slot filled by [`EditSession::clear_data`].
///
/// Every edit cycle ends in exactly one [`commit`](EditSession::commit) or
/// [`discard`](EditSession::discard).
pub struct EditSession<S: SessionStore = MemoryStore> {
    store: S,
    published: PublishedState,
    state: EditState,
    recovery: Option<Recovery>,
}

impl<S: SessionStore> EditSession<S> {
    /// Start a session from whatever `store` holds.
    ///
    /// Unreadable or corrupt stored state is wiped and treated as absent.
    pub fn open(store: S) -> Self {
        let published = match PublishedState::read(&store) {
            Ok(state) => state,
            Err(e) => {
                warn!("discarding unreadable published state: {}", e);
                if let Err(e) = storage::clear(&store) {
                    warn!("failed to clear store: {}", e);
                }
                PublishedState::default()
            }
        };
        EditSession {
            store,
            published,
            state: EditState::Clean,
            recovery: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn published(&self) -> &PublishedState {
        &self.published
    }

    pub fn state(&self) -> &EditState {
        &self.state
    }

    pub fn has_pending_changes(&self) -> bool {
        self.state.is_pending()
    }

    fn overlay(&self) -> Option<&Overlay> {
        match &self.state {
            EditState::Pending(overlay) => Some(overlay),
            EditState::Clean => None,
        }
    }

    fn overlay_mut(&mut self) -> &mut Overlay {
        if let EditState::Clean = self.state {
            self.state = EditState::Pending(Overlay::default());
        }
        match &mut self.state {
            EditState::Pending(overlay) => overlay,
            EditState::Clean => unreachable!("state was just set to pending"),
        }
    }

    /// The workbook the admin currently sees: pending if staged, else published.
    pub fn effective_workbook(&self) -> Option<&Workbook> {
        match self.overlay().and_then(|o| o.workbook.as_ref()) {
            Some(WorkbookChange::Replace(workbook)) => Some(workbook),
            Some(WorkbookChange::Clear) => None,
            None => self.published.workbook.as_ref(),
        }
    }

    /// Visibility with pending fields applied. The selection is not normalised.
    pub fn effective_visibility(&self) -> VisibilitySet {
        let published = &self.published.visibility;
        let overlay = self.overlay();
        let visible = overlay
            .and_then(|o| o.visible_sheets.clone())
            .unwrap_or_else(|| published.visible_sheets().to_vec());
        let selected = overlay
            .and_then(|o| o.selected_sheet.clone())
            .unwrap_or_else(|| published.selected_sheet().to_string());
        VisibilitySet::new(visible, selected)
    }

    /// Stage a freshly parsed workbook with only its first sheet visible.
    ///
    /// Rejected while published data exists; the admin has to clear it
    /// first. A staged but uncommitted upload is replaced wholesale.
    pub fn load_workbook(&mut self, workbook: Workbook) -> Result<Notice, ValidationError> {
        if self.published.has_data() {
            return Err(ValidationError::DataAlreadyPublished);
        }

        let visibility = workbook
            .first_sheet()
            .map(VisibilitySet::initial)
            .unwrap_or_default();
        info!(
            "staged workbook with {} sheet(s): {}",
            workbook.sheet_names().len(),
            workbook.sheet_names().join(", ")
        );

        let overlay = self.overlay_mut();
        overlay.workbook = Some(WorkbookChange::Replace(workbook));
        overlay.visible_sheets = Some(visibility.visible_sheets().to_vec());
        overlay.selected_sheet = Some(visibility.selected_sheet().to_string());

        Ok(Notice::new(
            NoticeLevel::Success,
            "File loaded. Click 'Apply Changes' to publish it.",
        ))
    }

    /// Stage a new visible set. See [`VisibilitySet::with_visible`].
    pub fn set_visible(&mut self, sheets: Vec<String>) -> Result<(), ValidationError> {
        let known = self
            .effective_workbook()
            .map(|w| w.sheet_names().to_vec())
            .unwrap_or_default();
        let next = self.effective_visibility().with_visible(sheets, &known)?;

        let overlay = self.overlay_mut();
        overlay.visible_sheets = Some(next.visible_sheets().to_vec());
        overlay.selected_sheet = Some(next.selected_sheet().to_string());
        Ok(())
    }

    /// Stage a new selection. Membership is checked again on commit.
    pub fn set_selected(&mut self, sheet: impl Into<String>) {
        self.overlay_mut().selected_sheet = Some(sheet.into());
    }

    /// Clear all published data, keeping a copy for [`EditSession::discard`].
    ///
    /// Published state and the store are emptied immediately. Commit makes
    /// it final; discard puts back the published state and the stored slots
    /// exactly as they were.
    pub fn clear_data(&mut self) -> Result<Notice, ValidationError> {
        if !self.published.has_data() {
            return Err(ValidationError::NothingToClear);
        }

        let stored = match StoreSnapshot::capture(&self.store) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("could not snapshot store before clearing, re-encoding instead: {}", e);
                snapshot_of(&self.published).unwrap_or_else(|e| {
                    warn!("re-encoding published state failed, discard will leave the store empty: {}", e);
                    StoreSnapshot::default()
                })
            }
        };
        self.recovery = Some(Recovery {
            published: mem::take(&mut self.published),
            stored,
        });

        self.state = EditState::Pending(Overlay {
            workbook: Some(WorkbookChange::Clear),
            visible_sheets: Some(Vec::new()),
            selected_sheet: Some(String::new()),
        });

        info!("published data cleared pending confirmation");
        match storage::clear(&self.store) {
            Ok(()) => Ok(Notice::new(
                NoticeLevel::Success,
                "Data cleared from display. Click 'Apply Changes' to confirm.",
            )),
            Err(e) => {
                warn!("failed to clear store: {}", e);
                Ok(Notice::new(
                    NoticeLevel::Warning,
                    format!("Data cleared from display, but stored data could not be removed: {}", e),
                ))
            }
        }
    }

    /// Every difference a commit would publish, in a fixed order: new file,
    /// sheets made visible, sheets hidden, selection change.
    ///
    /// Compared against the state before the edit began (the pre-clear state
    /// if data was cleared). Yields a single [`Change::NoChanges`] when
    /// nothing differs.
    pub fn change_summary(&self) -> Vec<Change> {
        let Some(overlay) = self.overlay() else {
            return vec![Change::NoChanges];
        };
        let baseline = self
            .recovery
            .as_ref()
            .map(|r| &r.published.visibility)
            .unwrap_or(&self.published.visibility);

        let mut changes = Vec::new();

        if let Some(WorkbookChange::Replace(_)) = overlay.workbook {
            changes.push(Change::NewFile);
        }

        if let Some(visible) = &overlay.visible_sheets {
            let current = baseline.visible_sheets();
            let added: Vec<String> = visible
                .iter()
                .filter(|s| !current.contains(s))
                .cloned()
                .collect();
            let removed: Vec<String> = current
                .iter()
                .filter(|s| !visible.contains(s))
                .cloned()
                .collect();
            if !added.is_empty() {
                changes.push(Change::VisibilityAdded(added));
            }
            if !removed.is_empty() {
                changes.push(Change::VisibilityRemoved(removed));
            }
        }

        if let Some(selected) = &overlay.selected_sheet {
            if !selected.is_empty() && selected != baseline.selected_sheet() {
                changes.push(Change::SelectionChanged(selected.clone()));
            }
        }

        if changes.is_empty() {
            changes.push(Change::NoChanges);
        }
        changes
    }

    /// Publish the overlay.
    ///
    /// Only the fields that were staged are written to the store. A failed
    /// write is reported in the returned notice but the in-memory published
    /// state keeps the committed values.
    pub fn commit(&mut self) -> Result<Notice, ValidationError> {
        if self.change_summary() == [Change::NoChanges] {
            return Err(ValidationError::NoChanges);
        }
        let EditState::Pending(overlay) = mem::take(&mut self.state) else {
            return Err(ValidationError::NoChanges);
        };
        self.recovery = None;

        let mut failures: Vec<PersistenceError> = Vec::new();

        if let Some(WorkbookChange::Clear) = overlay.workbook {
            self.published = PublishedState::default();
            record(&mut failures, storage::clear(&self.store));
            info!("cleared published data");
            return Ok(commit_notice(failures));
        }

        if let Some(WorkbookChange::Replace(workbook)) = overlay.workbook {
            record(&mut failures, storage::write_workbook(&self.store, &workbook));
            self.published.workbook = Some(workbook);
        }

        let current = &self.published.visibility;
        let visible_changed = overlay.visible_sheets.is_some();
        let staged = VisibilitySet::new(
            overlay
                .visible_sheets
                .unwrap_or_else(|| current.visible_sheets().to_vec()),
            overlay
                .selected_sheet
                .clone()
                .unwrap_or_else(|| current.selected_sheet().to_string()),
        );
        let visibility = staged.clone().normalized();
        if visibility.selected_sheet() != staged.selected_sheet() {
            warn!(
                "selected sheet `{}` is not visible, selecting `{}` instead",
                staged.selected_sheet(),
                visibility.selected_sheet()
            );
        }
        let selection_changed = overlay.selected_sheet.is_some()
            || visibility.selected_sheet() != current.selected_sheet();

        if visible_changed {
            record(
                &mut failures,
                storage::write_visible_sheets(&self.store, visibility.visible_sheets()),
            );
        }
        if selection_changed && !visibility.selected_sheet().is_empty() {
            record(
                &mut failures,
                storage::write_selected_sheet(&self.store, visibility.selected_sheet()),
            );
        }
        self.published.visibility = visibility;

        info!(
            "published {} visible sheet(s), selected `{}`",
            self.published.visibility.visible_sheets().len(),
            self.published.visibility.selected_sheet()
        );
        Ok(commit_notice(failures))
    }

    /// Drop the overlay. If data was cleared in this cycle, published state
    /// and the store are restored from the recovery slot.
    pub fn discard(&mut self) -> Notice {
        self.state = EditState::Clean;

        let Some(recovery) = self.recovery.take() else {
            info!("pending changes discarded");
            return Notice::new(NoticeLevel::Info, "Changes have been discarded!");
        };

        self.published = recovery.published;
        info!("pending changes discarded, cleared data restored");
        match recovery.stored.restore(&self.store) {
            Ok(()) => Notice::new(NoticeLevel::Info, "Changes have been discarded!"),
            Err(e) => {
                warn!("failed to restore stored data: {}", e);
                Notice::new(
                    NoticeLevel::Warning,
                    format!("Changes have been discarded, but stored data could not be restored: {}", e),
                )
            }
        }
    }
}

fn record(failures: &mut Vec<PersistenceError>, result: Result<(), PersistenceError>) {
    if let Err(e) = result {
        warn!("persisting published state failed: {}", e);
        failures.push(e);
    }
}

fn commit_notice(failures: Vec<PersistenceError>) -> Notice {
    match failures.first() {
        None => Notice::new(NoticeLevel::Success, "Changes have been applied successfully!"),
        Some(e) => Notice::new(
            NoticeLevel::Warning,
            format!("Changes have been applied but could not be saved: {}", e),
        ),
    }
}

/// Slot contents `state` would have produced, for when the store cannot be read.
fn snapshot_of(state: &PublishedState) -> Result<StoreSnapshot, PersistenceError> {
    let scratch = MemoryStore::new();
    if let Some(workbook) = &state.workbook {
        storage::write_workbook(&scratch, workbook)?;
    }
    storage::write_visible_sheets(&scratch, state.visibility.visible_sheets())?;
    if !state.visibility.selected_sheet().is_empty() {
        storage::write_selected_sheet(&scratch, state.visibility.selected_sheet())?;
    }
    StoreSnapshot::capture(&scratch)
}
