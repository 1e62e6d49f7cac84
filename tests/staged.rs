use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};

use sheetview::error::PersistenceError;
use sheetview::staged::EditState;
use sheetview::storage::{self, StoreSnapshot};
use sheetview::{
    Change, EditSession, MemoryStore, NoticeLevel, Row, SessionStore, Slot, TabularDataset,
    ValidationError, VisibilitySet, Workbook,
};

fn month(name: &str) -> (String, TabularDataset) {
    let rows = vec![
        Row::new().with("Month", name).with("Sales", 120i64),
        Row::new().with("Month", name).with("Sales", 80.5),
    ];
    (name.to_string(), TabularDataset::new(rows))
}

fn workbook(names: &[&str]) -> Workbook {
    Workbook::from_sheets(names.iter().map(|n| month(n))).unwrap()
}

fn sheets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Publish Jan and Feb, both visible, Feb selected.
fn published() -> EditSession {
    let mut session = EditSession::open(MemoryStore::new());
    session.load_workbook(workbook(&["Jan", "Feb"])).unwrap();
    session.set_visible(sheets(&["Jan", "Feb"])).unwrap();
    session.set_selected("Feb");
    session.commit().unwrap();
    session
}

#[test]
fn loading_stages_first_sheet_only() {
    let mut session = EditSession::open(MemoryStore::new());
    let notice = session.load_workbook(workbook(&["Jan", "Feb"])).unwrap();

    assert_eq!(notice.level, NoticeLevel::Success);
    assert!(session.has_pending_changes());
    assert!(!session.published().has_data());
    assert_eq!(session.effective_visibility(), VisibilitySet::initial("Jan"));
    assert_eq!(
        session.change_summary(),
        vec![
            Change::NewFile,
            Change::VisibilityAdded(sheets(&["Jan"])),
            Change::SelectionChanged("Jan".to_string()),
        ]
    );
}

#[test]
fn commit_publishes_and_persists() {
    let session = published();
    let store = session.store();

    assert_eq!(session.state(), &EditState::Clean);
    assert_eq!(
        session.published().visibility,
        VisibilitySet::new(sheets(&["Jan", "Feb"]), "Feb")
    );
    assert_eq!(store.get(Slot::SheetNames).unwrap().as_deref(), Some(r#"["Jan","Feb"]"#));
    assert_eq!(store.get(Slot::VisibleSheets).unwrap().as_deref(), Some(r#"["Jan","Feb"]"#));
    assert_eq!(store.get(Slot::SelectedSheet).unwrap().as_deref(), Some("Feb"));
    assert_eq!(
        store.get(Slot::ExcelData).unwrap().as_deref(),
        Some(
            r#"{"Jan":[{"Month":"Jan","Sales":120},{"Month":"Jan","Sales":80.5}],"Feb":[{"Month":"Feb","Sales":120},{"Month":"Feb","Sales":80.5}]}"#
        )
    );

    let reopened = EditSession::open(store.clone());
    assert_eq!(reopened.published(), session.published());
}

#[test]
fn upload_is_blocked_while_data_is_published() {
    let mut session = published();
    assert_eq!(
        session.load_workbook(workbook(&["Mar"])),
        Err(ValidationError::DataAlreadyPublished)
    );
    assert!(!session.has_pending_changes());
}

#[test]
fn second_upload_replaces_pending_one() {
    let mut session = EditSession::open(MemoryStore::new());
    session.load_workbook(workbook(&["Jan"])).unwrap();
    session.load_workbook(workbook(&["Mar", "Apr"])).unwrap();

    assert_eq!(
        session.effective_workbook().map(|w| w.sheet_names().to_vec()),
        Some(sheets(&["Mar", "Apr"]))
    );
    assert_eq!(session.effective_visibility(), VisibilitySet::initial("Mar"));
}

#[test]
fn commit_without_changes_is_rejected() {
    let mut session = published();
    assert_eq!(session.change_summary(), vec![Change::NoChanges]);
    assert_eq!(session.commit(), Err(ValidationError::NoChanges));

    // Re-selecting the published selection is not a change either.
    session.set_selected("Feb");
    assert_eq!(session.change_summary(), vec![Change::NoChanges]);
    assert_eq!(session.commit(), Err(ValidationError::NoChanges));
}

#[test]
fn visibility_changes_are_summarised() {
    let mut session = published();
    session.set_visible(sheets(&["Jan"])).unwrap();

    assert_eq!(
        session.change_summary(),
        vec![
            Change::VisibilityRemoved(sheets(&["Feb"])),
            Change::SelectionChanged("Jan".to_string()),
        ]
    );

    session.commit().unwrap();
    assert_eq!(session.published().visibility, VisibilitySet::initial("Jan"));
    assert_eq!(session.store().get(Slot::SelectedSheet).unwrap().as_deref(), Some("Jan"));
}

#[test]
fn invalid_visibility_leaves_state_untouched() {
    let mut session = published();
    assert_eq!(session.set_visible(Vec::new()), Err(ValidationError::EmptyVisibleSet));
    assert_eq!(
        session.set_visible(sheets(&["Dec"])),
        Err(ValidationError::UnknownSheet("Dec".to_string()))
    );
    assert_eq!(session.state(), &EditState::Clean);
}

#[test]
fn hidden_selection_falls_back_on_commit() {
    let mut session = published();
    session.set_selected("Mar");
    session.commit().unwrap();

    assert_eq!(session.published().visibility.selected_sheet(), "Jan");
    assert_eq!(session.store().get(Slot::SelectedSheet).unwrap().as_deref(), Some("Jan"));
}

#[test]
fn discard_drops_pending_changes() {
    let mut session = published();
    let before = session.published().clone();
    let stored = StoreSnapshot::capture(session.store()).unwrap();

    session.set_visible(sheets(&["Jan"])).unwrap();
    let notice = session.discard();

    assert_eq!(notice.message, "Changes have been discarded!");
    assert_eq!(session.state(), &EditState::Clean);
    assert_eq!(session.published(), &before);
    assert_eq!(StoreSnapshot::capture(session.store()).unwrap(), stored);
    assert_eq!(session.commit(), Err(ValidationError::NoChanges));
}

#[test]
fn clear_then_discard_restores_everything() {
    let mut session = published();
    let before = session.published().clone();
    let stored = StoreSnapshot::capture(session.store()).unwrap();

    session.clear_data().unwrap();
    assert!(!session.published().has_data());
    assert!(session.effective_workbook().is_none());
    for slot in Slot::ALL {
        assert_eq!(session.store().get(slot).unwrap(), None);
    }

    session.discard();
    assert_eq!(session.published(), &before);
    assert_eq!(StoreSnapshot::capture(session.store()).unwrap(), stored);
}

#[test]
fn clear_then_commit_is_final() {
    let mut session = published();
    session.clear_data().unwrap();

    assert_eq!(
        session.change_summary(),
        vec![Change::VisibilityRemoved(sheets(&["Jan", "Feb"]))]
    );
    let notice = session.commit().unwrap();
    assert_eq!(notice.level, NoticeLevel::Success);

    assert!(!session.published().has_data());
    assert_eq!(session.discard().level, NoticeLevel::Info);
    assert!(!session.published().has_data());

    // A new upload is allowed again.
    session.load_workbook(workbook(&["Mar"])).unwrap();
}

#[test]
fn clear_requires_published_data() {
    let mut session = EditSession::open(MemoryStore::new());
    assert_eq!(session.clear_data(), Err(ValidationError::NothingToClear));
}

#[test]
fn corrupt_store_is_treated_as_empty() {
    let store = MemoryStore::new();
    store.set(Slot::ExcelData, "{not json").unwrap();
    store.set(Slot::SheetNames, r#"["Jan"]"#).unwrap();

    let session = EditSession::open(store.clone());
    assert!(!session.published().has_data());
    assert_eq!(store.get(Slot::ExcelData).unwrap(), None);
}

/// Store whose reads or writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
    unreadable: AtomicBool,
}

impl SessionStore for FlakyStore {
    fn get(&self, slot: Slot) -> Result<Option<String>, PersistenceError> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read {
                slot: slot.key(),
                reason: "storage locked".to_string(),
            });
        }
        self.inner.get(slot)
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), PersistenceError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write {
                slot: slot.key(),
                reason: "quota exceeded".to_string(),
            });
        }
        self.inner.set(slot, value)
    }

    fn remove(&self, slot: Slot) -> Result<(), PersistenceError> {
        self.inner.remove(slot)
    }
}

#[test]
fn failed_write_keeps_committed_state_in_memory() {
    let mut session = EditSession::open(FlakyStore::default());
    session.load_workbook(workbook(&["Jan", "Feb"])).unwrap();
    session.commit().unwrap();

    session.store().broken.store(true, Ordering::SeqCst);
    session.set_visible(sheets(&["Feb"])).unwrap();
    let notice = session.commit().unwrap();

    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(session.published().visibility, VisibilitySet::initial("Feb"));
    assert_eq!(
        session.store().get(Slot::VisibleSheets).unwrap().as_deref(),
        Some(r#"["Jan"]"#)
    );
}

#[test]
fn store_helpers_round_trip_published_state() {
    let store = MemoryStore::new();
    let book = workbook(&["Jan", "Feb"]);
    storage::write_workbook(&store, &book).unwrap();
    storage::write_visible_sheets(&store, &sheets(&["Feb"])).unwrap();
    storage::write_selected_sheet(&store, "Feb").unwrap();

    let state = sheetview::PublishedState::read(&store).unwrap();
    assert_eq!(state.workbook, Some(book));
    assert_eq!(state.visibility, VisibilitySet::initial("Feb"));

    storage::clear(&store).unwrap();
    assert_eq!(sheetview::PublishedState::read(&store).unwrap(), sheetview::PublishedState::default());
}

#[test]
fn hiding_the_staged_selection_selects_first_visible() {
    let mut session = EditSession::open(MemoryStore::new());
    session.load_workbook(workbook(&["Jan", "Feb"])).unwrap();
    assert_eq!(session.effective_visibility().selected_sheet(), "Jan");

    session.set_visible(sheets(&["Feb"])).unwrap();
    assert_eq!(session.effective_visibility(), VisibilitySet::initial("Feb"));
}

#[test]
fn clear_on_unreadable_store_still_restores_on_discard() {
    let mut session = EditSession::open(FlakyStore::default());
    session.load_workbook(workbook(&["Jan", "Feb"])).unwrap();
    session.set_visible(sheets(&["Feb", "Jan"])).unwrap();
    session.commit().unwrap();
    let before = session.published().clone();
    let stored = StoreSnapshot::capture(&session.store().inner).unwrap();

    session.store().unreadable.store(true, Ordering::SeqCst);
    session.clear_data().unwrap();
    session.store().unreadable.store(false, Ordering::SeqCst);
    assert!(!session.published().has_data());

    session.discard();
    assert_eq!(session.published(), &before);
    assert_eq!(StoreSnapshot::capture(&session.store().inner).unwrap(), stored);
}

/// Hide Jan and select Feb.
fn stage_feb_only(session: &mut EditSession) {
    session.set_visible(sheets(&["Feb"])).unwrap();
    session.set_selected("Feb");
}

#[test]
fn discard_then_restage_matches_direct_commit() {
    let mut direct = published();
    stage_feb_only(&mut direct);
    direct.commit().unwrap();

    let mut retried = published();
    stage_feb_only(&mut retried);
    retried.discard();
    stage_feb_only(&mut retried);
    retried.commit().unwrap();

    assert_eq!(retried.published(), direct.published());
    assert_eq!(
        StoreSnapshot::capture(retried.store()).unwrap(),
        StoreSnapshot::capture(direct.store()).unwrap()
    );
}

#[test]
fn discard_after_clear_then_recommit_matches_direct_commit() {
    let mut direct = published();
    direct.clear_data().unwrap();
    direct.commit().unwrap();

    let mut retried = published();
    retried.clear_data().unwrap();
    retried.discard();
    retried.clear_data().unwrap();
    retried.commit().unwrap();

    assert_eq!(retried.published(), direct.published());
    assert_eq!(
        StoreSnapshot::capture(retried.store()).unwrap(),
        StoreSnapshot::capture(direct.store()).unwrap()
    );
}
