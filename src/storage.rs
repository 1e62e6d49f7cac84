use log::warn;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dataset::TabularDataset;
use crate::error::PersistenceError;
use crate::visibility::VisibilitySet;
use crate::workbook::Workbook;

/// The four named slots of published state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// JSON object: sheet name to array of rows.
    ExcelData,
    /// JSON array of sheet names in workbook order.
    SheetNames,
    /// Plain string.
    SelectedSheet,
    /// JSON array of visible sheet names.
    VisibleSheets,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::ExcelData,
        Slot::SheetNames,
        Slot::SelectedSheet,
        Slot::VisibleSheets,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Slot::ExcelData => "excelData",
            Slot::SheetNames => "sheetNames",
            Slot::SelectedSheet => "selectedSheet",
            Slot::VisibleSheets => "visibleSheets",
        }
    }
}

/// Key-value persistence for published state.
///
/// A missing slot is `Ok(None)`, not an error.
pub trait SessionStore: Send + Sync {
    fn get(&self, slot: Slot) -> Result<Option<String>, PersistenceError>;
    fn set(&self, slot: Slot, value: &str) -> Result<(), PersistenceError>;
    fn remove(&self, slot: Slot) -> Result<(), PersistenceError>;
}

/// In-process store. Clones share the same slots, so an admin session and
/// the public read side see one copy of published state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<Slot, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, slot: Slot) -> Result<Option<String>, PersistenceError> {
        let slots = self.slots.read().map_err(|e| PersistenceError::Read {
            slot: slot.key(),
            reason: e.to_string(),
        })?;
        Ok(slots.get(&slot).cloned())
    }

    fn set(&self, slot: Slot, value: &str) -> Result<(), PersistenceError> {
        let mut slots = self.slots.write().map_err(|e| PersistenceError::Write {
            slot: slot.key(),
            reason: e.to_string(),
        })?;
        slots.insert(slot, value.to_string());
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), PersistenceError> {
        let mut slots = self.slots.write().map_err(|e| PersistenceError::Write {
            slot: slot.key(),
            reason: e.to_string(),
        })?;
        slots.remove(&slot);
        Ok(())
    }
}

/// Raw contents of every slot, captured before a destructive edit so it can
/// be put back byte for byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    values: Vec<(Slot, Option<String>)>,
}

impl StoreSnapshot {
    pub fn capture(store: &dyn SessionStore) -> Result<Self, PersistenceError> {
        let mut values = Vec::with_capacity(Slot::ALL.len());
        for slot in Slot::ALL {
            values.push((slot, store.get(slot)?));
        }
        Ok(StoreSnapshot { values })
    }

    pub fn restore(&self, store: &dyn SessionStore) -> Result<(), PersistenceError> {
        for (slot, value) in &self.values {
            match value {
                Some(v) => store.set(*slot, v)?,
                None => store.remove(*slot)?,
            }
        }
        Ok(())
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.values
            .iter()
            .find(|(s, _)| *s == slot)
            .and_then(|(_, v)| v.as_deref())
    }
}

/// The state end users see: the committed workbook and its visibility.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishedState {
    pub workbook: Option<Workbook>,
    pub visibility: VisibilitySet,
}

impl PublishedState {
    pub fn has_data(&self) -> bool {
        self.workbook.is_some()
    }

    /// Read published state from `store`.
    ///
    /// Without both the data and sheet-name slots there is no published
    /// state. Missing visibility slots default to empty.
    pub fn read(store: &dyn SessionStore) -> Result<Self, PersistenceError> {
        let (Some(data), Some(names)) = (store.get(Slot::ExcelData)?, store.get(Slot::SheetNames)?)
        else {
            return Ok(PublishedState::default());
        };

        let sheet_names: Vec<String> = parse_slot(Slot::SheetNames, &names)?;
        let mut sheets: HashMap<String, TabularDataset> = parse_slot(Slot::ExcelData, &data)?;

        let mut ordered = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            let dataset = sheets.remove(&name).ok_or_else(|| PersistenceError::Corrupt {
                slot: Slot::ExcelData.key(),
                reason: format!("no rows stored for sheet `{}`", name),
            })?;
            ordered.push((name, dataset));
        }
        let workbook = Workbook::from_sheets(ordered).map_err(|e| PersistenceError::Corrupt {
            slot: Slot::SheetNames.key(),
            reason: e.to_string(),
        })?;

        let visible_sheets: Vec<String> = match store.get(Slot::VisibleSheets)? {
            Some(raw) => parse_slot(Slot::VisibleSheets, &raw)?,
            None => Vec::new(),
        };
        let selected_sheet = store.get(Slot::SelectedSheet)?.unwrap_or_default();

        Ok(PublishedState {
            workbook: Some(workbook),
            visibility: VisibilitySet::new(visible_sheets, selected_sheet),
        })
    }

    /// Like [`PublishedState::read`], but unreadable or corrupt state counts
    /// as no state at all.
    pub fn read_or_default(store: &dyn SessionStore) -> Self {
        match PublishedState::read(store) {
            Ok(state) => state,
            Err(e) => {
                warn!("ignoring stored state: {}", e);
                PublishedState::default()
            }
        }
    }
}

fn parse_slot<T: serde::de::DeserializeOwned>(
    slot: Slot,
    raw: &str,
) -> Result<T, PersistenceError> {
    serde_json::from_str(raw).map_err(|e| PersistenceError::Corrupt {
        slot: slot.key(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize + ?Sized>(slot: Slot, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|e| PersistenceError::Write {
        slot: slot.key(),
        reason: e.to_string(),
    })
}

/// Sheet name to rows, in workbook order.
struct WorkbookData<'a>(&'a Workbook);

impl Serialize for WorkbookData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.sheet_names().len()))?;
        for (name, dataset) in self.0.iter() {
            map.serialize_entry(name, dataset)?;
        }
        map.end()
    }
}

pub fn write_workbook(store: &dyn SessionStore, workbook: &Workbook) -> Result<(), PersistenceError> {
    store.set(Slot::ExcelData, &encode(Slot::ExcelData, &WorkbookData(workbook))?)?;
    store.set(Slot::SheetNames, &encode(Slot::SheetNames, workbook.sheet_names())?)
}

pub fn write_visible_sheets(store: &dyn SessionStore, sheets: &[String]) -> Result<(), PersistenceError> {
    store.set(Slot::VisibleSheets, &encode(Slot::VisibleSheets, sheets)?)
}

pub fn write_selected_sheet(store: &dyn SessionStore, sheet: &str) -> Result<(), PersistenceError> {
    store.set(Slot::SelectedSheet, sheet)
}

/// Remove every slot. All slots are attempted; the first failure is returned.
pub fn clear(store: &dyn SessionStore) -> Result<(), PersistenceError> {
    let mut first_error = None;
    for slot in Slot::ALL {
        if let Err(e) = store.remove(slot) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
