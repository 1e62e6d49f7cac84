use thiserror::Error;

/// Rejected credential check or missing/expired bearer token.
///
/// Both credential fields produce the same `InvalidCredentials` message so a
/// caller cannot tell which one was wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Failed to hash admin password")]
    Hashing,
}

/// Failure to turn an uploaded file into a workbook.
///
/// Messages are meant to be shown verbatim next to the upload control.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Please select only Excel file types (got `{0}`)")]
    UnsupportedType(String),

    #[error("Error reading file: {0}")]
    Unreadable(String),

    #[error("Error processing the Excel file. Please check the file format. ({0})")]
    Malformed(String),

    #[error("The Excel file appears to be empty")]
    EmptyWorkbook,

    #[error("Duplicate sheet name `{0}`")]
    DuplicateSheet(String),
}

/// An admin action that was blocked before any state was touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one sheet must be visible to users")]
    EmptyVisibleSet,

    #[error("Unknown sheet `{0}`")]
    UnknownSheet(String),

    #[error("Data is already published. Clear existing data before uploading a new file")]
    DataAlreadyPublished,

    #[error("There is no published data to clear")]
    NothingToClear,

    #[error("No changes to apply")]
    NoChanges,
}

/// Read or write failure on the session store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("failed to read `{slot}`: {reason}")]
    Read { slot: &'static str, reason: String },

    #[error("failed to write `{slot}`: {reason}")]
    Write { slot: &'static str, reason: String },

    #[error("stored `{slot}` is corrupt: {reason}")]
    Corrupt { slot: &'static str, reason: String },
}
