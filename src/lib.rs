/*!
# Sheet Viewer

A small spreadsheet publishing service built in Rust.

## Overview

One administrator uploads a spreadsheet (`.xlsx`, `.xls` or `.csv`), picks
which of its sheets end users may see and which one they land on, and
publishes the result. Everyone else browses the published sheets read-only,
with per-column filters, case-insensitive search and pagination.

## Architecture

### Core
- **Ingestion** (`loader`, `workbook`, `dataset`, `cell`) - parses uploads into
  an ordered workbook of tabular sheets keyed by header names
- **Query engine** (`view`) - exact-match filters, substring search, 30-row pages
  and distinct column values for filter pickers
- **Publishing** (`visibility`, `staged`, `storage`) - the admin's staged edits,
  the commit/discard cycle and the four-slot session store
- **Read side** (`viewer`) - the visible part of the published workbook

### Web layer (feature `web`)
- **login** - admin credential check and bearer-token sessions
- **config** - environment-based server settings
- **downloader** - CSV and XLSX export of a filtered view
- **app** - axum routing, auth middleware and request logging

## Publishing flow

Changes are staged first and only reach end users on commit:

1. Upload a file; its first sheet is staged as the only visible sheet
2. Adjust visible sheets and the selected sheet
3. Review the change summary
4. Commit, or discard to return to the published state

Clearing published data takes effect immediately but can still be undone by
discarding before the next commit.

## REST API Endpoints

- `POST /auth/login`, `POST /auth/logout` - admin session
- `/api/admin/...` - upload, visibility, clear, changes, commit, discard
- `GET /api/sheets` - visible sheets and the default selection
- `GET /api/sheets/{name}/rows` - one page of filtered rows
- `GET /api/sheets/{name}/columns/{column}/values` - filter choices
- `GET /api/sheets/{name}/export` - filtered rows as CSV or XLSX
*/

pub mod cell;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod staged;
pub mod storage;
pub mod view;
pub mod viewer;
pub mod visibility;
pub mod workbook;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod downloader;
#[cfg(feature = "web")]
pub mod login;

/// Re-export the core types to make the crate easier to use
pub use cell::CellValue;
pub use dataset::{ColumnKind, Row, TabularDataset};
pub use error::{AuthError, ParseError, PersistenceError, ValidationError};
pub use staged::{Change, EditSession, Notice, NoticeLevel};
pub use storage::{MemoryStore, PublishedState, SessionStore, Slot};
pub use view::{PAGE_SIZE, ViewPage, ViewQuery};
pub use viewer::Viewer;
pub use visibility::VisibilitySet;
pub use workbook::Workbook;
