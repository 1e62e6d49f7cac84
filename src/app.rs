#![cfg(feature = "web")]

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::cell::CellValue;
use crate::config::Config;
use crate::dataset::{Row, TabularDataset};
use crate::downloader::{self, ExportError, ExportFormat};
use crate::error::{AuthError, ParseError, ValidationError};
use crate::loader::{self, FileKind};
use crate::login::{self, AdminCredentials, Role, SessionTable, UserCredentials};
use crate::staged::{Change, EditSession, Notice};
use crate::storage::MemoryStore;
use crate::view::{self, PAGE_SIZE, ViewQuery};
use crate::viewer::Viewer;
use crate::visibility::VisibilitySet;
use crate::workbook::Workbook;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Multipart field carrying the spreadsheet.
const UPLOAD_FIELD: &str = "file";

pub struct AppState {
    credentials: AdminCredentials,
    sessions: SessionTable,
    store: MemoryStore,
    editor: Mutex<EditSession<MemoryStore>>,
}

impl AppState {
    pub fn new(credentials: AdminCredentials) -> Self {
        AppState::with_store(credentials, MemoryStore::new())
    }

    /// Share `store` between the admin session and the public read side.
    pub fn with_store(credentials: AdminCredentials, store: MemoryStore) -> Self {
        AppState {
            credentials,
            sessions: SessionTable::default(),
            editor: Mutex::new(EditSession::open(store.clone())),
            store,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    fn editor(&self) -> MutexGuard<'_, EditSession<MemoryStore>> {
        self.editor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Auth(AuthError::Hashing) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Parse(ParseError::UnsupportedType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(ValidationError::UnknownSheet(_)) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::CONFLICT,
            ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the application router.
///
/// `/auth/login` and the `/api/sheets` read side are public; everything under
/// `/api/admin` and `/auth/logout` needs an admin bearer token.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/auth/logout", post(handle_logout))
        .route("/api/admin/state", get(admin_state))
        .route("/api/admin/upload", post(upload_workbook))
        .route("/api/admin/visible", put(set_visible))
        .route("/api/admin/selected", put(set_selected))
        .route("/api/admin/clear", post(clear_data))
        .route("/api/admin/changes", get(change_summary))
        .route("/api/admin/commit", post(commit_changes))
        .route("/api/admin/discard", post(discard_changes))
        .route("/api/admin/sheets/:name/rows", get(preview_rows))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/auth/login", post(handle_login))
        .route("/api/sheets", get(list_sheets))
        .route("/api/sheets/:name/rows", get(sheet_rows))
        .route("/api/sheets/:name/columns/:column/values", get(column_values))
        .route("/api/sheets/:name/export", get(export_sheet))
        .merge(admin)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(log_requests))
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, header::InvalidHeaderValue> {
    Ok(match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    })
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = AdminCredentials::new(&config.admin_username, &config.admin_password)?;
    let state = Arc::new(AppState::new(credentials));

    let app = router(state).layer(cors_layer(config.cors_origin.as_deref())?);

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

/// Authentication middleware
///
/// Lets the request through only with a live admin bearer token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Response {
    match auth {
        Some(TypedHeader(authorization))
            if state.sessions.validate(authorization.token()) == Some(Role::Admin) =>
        {
            next.run(request).await
        }
        _ => ApiError::Auth(AuthError::Unauthorized).into_response(),
    }
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

/// Exchange the admin credential pair for a bearer token.
#[axum::debug_handler]
async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<UserCredentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = login::authenticate(
        &state.credentials,
        &state.sessions,
        &credentials.username,
        &credentials.password,
    )?;
    Ok(Json(TokenResponse { token }))
}

async fn handle_logout(
    State(state): State<Arc<AppState>>,
    TypedHeader(authorization): TypedHeader<Authorization<Bearer>>,
) -> StatusCode {
    state.sessions.revoke(authorization.token());
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct SheetsView {
    sheets: Vec<String>,
    visible_sheets: Vec<String>,
    selected_sheet: String,
}

impl SheetsView {
    fn new(workbook: Option<&Workbook>, visibility: &VisibilitySet) -> Self {
        SheetsView {
            sheets: workbook
                .map(|w| w.sheet_names().to_vec())
                .unwrap_or_default(),
            visible_sheets: visibility.visible_sheets().to_vec(),
            selected_sheet: visibility.selected_sheet().to_string(),
        }
    }
}

#[derive(Serialize)]
struct AdminStateResponse {
    pending: bool,
    published: SheetsView,
    staged: SheetsView,
    changes: Vec<Change>,
}

fn admin_snapshot(editor: &EditSession<MemoryStore>) -> AdminStateResponse {
    let published = editor.published();
    AdminStateResponse {
        pending: editor.has_pending_changes(),
        published: SheetsView::new(published.workbook.as_ref(), &published.visibility),
        staged: SheetsView::new(editor.effective_workbook(), &editor.effective_visibility()),
        changes: editor.change_summary(),
    }
}

async fn admin_state(State(state): State<Arc<AppState>>) -> Json<AdminStateResponse> {
    Json(admin_snapshot(&state.editor()))
}

async fn upload_workbook(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Notice>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let declared = field.content_type().unwrap_or_default().to_string();
        // Reject the type before reading or parsing the body.
        FileKind::from_declared_type(&declared)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ParseError::Unreadable(e.to_string()))?;
        upload = Some((declared, bytes.to_vec()));
    }

    let Some((declared, bytes)) = upload else {
        return Err(ApiError::BadRequest(format!(
            "missing `{}` field in upload",
            UPLOAD_FIELD
        )));
    };

    if state.editor().published().has_data() {
        return Err(ValidationError::DataAlreadyPublished.into());
    }
    let workbook = loader::load_bytes(&bytes, &declared)?;
    let notice = state.editor().load_workbook(workbook)?;
    Ok(Json(notice))
}

#[derive(Deserialize)]
struct VisibleRequest {
    sheets: Vec<String>,
}

async fn set_visible(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VisibleRequest>,
) -> Result<Json<AdminStateResponse>, ApiError> {
    let mut editor = state.editor();
    editor.set_visible(request.sheets)?;
    Ok(Json(admin_snapshot(&editor)))
}

#[derive(Deserialize)]
struct SelectedRequest {
    sheet: String,
}

async fn set_selected(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectedRequest>,
) -> Json<AdminStateResponse> {
    let mut editor = state.editor();
    editor.set_selected(request.sheet);
    Json(admin_snapshot(&editor))
}

async fn clear_data(State(state): State<Arc<AppState>>) -> Result<Json<Notice>, ApiError> {
    Ok(Json(state.editor().clear_data()?))
}

async fn change_summary(State(state): State<Arc<AppState>>) -> Json<Vec<Change>> {
    Json(state.editor().change_summary())
}

async fn commit_changes(State(state): State<Arc<AppState>>) -> Result<Json<Notice>, ApiError> {
    Ok(Json(state.editor().commit()?))
}

async fn discard_changes(State(state): State<Arc<AppState>>) -> Json<Notice> {
    Json(state.editor().discard())
}

/// Read `page`, `filter.<column>` and `search.<column>` query parameters.
fn query_from_params(params: &HashMap<String, String>) -> Result<ViewQuery, ApiError> {
    let mut query = ViewQuery::new();
    for (key, value) in params {
        if let Some(column) = key.strip_prefix("filter.") {
            query.set_filter(column, value.as_str());
        } else if let Some(column) = key.strip_prefix("search.") {
            query.set_search(column, value.as_str());
        }
    }
    if let Some(page) = params.get("page") {
        let page = page
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid page `{}`", page)))?;
        query.set_page(page);
    }
    Ok(query)
}

#[derive(Serialize)]
struct RowsResponse<'a> {
    sheet: &'a str,
    columns: &'a [String],
    rows: Vec<&'a Row>,
    page: usize,
    page_size: usize,
    total_pages: usize,
    match_count: usize,
}

fn rows_response<'a>(sheet: &'a str, dataset: &'a TabularDataset, query: &ViewQuery) -> RowsResponse<'a> {
    let page = query.evaluate(dataset);
    RowsResponse {
        sheet,
        columns: dataset.columns(),
        rows: page.rows,
        page: page.page,
        page_size: PAGE_SIZE,
        total_pages: page.total_pages,
        match_count: page.match_count,
    }
}

/// Admin preview of a sheet as it would be published.
async fn preview_rows(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let query = query_from_params(&params)?;
    let editor = state.editor();
    let dataset = editor
        .effective_workbook()
        .and_then(|w| w.sheet(&name))
        .ok_or_else(|| ApiError::NotFound(format!("no sheet named `{}`", name)))?;
    Ok(Json(rows_response(&name, dataset, &query)).into_response())
}

#[derive(Serialize)]
struct SheetListResponse {
    sheets: Vec<String>,
    selected_sheet: Option<String>,
}

async fn list_sheets(State(state): State<Arc<AppState>>) -> Json<SheetListResponse> {
    let viewer = Viewer::open(&state.store);
    Json(SheetListResponse {
        sheets: viewer.sheet_names().to_vec(),
        selected_sheet: viewer.selected_sheet().map(str::to_string),
    })
}

/// Open the published state with `name` selected, or 404 if it is not visible.
fn viewer_for(state: &AppState, name: &str) -> Result<Viewer, ApiError> {
    let mut viewer = Viewer::open(&state.store);
    viewer
        .select(name)
        .map_err(|_| ApiError::NotFound(format!("no visible sheet named `{}`", name)))?;
    Ok(viewer)
}

async fn sheet_rows(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let mut viewer = viewer_for(&state, &name)?;
    *viewer.query_mut() = query_from_params(&params)?;
    let dataset = viewer
        .dataset()
        .ok_or_else(|| ApiError::NotFound(format!("no visible sheet named `{}`", name)))?;
    Ok(Json(rows_response(&name, dataset, viewer.query())).into_response())
}

async fn column_values(
    State(state): State<Arc<AppState>>,
    Path((name, column)): Path<(String, String)>,
) -> Result<Json<Vec<CellValue>>, ApiError> {
    let viewer = viewer_for(&state, &name)?;
    let dataset = viewer
        .dataset()
        .ok_or_else(|| ApiError::NotFound(format!("no visible sheet named `{}`", name)))?;
    Ok(Json(view::column_domain(dataset, &column)))
}

/// Download every row matching the filters, not just one page.
async fn export_sheet(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let format = match params.get("format") {
        Some(f) => ExportFormat::parse(f)
            .ok_or_else(|| ApiError::BadRequest(format!("unsupported export format `{}`", f)))?,
        None => ExportFormat::Csv,
    };
    let query = query_from_params(&params)?;
    let viewer = viewer_for(&state, &name)?;
    let dataset = viewer
        .dataset()
        .ok_or_else(|| ApiError::NotFound(format!("no visible sheet named `{}`", name)))?;
    let rows = query.matching(dataset);

    let body = match format {
        ExportFormat::Csv => downloader::to_csv(dataset, &rows)?.into_bytes(),
        ExportFormat::Xlsx => downloader::to_xlsx(&name, dataset, &rows)?,
    };
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        name.replace('"', ""),
        format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
