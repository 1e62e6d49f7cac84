#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use sheetview::app::{AppState, router};
use sheetview::login::AdminCredentials;

const BOUNDARY: &str = "sheetview-test-boundary";

fn app() -> Router {
    let credentials = AdminCredentials::new("admin", "s3cret").unwrap();
    router(Arc::new(AppState::new(credentials)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn upload(token: &str, content_type: &str, contents: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"scores.csv\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/admin/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn scores_csv(rows: usize) -> Vec<u8> {
    let mut csv = String::from("Name,Score\n");
    for i in 0..rows {
        csv.push_str(&format!("player{},{}\n", i, i % 5));
    }
    csv.into_bytes()
}

async fn login(app: &Router) -> String {
    let (status, body) = send(
        app,
        send_json("POST", "/auth/login", None, json!({"username": "admin", "password": "s3cret"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn publish_scores(app: &Router, token: &str) {
    let (status, _) = send(app, upload(token, "text/csv", &scores_csv(35))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(app, send_json("POST", "/api/admin/commit", Some(token), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], "success");
}

#[tokio::test]
async fn admin_routes_need_a_token() {
    let app = app();
    let (status, body) = send(&app, get("/api/admin/state", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication required");

    let (status, _) = send(&app, get("/api/admin/state", Some("forged"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_credentials_are_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        send_json("POST", "/auth/login", None, json!({"username": "admin", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"message": "Invalid credentials"}));
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = app();
    let token = login(&app).await;

    let (status, _) = send(&app, send_json("POST", "/auth/logout", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get("/api/admin/state", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn staged_upload_is_invisible_until_commit() {
    let app = app();
    let token = login(&app).await;

    let (status, _) = send(&app, upload(&token, "text/csv", &scores_csv(3))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, sheets) = send(&app, get("/api/sheets", None)).await;
    assert_eq!(sheets, json!({"sheets": [], "selected_sheet": null}));

    let (_, changes) = send(&app, get("/api/admin/changes", Some(&token))).await;
    assert_eq!(
        changes,
        json!([
            {"type": "file", "description": "New Excel file loaded"},
            {"type": "visibility-added", "description": "Made visible: Sheet1"},
            {"type": "selection", "description": "Changed selected sheet to: Sheet1"},
        ])
    );

    let (status, _) = send(&app, send_json("POST", "/api/admin/commit", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, sheets) = send(&app, get("/api/sheets", None)).await;
    assert_eq!(sheets, json!({"sheets": ["Sheet1"], "selected_sheet": "Sheet1"}));
}

#[tokio::test]
async fn rows_are_filtered_and_paged() {
    let app = app();
    let token = login(&app).await;
    publish_scores(&app, &token).await;

    let (status, page) = send(&app, get("/api/sheets/Sheet1/rows?page=2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["match_count"], 35);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["page"], 2);
    assert_eq!(page["page_size"], 30);
    assert_eq!(page["rows"].as_array().unwrap().len(), 5);
    assert_eq!(page["columns"], json!(["Name", "Score"]));

    let (_, page) = send(&app, get("/api/sheets/Sheet1/rows?filter.Score=0&search.Name=PLAYER1", None)).await;
    assert_eq!(
        page["rows"],
        json!([{"Name": "player10", "Score": 0}, {"Name": "player15", "Score": 0}])
    );

    let (_, values) = send(&app, get("/api/sheets/Sheet1/columns/Score/values", None)).await;
    assert_eq!(values, json!([0, 1, 2, 3, 4]));

    let (status, _) = send(&app, get("/api/sheets/Sheet1/rows?page=two", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/sheets/Hidden/rows", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_returns_matching_rows() {
    let app = app();
    let token = login(&app).await;
    publish_scores(&app, &token).await;

    let response = app
        .clone()
        .oneshot(get("/api/sheets/Sheet1/export?format=csv&filter.Score=4&search.Name=player1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Sheet1.csv\""
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Name,Score\nplayer14,4\nplayer19,4\n");

    let (status, _) = send(&app, get("/api/sheets/Sheet1/export?format=pdf", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploads_are_validated() {
    let app = app();
    let token = login(&app).await;

    let (status, body) = send(&app, upload(&token, "application/pdf", b"%PDF-1.4")).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body["message"].as_str().unwrap().starts_with("Please select only Excel file types"));

    publish_scores(&app, &token).await;
    let (status, _) = send(&app, upload(&token, "text/csv", &scores_csv(2))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, send_json("POST", "/api/admin/commit", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "No changes to apply");
}

#[tokio::test]
async fn clear_and_discard_round_trip() {
    let app = app();
    let token = login(&app).await;
    publish_scores(&app, &token).await;

    let (status, _) = send(&app, send_json("POST", "/api/admin/clear", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, sheets) = send(&app, get("/api/sheets", None)).await;
    assert_eq!(sheets["sheets"], json!([]));

    let (status, body) = send(&app, send_json("POST", "/api/admin/discard", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Changes have been discarded!");
    let (_, sheets) = send(&app, get("/api/sheets", None)).await;
    assert_eq!(sheets["sheets"], json!(["Sheet1"]));
}

#[tokio::test]
async fn visibility_is_validated() {
    let app = app();
    let token = login(&app).await;
    publish_scores(&app, &token).await;

    let (status, body) = send(
        &app,
        send_json("PUT", "/api/admin/visible", Some(&token), json!({"sheets": []})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "At least one sheet must be visible to users");

    let (status, _) = send(
        &app,
        send_json("PUT", "/api/admin/visible", Some(&token), json!({"sheets": ["Nope"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, state) = send(&app, get("/api/admin/state", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["pending"], false);
    assert_eq!(state["published"]["visible_sheets"], json!(["Sheet1"]));
}
