//! Thin adapter from HTTP verbs to the engine facade (§2 item 10, §6
//! EXPANDED). No business logic lives here — grounded on the axum usage
//! in the example pack's standalone recording-service files.

use std::sync::Arc;

use axum::extract::{Multipart, Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/start", post(start))
        .route("/api/status/:id", get(status))
        .route("/api/cancel/:id", post(cancel))
        .route("/api/download/:id", get(download))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

fn check_auth(engine: &Engine, headers: &HeaderMap, token_query: Option<&str>) -> bool {
    let Some(expected) = engine.config().api_auth_token.as_deref() else {
        return true;
    };
    let header_token = headers.get("X-API-Token").and_then(|v| v.to_str().ok());
    header_token == Some(expected) || token_query == Some(expected)
}

async fn health(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    let view = engine.health();
    Json(serde_json::to_value(view).unwrap_or_else(|_| json!({"ok": false})))
}

#[derive(Deserialize)]
struct StartQuery {
    token: Option<String>,
}

async fn start(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Query(query): Query<StartQuery>,
    mut multipart: Multipart,
) -> Response {
    if !check_auth(&engine, &headers, query.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "unauthorized"}))).into_response();
    }

    let mut language = "auto".to_string();
    let mut model = "nova-2-general".to_string();
    let mut original_name = "upload".to_string();
    let mut options = serde_json::Map::new();
    let mut file_bytes: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": err.to_string()}))).into_response();
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                original_name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                    Err(err) => {
                        return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": err.to_string()})))
                            .into_response();
                    }
                }
            }
            "language" => {
                if let Ok(text) = field.text().await {
                    language = text;
                }
            }
            "model" => {
                if let Ok(text) = field.text().await {
                    model = text;
                }
            }
            "options" => {
                if let Ok(text) = field.text().await {
                    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&text) {
                        options = map;
                    }
                }
            }
            _ => {}
        }
    }

    let Some(bytes) = file_bytes else {
        return (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": "missing file"}))).into_response();
    };

    let id = engine.new_job_id();
    let upload_dir = engine.config().uploads_dir().join(&id);
    if let Err(err) = std::fs::create_dir_all(&upload_dir) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false, "error": err.to_string()}))).into_response();
    }
    let safe_name = sanitize_filename(&original_name);
    let dest = upload_dir.join(&safe_name);
    if let Err(err) = std::fs::write(&dest, &bytes) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false, "error": err.to_string()}))).into_response();
    }

    let job_id = engine.submit(crate::engine::SubmitRequest {
        id,
        file_path: dest,
        language,
        model,
        original_name: safe_name,
        options,
    });

    (StatusCode::OK, Json(json!({"ok": true, "job_id": job_id}))).into_response()
}

fn sanitize_filename(name: &str) -> String {
    let base = std::path::Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Deserialize)]
struct StatusQuery {
    since: Option<u64>,
    token: Option<String>,
}

async fn status(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if !check_auth(&engine, &headers, query.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "unauthorized"}))).into_response();
    }
    match engine.status(&id, query.since.unwrap_or(0)) {
        Some(view) => Json(serde_json::to_value(view).unwrap_or_else(|_| json!({"ok": false}))).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"ok": false, "error": "job not found"}))).into_response(),
    }
}

async fn cancel(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if !check_auth(&engine, &headers, query.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "unauthorized"}))).into_response();
    }
    if engine.cancel(&id) {
        Json(json!({"ok": true})).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"ok": false, "error": "job not found"}))).into_response()
    }
}

async fn download(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if !check_auth(&engine, &headers, query.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"ok": false, "error": "unauthorized"}))).into_response();
    }
    let Some((path, download_name, _job)) = engine.download_path(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"ok": false, "error": "not ready"}))).into_response();
    };
    match std::fs::read(&path) {
        Ok(bytes) => {
            engine.mark_downloaded(&id);
            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\"").parse().unwrap(),
            );
            (StatusCode::OK, headers, bytes).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false, "error": err.to_string()}))).into_response(),
    }
}
