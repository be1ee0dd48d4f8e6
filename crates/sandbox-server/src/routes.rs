//! HTTP control surface. Every route answers `{ success, data?, error? }`.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use sandbox_transport::{Session, ws_handler};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

#[derive(Debug, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok(data: Value) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(error: impl ToString) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreateTerminalRequest {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileRequest {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StartPreviewRequest {
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ExecuteCommandRequest {
    command: String,
    cwd: Option<PathBuf>,
}

/// Build the control router over one session.
pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/api/terminal", post(create_terminal))
        .route("/api/files", post(write_file))
        .route("/api/preview", post(start_preview))
        .route("/api/command", post(execute_command))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

async fn create_terminal(
    State(session): State<Arc<Session>>,
    Json(request): Json<CreateTerminalRequest>,
) -> Json<ApiResponse> {
    match session.terminals().create(&request.id) {
        Ok(()) => ApiResponse::ok(json!({ "id": request.id })),
        Err(err) => {
            tracing::error!(terminal = %request.id, %err, "terminal create failed");
            ApiResponse::err(err)
        }
    }
}

async fn write_file(
    State(session): State<Arc<Session>>,
    Json(request): Json<WriteFileRequest>,
) -> Json<ApiResponse> {
    let path = session.overlay().write(&request.path, request.content);
    ApiResponse::ok(json!({ "path": path }))
}

async fn start_preview(
    State(session): State<Arc<Session>>,
    Json(request): Json<StartPreviewRequest>,
) -> Json<ApiResponse> {
    let preferred = request.port.unwrap_or(session.context().preview_port);
    match session.preview().start(preferred).await {
        Ok(port) => ApiResponse::ok(json!({ "port": port })),
        Err(err) => {
            tracing::error!(%err, "preview start failed");
            ApiResponse::err(err)
        }
    }
}

async fn execute_command(
    State(session): State<Arc<Session>>,
    Json(request): Json<ExecuteCommandRequest>,
) -> Json<ApiResponse> {
    let cwd = request
        .cwd
        .unwrap_or_else(|| session.context().working_dir().to_path_buf());
    let id = session.runner().submit(request.command, cwd);
    match session.runner().run(id).await {
        Ok(output) => ApiResponse::ok(json!({ "id": id, "output": output })),
        Err(err) => {
            tracing::error!(action = %id, %err, "command execution failed");
            ApiResponse::err(err)
        }
    }
}
