//! API handlers

use super::AppState;
use super::error::ApiError;
use axum::Json;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use berth_container::{
    ContainerError, LogStreamer, NewProcess, ProcessListing, StartOutcome, StatusReport,
    StopOutcome,
};
use berth_core::{Permission, Process, Viewer};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

const USER_ID_HEADER: &str = "x-berth-user-id";
const USER_EMAIL_HEADER: &str = "x-berth-user-email";
const USER_ROLE_HEADER: &str = "x-berth-user-role";

/// 認証層が付与したヘッダーから得たリクエスト元
pub struct Caller(pub Viewer);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized(format!("{} ヘッダーがありません", USER_ID_HEADER)))?
            .parse::<u64>()
            .map_err(|_| ApiError::unauthorized(format!("{} が不正です", USER_ID_HEADER)))?;

        let mut viewer = Viewer::new(user_id);
        if let Some(email) = header(parts, USER_EMAIL_HEADER) {
            viewer = viewer.with_email(email);
        }
        if header(parts, USER_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin")) {
            viewer = viewer.admin();
        }
        Ok(Caller(viewer))
    }
}

/// 成否に応じてステータスコードを切り替える
fn outcome_response<T: Serialize>(success: bool, body: T) -> Response {
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(body)).into_response()
}

#[derive(Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub process: Process,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

pub async fn list_processes(
    State(state): State<AppState>,
    Caller(viewer): Caller,
) -> Json<Vec<ProcessListing>> {
    Json(state.app.controller.list_with_status(&viewer).await)
}

pub async fn add_process(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Json(request): Json<NewProcess>,
) -> Result<Response, ApiError> {
    tracing::info!("User {} adding process {}", viewer.user_id, request.name);
    let outcome = state.app.controller.add(request, viewer.user_id).await?;
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

pub async fn delete_process(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let controller = &state.app.controller;
    let process = controller.authorize(&viewer, &name, None).await?;
    if !viewer.owns(&process) {
        return Err(ContainerError::Forbidden {
            name,
            permission: "delete".to_string(),
        }
        .into());
    }
    let process = controller.delete(&process.name).await?;
    Ok(Json(ProcessResponse {
        success: true,
        process,
    }))
}

pub async fn rename_process(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let controller = &state.app.controller;
    controller
        .authorize(&viewer, &name, Some(Permission::Settings))
        .await?;
    let process = controller.rename(&name, request.new_name.trim()).await?;
    Ok(Json(ProcessResponse {
        success: true,
        process,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    let controller = &state.app.controller;
    let process = controller.authorize(&viewer, &name, None).await?;
    Ok(Json(controller.status(&process).await))
}

pub async fn start(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let controller = &state.app.controller;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Start))
        .await?;
    let outcome: StartOutcome = controller.start(&process).await;
    Ok(outcome_response(outcome.success, outcome))
}

pub async fn stop(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let controller = &state.app.controller;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Stop))
        .await?;
    let outcome: StopOutcome = controller.stop(&process).await;
    Ok(outcome_response(outcome.success, outcome))
}

/// 停止と起動の両方の権限が要る
pub async fn restart(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let controller = &state.app.controller;
    controller
        .authorize(&viewer, &name, Some(Permission::Stop))
        .await?;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Start))
        .await?;
    let outcome = controller.restart(&process).await;
    Ok(outcome_response(outcome.success, outcome))
}

pub async fn exec(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Response, ApiError> {
    let command = request.command.trim();
    if command.is_empty() {
        return Err(ApiError::bad_request("コマンドが空です"));
    }
    let controller = &state.app.controller;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Console))
        .await?;
    let outcome = controller.execute(&process, command).await?;
    Ok(outcome_response(outcome.success, outcome))
}

pub async fn clear_logs(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let controller = &state.app.controller;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Console))
        .await?;
    controller.clear_logs(&process).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Logs cleared".to_string(),
    }))
}

/// `data: <line>` の SSE。サーバー停止時にストリームを閉じる
pub async fn logs(
    State(state): State<AppState>,
    Caller(viewer): Caller,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let controller = &state.app.controller;
    let process = controller
        .authorize(&viewer, &name, Some(Permission::Console))
        .await?;
    tracing::debug!("User {} opened log stream for {}", viewer.user_id, name);

    let streamer = LogStreamer::new(controller.inspector().clone(), controller.live().clone());
    let mut shutdown = state.shutdown.clone();
    let closed = async move {
        let signalled = shutdown.wait_for(|stopping| *stopping).await.is_ok();
        if !signalled {
            std::future::pending::<()>().await;
        }
    };

    // `\r` を含むと SSE のフレームが壊れる
    let stream = ReceiverStream::new(streamer.open(&process))
        .map(|line| Ok(Event::default().data(line.replace('\r', ""))))
        .take_until(closed);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.app.config().keepalive())))
}
