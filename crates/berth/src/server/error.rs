use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use berth_container::ContainerError;
use berth_core::CoreError;
use serde::Serialize;

const HINT_MARKER: &str = "\n\nヒント:";

/// API のエラー応答 `{success: false, error, hint?}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn body(&self) -> ErrorBody {
        let (error, hint) = match self.message.split_once(HINT_MARKER) {
            Some((error, hint)) => (error.to_string(), Some(hint.trim().to_string())),
            None => (self.message.clone(), None),
        };
        ErrorBody {
            success: false,
            error,
            hint,
        }
    }
}

fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::ProcessNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::DuplicateName(_) => StatusCode::CONFLICT,
        CoreError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::new(core_status(&err), err.to_string())
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        let status = match &err {
            ContainerError::Core(core) => core_status(core),
            ContainerError::ContainerNotFound { .. } | ContainerError::ProjectDirNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ContainerError::ContainerNotRunning { .. } | ContainerError::DirectoryExists(_) => {
                StatusCode::CONFLICT
            }
            ContainerError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ContainerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ContainerError::DockerConnectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.message);
        }
        (status, Json(self.body())).into_response()
    }
}
