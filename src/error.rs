use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

/// Failures reported by a generation gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("the request was blocked due to: {0}. Please adjust your inputs or prompt.")]
    BlockedContent(String),
    #[error("the model did not return any content. The request may have been blocked or the input was invalid.")]
    NoContent,
    #[error("the AI responded with text instead of an image: \"{0}...\"")]
    NonImageResponse(String),
    #[error("video generation timed out")]
    Timeout,
    #[error("generation failed: {0}")]
    OperationError(String),
    #[error("failed to retrieve the generated result: {0}")]
    TransportFailure(String),
    #[error("HTTP error: status={status} body={body}")]
    Http { status: u16, body: String },
    #[error("could not parse the provider response: {0}")]
    Parse(String),
}

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("another generation is already in progress")]
    Busy,
    #[error("the batch queue cannot be changed this way while a batch run is active")]
    BatchActive,
    #[error("the result arrived after the session was discarded")]
    Discarded,
    #[error("{context} failed: {source}")]
    Gateway { context: &'static str, #[source] source: GatewayError },
}

impl ControllerError {
    pub fn gateway(context: &'static str, source: GatewayError) -> Self {
        ControllerError::Gateway { context, source }
    }
}

/// HTTP-facing error wrapper.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("Preset storage error: {0}")]
    Presets(#[from] crate::presets::PresetError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Controller(err) => match err {
                ControllerError::MissingInput(_) => (StatusCode::BAD_REQUEST, "MISSING_INPUT"),
                ControllerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                ControllerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ControllerError::Busy => (StatusCode::CONFLICT, "BUSY"),
                ControllerError::BatchActive => (StatusCode::CONFLICT, "BATCH_ACTIVE"),
                ControllerError::Discarded => (StatusCode::CONFLICT, "DISCARDED"),
                ControllerError::Gateway { source, .. } => match source {
                    GatewayError::BlockedContent(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BLOCKED_CONTENT"),
                    GatewayError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                    _ => (StatusCode::BAD_GATEWAY, "GENERATION_FAILED"),
                },
            },
            AppError::Presets(e) => {
                tracing::error!("❌ Preset storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "PRESET_STORAGE")
            }
            AppError::Task(e) => {
                tracing::error!("❌ Background task failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "TASK_FAILED")
            }
        };
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}
