use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure of the opaque game server query.
#[derive(Debug, Error)]
pub enum QueryError {
  #[error("query request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("query gateway answered with status {0}")]
  Status(u16),

  #[error("query timed out")]
  Timeout,

  #[error("query failed: {0}")]
  Other(String),
}

/// Failure of the opaque message transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
  /// Target exists but refuses the message (closed DMs, missing access).
  #[error("target rejected the message: {0}")]
  Rejected(String),

  #[error("target not found: {0}")]
  NotFound(String),

  #[error("transport error: {0}")]
  Transport(String),
}

/// Unexpected failure inside a command handler.
#[derive(Debug, Error)]
pub enum CommandError {
  #[error("config store error: {0}")]
  Store(#[from] sebot_db::DbError),

  #[error("{0}")]
  Message(String),
}

impl From<&str> for CommandError {
  fn from(msg: &str) -> Self {
    CommandError::Message(msg.to_string())
  }
}

impl From<String> for CommandError {
  fn from(msg: String) -> Self {
    CommandError::Message(msg)
  }
}

/// Failure of one background loop iteration.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("config store error: {0}")]
  Store(#[from] sebot_db::DbError),

  #[error("background task failed: {0}")]
  Task(String),
}

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
    }
  }
}

/// Status surface error type
#[derive(Debug)]
pub enum ApiError {
  NotTracked(u64),
  Store(sebot_db::DbError),
}

impl From<sebot_db::DbError> for ApiError {
  fn from(err: sebot_db::DbError) -> Self {
    ApiError::Store(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::NotTracked(community_id) => {
        tracing::debug!(community_id, "status requested for untracked community");
        (
          StatusCode::NOT_FOUND,
          Json(ErrorResponse::new("Community is not tracked")),
        )
          .into_response()
      }
      ApiError::Store(err) => {
        tracing::error!(%err, "config store error");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(ErrorResponse::new("Internal server error")),
        )
          .into_response()
      }
    }
  }
}
