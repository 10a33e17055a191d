//! Error handling

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, info};

use crate::avatar::InvalidConfig;
use crate::db::entities::generations::RecordError;
use crate::generation::GenerationError;
use crate::packager::PackError;
use crate::storage::StorageError;

/// Errors surfaced to API clients.
#[derive(Debug, thiserror::Error)]
pub enum AvatarPackError {
    /// The character config failed validation
    #[error("{0}")]
    InvalidConfig(InvalidConfig),
    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// The provider account can't pay for more images
    #[error("{message}")]
    InsufficientCredit {
        /// Generation the failure belongs to
        generation_id: Option<String>,
        #[allow(missing_docs)]
        message: String,
    },
    /// Expired or tampered download link
    #[error("Forbidden")]
    Forbidden,
    /// When a requested resource is not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// The generation already finished
    #[error("{0}")]
    Conflict(String),
    /// A pipeline stage failed
    #[error("{message}")]
    GenerationFailed {
        /// Generation the failure belongs to
        generation_id: String,
        #[allow(missing_docs)]
        message: String,
    },
    /// When DB operations fail
    #[error("Database error: {0}")]
    DatabaseError(sea_orm::DbErr),
    /// When an internal server error occurs
    #[error("{0}")]
    InternalServerError(String),
}

impl AvatarPackError {
    /// Wraps a generation failure, keeping billing problems distinct.
    pub fn from_generation(generation_id: &str, err: GenerationError) -> Self {
        if err.is_insufficient_credit() {
            AvatarPackError::InsufficientCredit {
                generation_id: Some(generation_id.to_string()),
                message: err.to_string(),
            }
        } else {
            AvatarPackError::GenerationFailed {
                generation_id: generation_id.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Wraps a failure in a later stage of a generation.
    pub fn stage(generation_id: &str, message: impl Into<String>) -> Self {
        AvatarPackError::GenerationFailed {
            generation_id: generation_id.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AvatarPackError::InvalidConfig(_) | AvatarPackError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AvatarPackError::InsufficientCredit { .. } => StatusCode::PAYMENT_REQUIRED,
            AvatarPackError::Forbidden => StatusCode::FORBIDDEN,
            AvatarPackError::NotFound(_) => StatusCode::NOT_FOUND,
            AvatarPackError::Conflict(_) => StatusCode::CONFLICT,
            AvatarPackError::GenerationFailed { .. }
            | AvatarPackError::DatabaseError(_)
            | AvatarPackError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<InvalidConfig> for AvatarPackError {
    fn from(err: InvalidConfig) -> Self {
        AvatarPackError::InvalidConfig(err)
    }
}

impl From<sea_orm::DbErr> for AvatarPackError {
    fn from(err: sea_orm::DbErr) -> Self {
        AvatarPackError::DatabaseError(err)
    }
}

impl From<RecordError> for AvatarPackError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Database(err) => AvatarPackError::DatabaseError(err),
            RecordError::NotFound(id) => AvatarPackError::NotFound(id),
            err @ (RecordError::AlreadyFinished { .. } | RecordError::AlreadyClaimed { .. }) => {
                AvatarPackError::Conflict(err.to_string())
            }
            RecordError::Serialize(err) => AvatarPackError::InternalServerError(err.to_string()),
        }
    }
}

impl From<StorageError> for AvatarPackError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) | StorageError::InvalidPath(path) => {
                AvatarPackError::NotFound(path)
            }
            err => AvatarPackError::InternalServerError(err.to_string()),
        }
    }
}

impl From<PackError> for AvatarPackError {
    fn from(err: PackError) -> Self {
        AvatarPackError::InternalServerError(err.to_string())
    }
}

impl From<std::io::Error> for AvatarPackError {
    fn from(err: std::io::Error) -> Self {
        AvatarPackError::InternalServerError(err.to_string())
    }
}

impl From<axum::http::Error> for AvatarPackError {
    fn from(err: axum::http::Error) -> Self {
        AvatarPackError::InternalServerError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AvatarPackError {
    fn from(err: tokio::task::JoinError) -> Self {
        AvatarPackError::InternalServerError(format!("Background task failed: {err}"))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) generation_id: Option<String>,
}

impl IntoResponse for AvatarPackError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AvatarPackError::InvalidConfig(err) => {
                info!("Rejected config: {}", err);
                ErrorBody {
                    error: "Invalid configuration".to_string(),
                    message: "The avatar configuration is invalid".to_string(),
                    details: Some(err.errors),
                    generation_id: None,
                }
            }
            AvatarPackError::BadRequest(message) => {
                info!("Bad request received: {}", message);
                ErrorBody {
                    error: "Bad request".to_string(),
                    message,
                    details: None,
                    generation_id: None,
                }
            }
            AvatarPackError::InsufficientCredit {
                generation_id,
                message,
            } => {
                error!("Insufficient credit: {}", message);
                ErrorBody {
                    error: "Insufficient credit".to_string(),
                    message,
                    details: None,
                    generation_id,
                }
            }
            AvatarPackError::Forbidden => ErrorBody {
                error: "Forbidden".to_string(),
                message: "Download link is invalid or has expired".to_string(),
                details: None,
                generation_id: None,
            },
            AvatarPackError::NotFound(what) => {
                info!("404 {what}");
                ErrorBody {
                    error: "Not found".to_string(),
                    message: format!("{what} was not found"),
                    details: None,
                    generation_id: None,
                }
            }
            AvatarPackError::Conflict(message) => ErrorBody {
                error: "Conflict".to_string(),
                message,
                details: None,
                generation_id: None,
            },
            AvatarPackError::GenerationFailed {
                generation_id,
                message,
            } => {
                error!("Generation {} failed: {}", generation_id, message);
                ErrorBody {
                    error: "Generation failed".to_string(),
                    message,
                    details: None,
                    generation_id: Some(generation_id),
                }
            }
            AvatarPackError::DatabaseError(err) => {
                error!("Database error: {}", err);
                ErrorBody {
                    error: "Internal server error".to_string(),
                    message: "Database error".to_string(),
                    details: None,
                    generation_id: None,
                }
            }
            AvatarPackError::InternalServerError(message) => {
                error!("Internal server error: {}", message);
                ErrorBody {
                    error: "Internal server error".to_string(),
                    message: "Internal server error".to_string(),
                    details: None,
                    generation_id: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
