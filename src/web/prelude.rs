pub(crate) use crate::error::AvatarPackError;
pub(crate) use crate::web::AppState;
pub(crate) use axum::Json;
pub(crate) use axum::extract::{Path, State};
pub(crate) use axum::http::StatusCode;
pub(crate) use serde::{Deserialize, Serialize};
pub(crate) use tracing::{debug, info};
