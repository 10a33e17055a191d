//! JSON API handlers

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;

use super::prelude::*;
use crate::avatar::{Mood, RawAvatarConfig, validate_config};
use crate::pipeline::{GenerationRequest, MoodsResponse, PackResponse, StatusResponse};
use crate::prompts;

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AvatarPackError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AvatarPackError::BadRequest(rejection.body_text()))
}

/// `POST /api/generate`
pub(crate) async fn generate_handler(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<MoodsResponse>, AvatarPackError> {
    let request = parse_body(body)?;
    state.pipeline.generate_moods(&request).await.map(Json)
}

/// `POST /api/generate-avatar-pack`
pub(crate) async fn generate_pack_handler(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<PackResponse>, AvatarPackError> {
    let request = parse_body(body)?;
    state.pipeline.generate_pack(&request).await.map(Json)
}

/// `GET /api/generate/{id}`
pub(crate) async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AvatarPackError> {
    state.pipeline.status(&id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub(crate) struct PromptPreviewRequest {
    #[serde(default)]
    config: RawAvatarConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptPreview {
    valid: bool,
    errors: Vec<String>,
    prompts: BTreeMap<Mood, String>,
    negative_prompt: &'static str,
}

/// `POST /api/prompts`, shows what would be sent to the model without generating anything.
pub(crate) async fn prompts_handler(
    body: Result<Json<PromptPreviewRequest>, JsonRejection>,
) -> Result<Json<PromptPreview>, AvatarPackError> {
    let request = parse_body(body)?;
    let preview = match validate_config(&request.config) {
        Ok(config) => PromptPreview {
            valid: true,
            errors: Vec::new(),
            prompts: prompts::compose_all(&config),
            negative_prompt: prompts::negative_prompt(),
        },
        Err(invalid) => {
            debug!("Prompt preview for invalid config: {:?}", invalid.errors);
            PromptPreview {
                valid: false,
                errors: invalid.errors,
                prompts: BTreeMap::new(),
                negative_prompt: prompts::negative_prompt(),
            }
        }
    };
    Ok(Json(preview))
}
