//! Signed archive downloads with conditional-request handling.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::Query;
use axum::extract::rejection::QueryRejection;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use axum::http::{HeaderMap, HeaderValue};
use axum::http::response::Builder;
use axum::response::Response;
use httpdate::{fmt_http_date, parse_http_date};
use sha2::{Digest, Sha256};

use super::prelude::*;
use crate::constants::{DOWNLOAD_CACHE_CONTROL, X_AVATARPACK_GENERATION};
use crate::packager::ARCHIVE_CONTENT_TYPE;

/// Query half of a signed URL.
#[derive(Debug, Deserialize)]
pub(crate) struct SignedQuery {
    expires: i64,
    signature: String,
}

/// Validators for one stored archive.
///
/// Archives are written once per generation, so a digest of the bytes is a strong entity tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ArchiveValidators {
    etag: String,
    /// Whole seconds, the resolution of HTTP dates
    modified_at: Option<SystemTime>,
}

impl ArchiveValidators {
    pub(crate) fn new(archive: &[u8], modified_at: Option<SystemTime>) -> Self {
        let digest = Sha256::digest(archive);
        Self {
            etag: format!("\"{}\"", hex::encode(&digest[..16])),
            modified_at: modified_at.and_then(whole_seconds),
        }
    }

    fn apply(&self, mut builder: Builder) -> Builder {
        builder = builder
            .header(CACHE_CONTROL, DOWNLOAD_CACHE_CONTROL.as_str())
            .header(ETAG, self.etag.as_str());
        if let Some(modified_at) = self.modified_at {
            builder = builder.header(LAST_MODIFIED, fmt_http_date(modified_at));
        }
        builder
    }

    /// Whether the client's cached copy is current. `If-None-Match` decides alone when present.
    pub(crate) fn matches(&self, headers: &HeaderMap) -> bool {
        if let Some(if_none_match) = headers.get(IF_NONE_MATCH) {
            return if_none_match.to_str().is_ok_and(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .any(|tag| tag == "*" || tag.trim_start_matches("W/") == self.etag)
            });
        }

        let since = headers
            .get(IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_http_date(value).ok());
        matches!((since, self.modified_at), (Some(since), Some(modified)) if modified <= since)
    }
}

fn whole_seconds(at: SystemTime) -> Option<SystemTime> {
    let secs = at.duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

/// `GET /signed/packs/{*path}`
pub(crate) async fn signed_download_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    query: Result<Query<SignedQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, AvatarPackError> {
    let Ok(Query(query)) = query else {
        info!("Unsigned download attempt for {}", path);
        return Err(AvatarPackError::Forbidden);
    };
    if !state
        .packs
        .verify_signature(&path, query.expires, &query.signature)
    {
        info!("Rejected download of {}", path);
        return Err(AvatarPackError::Forbidden);
    }

    let file = state.packs.object_file(&path)?;
    let metadata = match tokio::fs::metadata(&file).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(AvatarPackError::NotFound(path)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AvatarPackError::NotFound(path));
        }
        Err(err) => return Err(err.into()),
    };
    let bytes = tokio::fs::read(&file).await?;
    let validators = ArchiveValidators::new(&bytes, metadata.modified().ok());

    let generation_id = path.split('/').next().unwrap_or_default();
    let mut builder = Response::builder();
    if let Ok(value) = HeaderValue::from_str(generation_id) {
        builder = builder.header(X_AVATARPACK_GENERATION, value);
    }
    builder = validators.apply(builder);

    if validators.matches(&headers) {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .map_err(AvatarPackError::from);
    }

    let disposition = format!("attachment; filename=\"avatar-pack-{generation_id}.tar.gz\"");
    builder
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
        .header(CONTENT_LENGTH, bytes.len())
        .header(CONTENT_DISPOSITION, disposition)
        .body(Body::from(bytes))
        .map_err(AvatarPackError::from)
}
