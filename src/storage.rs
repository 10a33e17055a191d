//! Blob storage for generated images and archives.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

/// Errors from blob storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Object paths must be relative and must not escape the bucket
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
    /// No object at that path
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Couldn't build a URL for the object
    #[error("Failed to build object URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Where generated bytes end up.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path`, replacing any existing object, and returns its public URL.
    async fn put_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Returns a URL for `path` that stops working after `ttl`.
    async fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// A bucket kept in a local directory and served by this process.
///
/// Public URLs look like `<base>/files/<bucket>/<path>`, signed URLs like
/// `<base>/signed/<bucket>/<path>?expires=<unix>&signature=<hex>`.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    bucket: String,
    root: PathBuf,
    base_url: Url,
    secret: String,
}

impl LocalBlobStore {
    /// Bucket `bucket` stored under `storage_dir/<bucket>`.
    pub fn new(storage_dir: &Path, bucket: &str, base_url: Url, secret: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            root: storage_dir.join(bucket),
            base_url,
            secret: secret.to_string(),
        }
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Directory holding the bucket's objects
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object, after path validation.
    pub fn object_file(&self, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(clean_object_path(path)?))
    }

    /// Checks a signature produced by [BlobStore::create_signed_url] against the current time.
    pub fn verify_signature(&self, path: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            debug!("Signed URL for {}/{} expired at {}", self.bucket, path, expires);
            return false;
        }
        self.sign(path, expires) == signature.to_ascii_lowercase()
    }

    fn sign(&self, path: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.bucket.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn url_for(&self, prefix: &str, path: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segments.pop_if_empty().push(prefix).push(&self.bucket);
            for segment in path.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let file = self.object_file(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let len = bytes.len();
        tokio::fs::write(&file, bytes).await?;
        debug!(
            "Stored {}/{} ({} bytes, {})",
            self.bucket, path, len, content_type
        );
        Ok(self.url_for("files", path)?.to_string())
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let file = self.object_file(path)?;
        match tokio::fs::metadata(&file).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(StorageError::NotFound(path.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let mut url = self.url_for("signed", path)?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(path, expires));
        Ok(url.to_string())
    }
}

/// Rejects absolute paths, `..`, and empty segments.
fn clean_object_path(path: &str) -> Result<PathBuf, StorageError> {
    if path.is_empty() || path.contains('\\') || path.split('/').any(str::is_empty) {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    let candidate = Path::new(path);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}
