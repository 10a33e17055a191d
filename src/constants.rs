//! Shared constants/defaults for things

use std::sync::LazyLock;
use std::time::Duration;

/// The default place we put stored objects
pub const STORAGE_DIR: &str = "./storage";

/// Bucket for generated source and mood images, served publicly
pub const IMAGES_BUCKET: &str = "images";

/// Bucket for avatar-pack archives, only reachable through signed URLs
pub const PACKS_BUCKET: &str = "packs";

/// Custom header carrying the generation id on downloads
pub const X_AVATARPACK_GENERATION: &str = "x-avatarpack-generation";

/// Attempts per mood before giving up
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Wait after a rate limit when the provider didn't say how long
pub const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(10);

/// Wait after any other provider failure
pub const TRANSIENT_RETRY_WAIT: Duration = Duration::from_secs(3);

/// Default gap between mood generations in a batch, in seconds
pub const DEFAULT_PACING_SECONDS: u64 = 12;

/// Inference steps for the default model
pub const DEFAULT_INFERENCE_STEPS: u32 = 4;

/// Size of each mood image
pub const MOOD_IMAGE_SIZE: u32 = 512;

/// Size of the source portrait an avatar pack is derived from
pub const PACK_SOURCE_SIZE: u32 = 1024;

/// Default lifetime (in seconds) of archive download links
pub const DEFAULT_ARCHIVE_URL_TTL_SECONDS: u64 = 60 * 60 * 24;

/// Max age (in seconds) for archive download cache entries.
pub const DOWNLOAD_CACHE_MAX_AGE_SECONDS: u64 = 60 * 5;

/// Cache-Control value for signed downloads; signed links must not land in shared caches.
pub static DOWNLOAD_CACHE_CONTROL: LazyLock<String> =
    LazyLock::new(|| format!("private, max-age={}", DOWNLOAD_CACHE_MAX_AGE_SECONDS));

/// Length of generated generation ids
pub const GENERATION_ID_LENGTH: usize = 24;

#[cfg(test)]
/// Base URL used in tests
pub const TEST_BASE_URL: &str = "http://avatars.example.org/";
