//! Turns a character config into stored images, one mood at a time.

pub mod pacing;
pub mod provider;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::avatar::{AvatarConfig, Mood};
use crate::constants::{
    DEFAULT_INFERENCE_STEPS, MAX_GENERATION_ATTEMPTS, RATE_LIMIT_FALLBACK_WAIT,
    TRANSIENT_RETRY_WAIT,
};
use crate::prompts;
use crate::storage::BlobStore;

use pacing::{Pacing, Sleeper};
use provider::{ImageProvider, ImageRequest, OutputFormat, ProviderError};

/// Requested output dimensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SizeOptions {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl SizeOptions {
    /// A `size`×`size` square.
    pub const fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
}

/// How hard to try before giving up on one image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first
    pub max_attempts: u32,
    /// Wait after a rate limit that came without a retry interval
    pub rate_limit_fallback: Duration,
    /// Wait after any other failure
    pub transient_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_GENERATION_ATTEMPTS,
            rate_limit_fallback: RATE_LIMIT_FALLBACK_WAIT,
            transient_backoff: TRANSIENT_RETRY_WAIT,
        }
    }
}

/// Why an image (or a batch of them) couldn't be produced.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The provider account is out of credit
    #[error("Insufficient credit. Please add funds to the image provider account: {0}")]
    InsufficientCredit(String),
    /// Every attempt failed
    #[error("Failed to generate image after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },
    /// A mood in a batch failed, so the batch did
    #[error("Failed to generate {mood} expression: {source}")]
    MoodFailed {
        /// The failing mood
        mood: Mood,
        /// What went wrong
        #[source]
        source: Box<GenerationError>,
    },
}

impl GenerationError {
    /// True when the failure is a billing problem, however deeply wrapped.
    pub fn is_insufficient_credit(&self) -> bool {
        match self {
            Self::InsufficientCredit(_) => true,
            Self::MoodFailed { source, .. } => source.is_insufficient_credit(),
            Self::Exhausted { .. } => false,
        }
    }
}

/// A stored image plus the bytes that were stored.
#[derive(Clone, Debug)]
pub struct GeneratedImage {
    /// Public URL of the stored image
    pub url: String,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

/// Drives the image provider with retries and pacing, and stores what it returns.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn ImageProvider>,
    images: Arc<dyn BlobStore>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    pacing: Pacing,
}

impl Generator {
    /// Generator with the default retry policy.
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        images: Arc<dyn BlobStore>,
        sleeper: Arc<dyn Sleeper>,
        pacing: Pacing,
    ) -> Self {
        Self {
            provider,
            images,
            sleeper,
            retry: RetryPolicy::default(),
            pacing,
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generates and stores one mood, returning its public URL.
    pub async fn generate_one(
        &self,
        config: &AvatarConfig,
        mood: Mood,
        generation_id: &str,
        size: SizeOptions,
    ) -> Result<String, GenerationError> {
        self.generate_source(config, mood, generation_id, size)
            .await
            .map(|image| image.url)
    }

    /// Generates and stores one mood, returning the URL and the bytes.
    #[instrument(skip(self, config), fields(style = %config.style))]
    pub async fn generate_source(
        &self,
        config: &AvatarConfig,
        mood: Mood,
        generation_id: &str,
        size: SizeOptions,
    ) -> Result<GeneratedImage, GenerationError> {
        let request = ImageRequest {
            prompt: prompts::compose(config, mood),
            negative_prompt: Some(prompts::negative_prompt().to_string()),
            width: size.width,
            height: size.height,
            steps: DEFAULT_INFERENCE_STEPS,
            output_format: OutputFormat::Png,
        };
        let path = format!("{generation_id}/{}.png", mood.as_str());
        let max_attempts = self.retry.max_attempts.max(1);

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let wait = match self.attempt(&request, &path).await {
                Ok(image) => {
                    info!(
                        "Generated {} image for {} on attempt {}/{}: {}",
                        mood, generation_id, attempt, max_attempts, image.url
                    );
                    return Ok(image);
                }
                Err(ProviderError::InsufficientCredit(message)) => {
                    error!("Image provider reports insufficient credit: {}", message);
                    return Err(GenerationError::InsufficientCredit(message));
                }
                Err(ProviderError::RateLimited {
                    retry_after,
                    message,
                }) => {
                    let wait = retry_after.unwrap_or(self.retry.rate_limit_fallback);
                    warn!(
                        "Rate limited (attempt {}/{}), waiting {:?}",
                        attempt, max_attempts, wait
                    );
                    last_error = message;
                    wait
                }
                Err(ProviderError::Other(message)) => {
                    warn!(
                        "Generation error (attempt {}/{}): {}",
                        attempt, max_attempts, message
                    );
                    last_error = message;
                    self.retry.transient_backoff
                }
            };
            if attempt < max_attempts {
                self.sleeper.sleep(wait).await;
            }
        }

        Err(GenerationError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Generates every requested mood in order, all or nothing.
    #[instrument(skip(self, config), fields(style = %config.style))]
    pub async fn generate_all(
        &self,
        config: &AvatarConfig,
        generation_id: &str,
        size: SizeOptions,
    ) -> Result<BTreeMap<Mood, String>, GenerationError> {
        let moods = config.moods_in_order();
        info!("Starting batch generation for {} moods", moods.len());

        let mut results = BTreeMap::new();
        for (index, mood) in moods.iter().copied().enumerate() {
            if let Some(delay) = self.pacing.delay_before(index) {
                info!("Waiting {:?} before generating {}", delay, mood);
                self.sleeper.sleep(delay).await;
            }
            match self.generate_one(config, mood, generation_id, size).await {
                Ok(url) => {
                    results.insert(mood, url);
                }
                Err(err @ GenerationError::InsufficientCredit(_)) => return Err(err),
                Err(err) => {
                    error!("{} failed: {}", mood, err);
                    return Err(GenerationError::MoodFailed {
                        mood,
                        source: Box::new(err),
                    });
                }
            }
        }

        info!("Batch generation complete");
        Ok(results)
    }

    async fn attempt(
        &self,
        request: &ImageRequest,
        path: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        let chunks = self.provider.invoke(request).await?;
        let bytes = chunks.concat();
        if bytes.is_empty() {
            return Err(ProviderError::Other(
                "No image data received from image provider".to_string(),
            ));
        }
        let url = self
            .images
            .put_object(path, bytes.clone(), "image/png")
            .await
            .map_err(|err| ProviderError::Other(format!("Failed to upload image: {err}")))?;
        Ok(GeneratedImage { url, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::{EyeColor, Gender, HairColor, HairStyle, Style, Trait};
    use crate::testing::{MemoryBlobStore, RecordingSleeper, ScriptedProvider};

    fn config(moods: Vec<Mood>) -> AvatarConfig {
        AvatarConfig {
            style: Style::Genshin,
            gender: Gender::Female,
            hair_style: HairStyle::Long,
            hair_color: HairColor::Silver,
            eye_color: EyeColor::Blue,
            traits: vec![Trait::CatEars],
            moods,
        }
    }

    fn generator(
        provider: &Arc<ScriptedProvider>,
        store: &Arc<MemoryBlobStore>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> Generator {
        Generator::new(
            provider.clone(),
            store.clone(),
            sleeper.clone(),
            Pacing::FixedInterval(Duration::from_secs(12)),
        )
    }

    fn rate_limited(retry_after: Option<u64>) -> ProviderError {
        ProviderError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
            message: "429 Too Many Requests".to_string(),
        }
    }

    #[tokio::test]
    async fn rate_limits_retry_until_the_third_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(rate_limited(Some(2))),
            Err(rate_limited(None)),
            Ok(vec![vec![0x89, 0x50], vec![0x4e, 0x47]]),
        ]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let url = generator(&provider, &store, &sleeper)
            .generate_one(&config(vec![Mood::Avatar]), Mood::Avatar, "gen-1", SizeOptions::square(512))
            .await
            .expect("third attempt succeeds");

        assert_eq!(url, "memory://gen-1/avatar.png");
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(2), Duration::from_secs(10)]
        );
        assert_eq!(
            store.object("gen-1/avatar.png"),
            Some(vec![0x89, 0x50, 0x4e, 0x47])
        );
    }

    #[tokio::test]
    async fn insufficient_credit_fails_after_one_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::InsufficientCredit("402 Payment Required".to_string()),
        )]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = generator(&provider, &store, &sleeper)
            .generate_one(&config(vec![]), Mood::Happy, "gen-2", SizeOptions::square(512))
            .await
            .expect_err("billing errors are terminal");

        assert!(matches!(err, GenerationError::InsufficientCredit(_)));
        assert_eq!(provider.calls(), 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn exhausted_attempts_report_the_last_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Other("boom 1".to_string())),
            Ok(vec![]),
            Err(ProviderError::Other("boom 3".to_string())),
        ]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = generator(&provider, &store, &sleeper)
            .generate_one(&config(vec![]), Mood::Sad, "gen-3", SizeOptions::square(512))
            .await
            .expect_err("all attempts fail");

        assert_eq!(
            err.to_string(),
            "Failed to generate image after 3 attempts: boom 3"
        );
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(3), Duration::from_secs(3)]
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn custom_retry_policies_bound_the_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Other("boom 1".to_string())),
            Err(ProviderError::Other("boom 2".to_string())),
            Ok(vec![vec![1]]),
        ]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = generator(&provider, &store, &sleeper)
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                transient_backoff: Duration::from_millis(250),
                ..RetryPolicy::default()
            })
            .generate_one(&config(vec![]), Mood::Happy, "gen-short", SizeOptions::square(512))
            .await
            .expect_err("two attempts fail");

        assert_eq!(
            err.to_string(),
            "Failed to generate image after 2 attempts: boom 2"
        );
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test]
    async fn empty_output_counts_as_a_failed_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(vec![]),
            Ok(vec![vec![], vec![]]),
            Ok(vec![vec![7]]),
        ]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let image = generator(&provider, &store, &sleeper)
            .generate_source(&config(vec![]), Mood::Smug, "gen-4", SizeOptions::square(64))
            .await
            .expect("third attempt has bytes");
        assert_eq!(image.bytes, vec![7]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn batch_paces_between_moods_only() {
        let provider = Arc::new(ScriptedProvider::always(vec![vec![1, 2, 3]]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let results = generator(&provider, &store, &sleeper)
            .generate_all(&config(Mood::ALL.to_vec()), "gen-5", SizeOptions::square(512))
            .await
            .expect("batch succeeds");

        assert_eq!(results.len(), 5);
        assert_eq!(provider.calls(), 5);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(12); 4]);
        assert_eq!(results[&Mood::Angry], "memory://gen-5/angry.png");

        let prompts = provider.prompts();
        assert!(prompts[0].contains("neutral expression, calm and confident"));
        assert!(prompts[1].contains("happy expression"));
    }

    #[tokio::test]
    async fn batch_stops_at_the_first_failed_mood() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(vec![vec![1]]),
            Err(ProviderError::Other("down".to_string())),
            Err(ProviderError::Other("down".to_string())),
            Err(ProviderError::Other("still down".to_string())),
        ]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = generator(&provider, &store, &sleeper)
            .generate_all(&config(Mood::ALL.to_vec()), "gen-6", SizeOptions::square(512))
            .await
            .expect_err("batch fails");

        assert!(matches!(err, GenerationError::MoodFailed { mood: Mood::Happy, .. }));
        assert!(err.to_string().starts_with("Failed to generate happy expression"));
        assert!(err.to_string().ends_with("still down"));
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn billing_errors_pass_through_batches_unwrapped() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::InsufficientCredit("402".to_string()),
        )]));
        let store = Arc::new(MemoryBlobStore::default());
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = generator(&provider, &store, &sleeper)
            .generate_all(&config(vec![Mood::Avatar, Mood::Happy]), "gen-7", SizeOptions::square(512))
            .await
            .expect_err("batch fails");
        assert!(matches!(err, GenerationError::InsufficientCredit(_)));
        assert!(err.is_insufficient_credit());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn upload_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::always(vec![vec![5]]));
        let store = Arc::new(MemoryBlobStore::failing_first(1));
        let sleeper = Arc::new(RecordingSleeper::default());

        let url = generator(&provider, &store, &sleeper)
            .generate_one(&config(vec![]), Mood::Avatar, "gen-8", SizeOptions::square(512))
            .await
            .expect("second attempt uploads");
        assert_eq!(url, "memory://gen-8/avatar.png");
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(3)]);
    }
}
