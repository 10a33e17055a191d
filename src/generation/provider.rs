//! The text-to-image capability and its HTTP adapter.
//!
//! Whatever shape a provider answers with (one output, a list of outputs, a URL to download or an
//! inline data URI) is flattened here into a list of byte chunks in arrival order.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Output encoding requested from the model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless
    Png,
}

/// One text-to-image call.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageRequest {
    /// Positive prompt
    pub prompt: String,
    /// Things the model should avoid, when it supports them
    pub negative_prompt: Option<String>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Inference steps
    pub steps: u32,
    /// Output encoding
    pub output_format: OutputFormat,
}

/// How a provider call failed, as far as retrying is concerned.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    /// Too many requests; wait and try again
    #[error("Rate limited by image provider: {message}")]
    RateLimited {
        /// How long the provider asked us to wait, if it said
        retry_after: Option<Duration>,
        /// Provider message
        message: String,
    },
    /// Billing problem, retrying won't help
    #[error("Insufficient credit: {0}")]
    InsufficientCredit(String),
    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// The external text-to-image model.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Runs the model once and returns the produced image as byte chunks, in order.
    async fn invoke(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>, ProviderError>;
}

/// Default model used for generation.
pub const DEFAULT_MODEL: &str = "black-forest-labs/flux-schnell";

const REPLICATE_API_BASE: &str = "https://api.replicate.com";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs models through Replicate's predictions API.
///
/// Predictions are created with `Prefer: wait`; one that is still running when the server stops
/// waiting is polled through its `urls.get` link until it reaches a terminal status.
#[derive(Clone, Debug)]
pub struct ReplicateProvider {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
    model: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Serialize, Debug)]
struct PredictionRequest<'a> {
    input: PredictionInput<'a>,
}

#[derive(Serialize, Debug)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: u32,
    height: u32,
    num_outputs: u8,
    num_inference_steps: u32,
    output_format: OutputFormat,
}

#[derive(Deserialize, Debug)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Deserialize, Debug, Default)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
    #[serde(default)]
    cancel: Option<String>,
}

impl Prediction {
    fn is_running(&self) -> bool {
        matches!(self.status.as_deref(), Some("starting" | "processing"))
    }

    fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("<unnamed>")
    }

    /// Output location of a finished prediction, or why there isn't one.
    fn into_output(self) -> Result<String, ProviderError> {
        if let Some(err) = self.error.filter(|err| !err.is_null()) {
            return Err(ProviderError::Other(format!("Prediction failed: {err}")));
        }
        match self.status.as_deref() {
            None | Some("succeeded") => {}
            Some(status) => {
                return Err(ProviderError::Other(format!(
                    "Prediction ended with status {status}"
                )));
            }
        }
        self.output
            .and_then(PredictionOutput::first)
            .ok_or_else(|| ProviderError::Other("Prediction returned no output".to_string()))
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum PredictionOutput {
    Single(String),
    Many(Vec<String>),
}

impl PredictionOutput {
    fn first(self) -> Option<String> {
        match self {
            Self::Single(url) => Some(url),
            Self::Many(urls) => urls.into_iter().next(),
        }
    }
}

impl ReplicateProvider {
    /// Provider for `model`, eg `black-forest-labs/flux-schnell`.
    pub fn new(api_token: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: REPLICATE_API_BASE.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
            poll_interval: POLL_INTERVAL,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    /// Points the provider at a different API host.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// How often to check a running prediction, and how long to keep checking.
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// Sends a predictions API call and parses the prediction it answers with.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Prediction, ProviderError> {
        let resp = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| ProviderError::Other(format!("Request to predictions failed: {err}")))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(format!("Failed reading predictions body: {err}")))?;

        if let Some(err) = classify_status(status, retry_after, &String::from_utf8_lossy(&bytes)) {
            return Err(err);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::Other(format!("Failed to parse prediction JSON: {err}")))
    }

    /// Polls until `prediction` stops running, cancelling it if that takes too long.
    async fn wait_for(&self, mut prediction: Prediction) -> Result<Prediction, ProviderError> {
        let started = Instant::now();
        while prediction.is_running() {
            let Some(location) = prediction.urls.get.clone() else {
                return Err(ProviderError::Other(format!(
                    "Prediction {} is still running but has no status link",
                    prediction.label()
                )));
            };
            if started.elapsed() >= self.poll_timeout {
                self.cancel(&prediction).await;
                return Err(ProviderError::Other(format!(
                    "Prediction {} did not finish within {}s",
                    prediction.label(),
                    self.poll_timeout.as_secs()
                )));
            }
            debug!(
                "Prediction {} is {}, checking again in {:?}",
                prediction.label(),
                prediction.status.as_deref().unwrap_or_default(),
                self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.send(self.client.get(&location)).await?;
        }
        Ok(prediction)
    }

    async fn cancel(&self, prediction: &Prediction) {
        let Some(location) = prediction.urls.cancel.as_deref() else {
            return;
        };
        if let Err(err) = self.send(self.client.post(location)).await {
            warn!("Couldn't cancel prediction {}: {}", prediction.label(), err);
        }
    }

    async fn download(&self, location: &str) -> Result<Vec<Vec<u8>>, ProviderError> {
        if let Some(data) = location.strip_prefix("data:") {
            let Some((_, encoded)) = data.split_once(";base64,") else {
                return Err(ProviderError::Other(
                    "Unsupported data URI in model output".to_string(),
                ));
            };
            let bytes = general_purpose::STANDARD
                .decode(encoded)
                .map_err(|err| ProviderError::Other(format!("Failed to decode image: {err}")))?;
            return Ok(vec![bytes]);
        }

        let mut resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|err| ProviderError::Other(format!("Failed to download image: {err}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Other(format!(
                "Image download error {status}"
            )));
        }

        let mut chunks = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|err| ProviderError::Other(format!("Failed reading image bytes: {err}")))?
        {
            chunks.push(chunk.to_vec());
        }
        debug!("Downloaded {} chunks from {}", chunks.len(), location);
        Ok(chunks)
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    async fn invoke(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>, ProviderError> {
        let body = PredictionRequest {
            input: PredictionInput {
                prompt: &request.prompt,
                negative_prompt: request.negative_prompt.as_deref(),
                width: request.width,
                height: request.height,
                num_outputs: 1,
                num_inference_steps: request.steps,
                output_format: request.output_format,
            },
        };

        let created = self
            .send(
                self.client
                    .post(format!(
                        "{}/v1/models/{}/predictions",
                        self.api_base, self.model
                    ))
                    .header("Prefer", "wait")
                    .json(&body),
            )
            .await?;
        let location = self.wait_for(created).await?.into_output()?;

        info!("Prediction finished, fetching output");
        self.download(&location).await
    }
}

/// Maps an HTTP failure onto the retry taxonomy; `None` for success.
fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after,
            message: format!("{status}: {body}"),
        },
        StatusCode::PAYMENT_REQUIRED => ProviderError::InsufficientCredit(format!("{status}: {body}")),
        _ => ProviderError::Other(format!("Image provider error {status}: {body}")),
    })
}

/// `Retry-After` in delta-seconds or HTTP-date form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
