//! In-memory stand-ins for the external services, for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::generation::pacing::Sleeper;
use crate::generation::provider::{ImageProvider, ImageRequest, ProviderError};
use crate::storage::{BlobStore, StorageError};

type Outcome = Result<Vec<Vec<u8>>, ProviderError>;

/// Answers with a fixed script of outcomes, then repeats the fallback (if any).
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Option<Vec<Vec<u8>>>,
    requests: Mutex<Vec<ImageRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(script: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(output: Vec<Vec<u8>>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(output),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub(crate) fn sizes(&self) -> Vec<(u32, u32)> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|request| (request.width, request.height))
            .collect()
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    async fn invoke(&self, request: &ImageRequest) -> Outcome {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if let Some(outcome) = self.script.lock().expect("script lock").pop_front() {
            return outcome;
        }
        match &self.fallback {
            Some(output) => Ok(output.clone()),
            None => Err(ProviderError::Other("script exhausted".to_string())),
        }
    }
}

/// Keeps objects in a map; URLs use a `memory://` scheme.
#[derive(Default)]
pub(crate) struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failures_left: Mutex<usize>,
}

impl MemoryBlobStore {
    pub(crate) fn failing_first(failures: usize) -> Self {
        Self {
            objects: Mutex::default(),
            failures_left: Mutex::new(failures),
        }
    }

    pub(crate) fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("objects lock")
            .get(path)
            .map(|(bytes, _)| bytes.clone())
    }

    pub(crate) fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .expect("objects lock")
            .get(path)
            .map(|(_, content_type)| content_type.clone())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.objects.lock().expect("objects lock").is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        {
            let mut failures = self.failures_left.lock().expect("failures lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Io(std::io::Error::other("disk on fire")));
            }
        }
        self.objects
            .lock()
            .expect("objects lock")
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        if !self.objects.lock().expect("objects lock").contains_key(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(format!("memory://signed/{path}?ttl={}", ttl.as_secs()))
    }
}

/// Records requested waits instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.waits.lock().expect("waits lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().expect("waits lock").push(duration);
    }
}

/// A small solid-colour PNG.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 80, 120, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
