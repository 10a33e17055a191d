//! Runs a generation request end to end and keeps its record in step.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::avatar::{AvatarConfig, Mood, RawAvatarConfig, validate_config};
use crate::constants::{MOOD_IMAGE_SIZE, PACK_SOURCE_SIZE};
use crate::db::entities::generations::{self, GenerationStatus};
use crate::error::AvatarPackError;
use crate::generation::{Generator, SizeOptions};
use crate::packager::{self, ArchiveUrlPolicy, PackMetadata};
use crate::storage::BlobStore;
use crate::transform::{self, AssetReport};

/// Body of both generation endpoints.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Unvalidated character config
    #[serde(default)]
    pub config: RawAvatarConfig,
    #[serde(default)]
    #[allow(missing_docs)]
    pub user_id: Option<String>,
    /// Client-chosen id; a fresh one is made when absent
    #[serde(default)]
    pub generation_id: Option<String>,
}

/// Result of a mood batch.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodsResponse {
    #[allow(missing_docs)]
    pub success: bool,
    #[allow(missing_docs)]
    pub generation_id: String,
    /// Mood → public image URL
    pub images: BTreeMap<Mood, String>,
    #[allow(missing_docs)]
    pub status: GenerationStatus,
}

/// URLs produced by an avatar-pack run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackImages {
    /// The source portrait
    pub original: String,
    /// The archive download link
    pub zip: String,
}

/// Counts for an avatar-pack run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackAssets {
    /// Avatar variants in the archive
    pub avatars: usize,
    /// Wallpapers in the archive
    pub wallpapers: usize,
    /// Archive size in bytes
    pub zip_size: usize,
    /// Catalog keys that failed to render
    pub failed: Vec<String>,
}

/// Result of an avatar-pack run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PackResponse {
    pub success: bool,
    pub generation_id: String,
    pub images: PackImages,
    pub status: GenerationStatus,
    pub assets: PackAssets,
}

/// A generation record as clients see it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct StatusResponse {
    pub id: String,
    pub status: GenerationStatus,
    pub images: Option<Value>,
    pub config: Value,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Owns the record lifecycle around generation, transforms and packaging.
#[derive(Clone)]
pub struct PackPipeline {
    db: DatabaseConnection,
    generator: Generator,
    packs: Arc<dyn BlobStore>,
    archive_policy: ArchiveUrlPolicy,
}

impl PackPipeline {
    /// Pipeline writing records to `db` and archives to `packs`.
    pub fn new(
        db: DatabaseConnection,
        generator: Generator,
        packs: Arc<dyn BlobStore>,
        archive_policy: ArchiveUrlPolicy,
    ) -> Self {
        Self {
            db,
            generator,
            packs,
            archive_policy,
        }
    }

    /// Generates every requested mood at 512×512.
    #[instrument(skip_all)]
    pub async fn generate_moods(
        &self,
        request: &GenerationRequest,
    ) -> Result<MoodsResponse, AvatarPackError> {
        let (config, id) = self.claim(request).await?;
        info!("Generating {} moods for {}", config.moods_in_order().len(), id);

        match self
            .generator
            .generate_all(&config, &id, SizeOptions::square(MOOD_IMAGE_SIZE))
            .await
        {
            Ok(images) => {
                let stored = serde_json::to_value(&images).unwrap_or_else(|_| json!({}));
                self.record_completed(&id, stored, None).await;
                Ok(MoodsResponse {
                    success: true,
                    generation_id: id,
                    images,
                    status: GenerationStatus::Completed,
                })
            }
            Err(err) => {
                let err = AvatarPackError::from_generation(&id, err);
                self.record_failed(&id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Generates a source portrait and turns it into a packaged avatar pack.
    #[instrument(skip_all)]
    pub async fn generate_pack(
        &self,
        request: &GenerationRequest,
    ) -> Result<PackResponse, AvatarPackError> {
        let (config, id) = self.claim(request).await?;
        info!("Generating avatar pack for {}", id);

        match self.build_pack(&config, &id).await {
            Ok((response, archive_path)) => {
                let stored = json!({
                    "original": response.images.original,
                    "zip": response.images.zip,
                });
                self.record_completed(&id, stored, Some(&archive_path)).await;
                Ok(response)
            }
            Err(err) => {
                self.record_failed(&id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Reads a record, re-signing the archive link when there is one.
    pub async fn status(&self, id: &str) -> Result<StatusResponse, AvatarPackError> {
        let record = generations::find(&self.db, id)
            .await?
            .ok_or_else(|| AvatarPackError::NotFound(format!("Generation {id}")))?;

        let mut images = record.images;
        if let (Some(path), ArchiveUrlPolicy::Signed(ttl)) =
            (record.archive_path.as_deref(), self.archive_policy)
        {
            match self.packs.create_signed_url(path, ttl).await {
                Ok(url) => {
                    if let Some(Value::Object(map)) = images.as_mut() {
                        map.insert("zip".to_string(), Value::String(url));
                    }
                }
                Err(err) => warn!("Couldn't re-sign archive for {}: {}", record.id, err),
            }
        }

        Ok(StatusResponse {
            id: record.id,
            status: record.status,
            images,
            config: record.config,
            paid: record.paid,
            created_at: record.created_at,
            completed_at: record.completed_at,
            error: record.error_message,
        })
    }

    async fn claim(
        &self,
        request: &GenerationRequest,
    ) -> Result<(AvatarConfig, String), AvatarPackError> {
        let config = validate_config(&request.config)?;
        let record = generations::claim(
            &self.db,
            request.generation_id.as_deref(),
            request.user_id.as_deref(),
            &config,
        )
        .await?;
        Ok((config, record.id))
    }

    async fn build_pack(
        &self,
        config: &AvatarConfig,
        id: &str,
    ) -> Result<(PackResponse, String), AvatarPackError> {
        let source = self
            .generator
            .generate_source(config, Mood::Avatar, id, SizeOptions::square(PACK_SOURCE_SIZE))
            .await
            .map_err(|err| AvatarPackError::from_generation(id, err))?;

        let metadata = PackMetadata {
            generation_id: id.to_string(),
            style: config.style,
            created_at: Utc::now(),
        };
        let bytes = source.bytes;
        let (avatars, wallpapers, archive) = tokio::task::spawn_blocking(move || {
            let avatars = transform::expand_to_platforms(&bytes);
            let wallpapers = transform::expand_to_wallpapers(&bytes);
            if avatars.assets.is_empty() {
                return Err(AvatarPackError::stage(
                    &metadata.generation_id,
                    "No avatar variants could be produced from the source image",
                ));
            }
            let archive = packager::pack(&avatars, &wallpapers, &metadata)
                .map_err(|err| AvatarPackError::stage(&metadata.generation_id, err.to_string()))?;
            Ok((avatars, wallpapers, archive))
        })
        .await??;

        let zip_size = archive.len();
        let uploaded = packager::upload(self.packs.as_ref(), archive, id, self.archive_policy)
            .await
            .map_err(|err| AvatarPackError::stage(id, err.to_string()))?;

        let response = PackResponse {
            success: true,
            generation_id: id.to_string(),
            images: PackImages {
                original: source.url,
                zip: uploaded.url,
            },
            status: GenerationStatus::Completed,
            assets: PackAssets {
                avatars: avatars.assets.len(),
                wallpapers: wallpapers.assets.len(),
                zip_size,
                failed: failed_keys(&avatars, &wallpapers),
            },
        };
        Ok((response, uploaded.path))
    }

    async fn record_completed(&self, id: &str, images: Value, archive_path: Option<&str>) {
        if let Err(err) = generations::mark_completed(&self.db, id, images, archive_path).await {
            error!("Failed to mark generation {} completed: {}", id, err);
        }
    }

    async fn record_failed(&self, id: &str, message: &str) {
        if let Err(err) = generations::mark_failed(&self.db, id, message).await {
            error!("Failed to mark generation {} failed: {}", id, err);
        }
    }
}

fn failed_keys(avatars: &AssetReport, wallpapers: &AssetReport) -> Vec<String> {
    avatars
        .failures
        .keys()
        .chain(wallpapers.failures.keys())
        .map(|key| key.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sea_orm_migration::MigratorTrait;

    use crate::generation::pacing::Pacing;
    use crate::generation::provider::{ImageProvider, ProviderError};
    use sea_orm::EntityTrait;
    use crate::testing::{MemoryBlobStore, RecordingSleeper, ScriptedProvider, png_bytes};

    struct Harness {
        pipeline: PackPipeline,
        db: DatabaseConnection,
        provider: Arc<ScriptedProvider>,
        images: Arc<MemoryBlobStore>,
        packs: Arc<MemoryBlobStore>,
    }

    async fn harness(provider: ScriptedProvider) -> Harness {
        let db = crate::db::connect_test_db().await.expect("connect test db");
        crate::db::migrations::Migrator::up(&db, None)
            .await
            .expect("run migrations");
        let provider = Arc::new(provider);
        let images = Arc::new(MemoryBlobStore::default());
        let packs = Arc::new(MemoryBlobStore::default());
        let generator = Generator::new(
            provider.clone(),
            images.clone(),
            Arc::new(RecordingSleeper::default()),
            Pacing::FixedInterval(Duration::from_secs(12)),
        );
        let pipeline = PackPipeline::new(
            db.clone(),
            generator,
            packs.clone(),
            ArchiveUrlPolicy::Signed(Duration::from_secs(600)),
        );
        Harness {
            pipeline,
            db,
            provider,
            images,
            packs,
        }
    }

    fn request(moods: Value) -> GenerationRequest {
        serde_json::from_value(json!({
            "config": {
                "style": "shinkai",
                "gender": "female",
                "hairStyle": "braid",
                "hairColor": "blue",
                "eyeColor": "green",
                "traits": ["glasses"],
                "moods": moods,
            },
            "userId": "user-7",
        }))
        .expect("request")
    }

    #[tokio::test]
    async fn mood_batch_completes_the_record() {
        let h = harness(ScriptedProvider::always(vec![vec![1, 2, 3]])).await;
        let response = h
            .pipeline
            .generate_moods(&request(json!(["sad", "avatar"])))
            .await
            .expect("moods");

        assert!(response.success);
        assert_eq!(response.images.len(), 2);
        assert_eq!(h.provider.sizes(), vec![(512, 512), (512, 512)]);
        assert!(h.provider.prompts()[0].contains("neutral expression"));

        let status = h.pipeline.status(&response.generation_id).await.expect("status");
        assert_eq!(status.status, GenerationStatus::Completed);
        assert_eq!(status.images.as_ref().map(|i| i["sad"].clone()), Some(json!(format!("memory://{}/sad.png", response.generation_id))));
        assert_eq!(status.config["hairStyle"], "braid");
        assert!(status.completed_at.is_some());

        let record = generations::find(&h.db, &response.generation_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(record.user_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn invalid_configs_create_no_record() {
        let h = harness(ScriptedProvider::always(vec![vec![1]])).await;
        let mut req = request(json!("all"));
        req.generation_id = Some("never".to_string());
        let err = h.pipeline.generate_moods(&req).await.expect_err("invalid");
        assert!(matches!(
            &err,
            AvatarPackError::InvalidConfig(invalid) if invalid.errors == vec!["Moods must be an array".to_string()]
        ));
        assert!(generations::find(&h.db, "never").await.expect("find").is_none());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn billing_failures_mark_the_record_failed() {
        let h = harness(ScriptedProvider::new(vec![Err(
            ProviderError::InsufficientCredit("402 Payment Required".to_string()),
        )]))
        .await;
        let mut req = request(json!([]));
        req.generation_id = Some("gen-broke".to_string());

        let err = h.pipeline.generate_moods(&req).await.expect_err("billing");
        assert!(matches!(err, AvatarPackError::InsufficientCredit { .. }));

        let status = h.pipeline.status("gen-broke").await.expect("status");
        assert_eq!(status.status, GenerationStatus::Failed);
        assert!(status.error.as_deref().is_some_and(|e| e.starts_with("Insufficient credit")));
    }

    #[tokio::test]
    async fn finished_generations_cannot_be_rerun() {
        let h = harness(ScriptedProvider::always(vec![vec![1]])).await;
        let mut req = request(json!(["avatar"]));
        req.generation_id = Some("gen-once".to_string());
        h.pipeline.generate_moods(&req).await.expect("first run");

        let err = h.pipeline.generate_moods(&req).await.expect_err("second run");
        assert!(matches!(err, AvatarPackError::Conflict(_)));
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn pack_flow_uploads_a_signed_archive() {
        let h = harness(ScriptedProvider::always(vec![png_bytes(48, 48)])).await;
        let mut req = request(json!([]));
        req.generation_id = Some("gen-pack".to_string());

        let response = h.pipeline.generate_pack(&req).await.expect("pack");
        assert_eq!(response.assets.avatars, transform::PLATFORMS.len());
        assert_eq!(response.assets.wallpapers, 2);
        assert!(response.assets.failed.is_empty());
        assert!(response.assets.zip_size > 0);
        assert_eq!(response.images.original, "memory://gen-pack/avatar.png");
        assert_eq!(
            response.images.zip,
            "memory://signed/gen-pack/avatar-pack.tar.gz?ttl=600"
        );
        assert_eq!(h.provider.sizes(), vec![(1024, 1024)]);
        assert!(h.images.object("gen-pack/avatar.png").is_some());
        assert_eq!(
            h.packs.object("gen-pack/avatar-pack.tar.gz").map(|a| a.len()),
            Some(response.assets.zip_size)
        );

        let record = generations::find(&h.db, "gen-pack")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(record.archive_path.as_deref(), Some("gen-pack/avatar-pack.tar.gz"));
        let status = h.pipeline.status("gen-pack").await.expect("status");
        assert_eq!(
            status.images.as_ref().map(|i| i["zip"].clone()),
            Some(json!("memory://signed/gen-pack/avatar-pack.tar.gz?ttl=600"))
        );
    }

    #[tokio::test]
    async fn undecodable_sources_fail_the_pack() {
        let h = harness(ScriptedProvider::always(vec![b"not a png".to_vec()])).await;
        let mut req = request(json!([]));
        req.generation_id = Some("gen-garbage".to_string());

        let err = h.pipeline.generate_pack(&req).await.expect_err("no avatars");
        assert!(matches!(err, AvatarPackError::GenerationFailed { .. }));
        assert!(h.packs.is_empty());

        let status = h.pipeline.status("gen-garbage").await.expect("status");
        assert_eq!(status.status, GenerationStatus::Failed);
        assert_eq!(
            status.error.as_deref(),
            Some("No avatar variants could be produced from the source image")
        );
    }

    #[tokio::test]
    async fn supplied_ids_of_running_generations_are_rejected() {
        let h = harness(ScriptedProvider::always(vec![vec![1]])).await;
        let running = validate_config(&request(json!(["avatar"])).config).expect("config");
        generations::create_processing(&h.db, "dup", Some("alice"), &running)
            .await
            .expect("running record");

        let mut req: GenerationRequest = serde_json::from_value(json!({
            "config": {
                "style": "ghibli",
                "gender": "male",
                "hairStyle": "short",
                "hairColor": "silver",
                "eyeColor": "red",
                "traits": [],
                "moods": ["avatar"],
            },
            "userId": "bob",
        }))
        .expect("request");
        req.generation_id = Some("dup".to_string());

        let err = h.pipeline.generate_moods(&req).await.expect_err("conflict");
        assert!(matches!(err, AvatarPackError::Conflict(_)));
        assert_eq!(h.provider.calls(), 0);

        let status = h.pipeline.status("dup").await.expect("status");
        assert_eq!(status.status, GenerationStatus::Processing);
        assert_eq!(status.config, serde_json::to_value(&running).expect("json"));
    }

    /// Deletes the generation's record while the image is being made.
    struct RecordDroppingProvider {
        db: DatabaseConnection,
        id: &'static str,
        outcome: Result<Vec<Vec<u8>>, ProviderError>,
    }

    #[async_trait::async_trait]
    impl ImageProvider for RecordDroppingProvider {
        async fn invoke(
            &self,
            _request: &crate::generation::provider::ImageRequest,
        ) -> Result<Vec<Vec<u8>>, ProviderError> {
            generations::Entity::delete_by_id(self.id.to_string())
                .exec(&self.db)
                .await
                .map_err(|err| ProviderError::Other(err.to_string()))?;
            self.outcome.clone()
        }
    }

    async fn pipeline_dropping_record(
        id: &'static str,
        outcome: Result<Vec<Vec<u8>>, ProviderError>,
    ) -> (PackPipeline, Arc<MemoryBlobStore>) {
        let db = crate::db::connect_test_db().await.expect("connect test db");
        crate::db::migrations::Migrator::up(&db, None)
            .await
            .expect("run migrations");
        let images = Arc::new(MemoryBlobStore::default());
        let generator = Generator::new(
            Arc::new(RecordDroppingProvider {
                db: db.clone(),
                id,
                outcome,
            }),
            images.clone(),
            Arc::new(RecordingSleeper::default()),
            Pacing::Unpaced,
        );
        let pipeline = PackPipeline::new(
            db,
            generator,
            Arc::new(MemoryBlobStore::default()),
            ArchiveUrlPolicy::Signed(Duration::from_secs(600)),
        );
        (pipeline, images)
    }

    #[tokio::test]
    async fn lost_record_updates_still_return_the_images() {
        let (pipeline, images) = pipeline_dropping_record("gen-vanished", Ok(vec![vec![4, 2]])).await;
        let mut req = request(json!(["avatar", "smug"]));
        req.generation_id = Some("gen-vanished".to_string());

        let response = pipeline.generate_moods(&req).await.expect("moods");
        assert!(response.success);
        assert_eq!(response.status, GenerationStatus::Completed);
        assert_eq!(
            response.images.get(&Mood::Smug).map(String::as_str),
            Some("memory://gen-vanished/smug.png")
        );
        assert_eq!(images.object("gen-vanished/avatar.png"), Some(vec![4, 2]));
        assert!(matches!(
            pipeline.status("gen-vanished").await,
            Err(AvatarPackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lost_record_updates_keep_the_generation_error() {
        let (pipeline, _) = pipeline_dropping_record(
            "gen-vanished",
            Err(ProviderError::InsufficientCredit("402".to_string())),
        )
        .await;
        let mut req = request(json!(["avatar"]));
        req.generation_id = Some("gen-vanished".to_string());

        let err = pipeline.generate_moods(&req).await.expect_err("billing");
        assert!(matches!(err, AvatarPackError::InsufficientCredit { .. }));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let h = harness(ScriptedProvider::always(vec![vec![1]])).await;
        assert!(matches!(
            h.pipeline.status("nope").await,
            Err(AvatarPackError::NotFound(_))
        ));
    }
}
