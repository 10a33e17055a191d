//! Generation records and their lifecycle: `processing` until one terminal update, then
//! `completed` or `failed` for good.

use chrono::Utc;
use rand::distr::{Alphanumeric, Distribution};
use sea_orm::{ActiveValue::Set, IntoActiveModel, TransactionTrait, entity::prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::avatar::AvatarConfig;
use crate::constants::GENERATION_ID_LENGTH;

/// Where a generation is in its lifecycle.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Work in flight
    #[sea_orm(string_value = "p")]
    Processing,
    #[sea_orm(string_value = "c")]
    #[allow(missing_docs)]
    Completed,
    #[sea_orm(string_value = "f")]
    #[allow(missing_docs)]
    Failed,
}

impl GenerationStatus {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// No further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "generations")]
/// One generation request
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    /// Generation id, also the storage prefix
    pub id: String,
    /// Requesting user, if known
    pub user_id: Option<String>,
    /// Style wire name
    pub style: String,
    /// The validated config
    pub config: Json,
    /// Output name → URL
    pub images: Option<Json>,
    /// Archive object path in the packs bucket
    pub archive_path: Option<String>,
    #[allow(missing_docs)]
    pub status: GenerationStatus,
    /// Set by billing, never by this crate
    pub paid: bool,
    /// Why it failed
    pub error_message: Option<String>,
    #[allow(missing_docs)]
    pub created_at: DateTimeUtc,
    /// When the terminal transition happened
    pub completed_at: Option<DateTimeUtc>,
}

/// no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    #[allow(missing_docs)]
    Database(#[from] DbErr),
    /// No record with that id
    #[error("Generation not found: {0}")]
    NotFound(String),
    /// The record already reached a terminal state
    #[error("Generation {id} is already {}", status.as_str())]
    AlreadyFinished {
        #[allow(missing_docs)]
        id: String,
        #[allow(missing_docs)]
        status: GenerationStatus,
    },
    /// A supplied id already belongs to another run
    #[error("Generation {id} already exists and is {}", status.as_str())]
    AlreadyClaimed {
        #[allow(missing_docs)]
        id: String,
        #[allow(missing_docs)]
        status: GenerationStatus,
    },
    /// Config couldn't be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fresh random generation id.
pub fn new_generation_id() -> String {
    Alphanumeric
        .sample_iter(rand::rng())
        .take(GENERATION_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Looks a record up by id.
pub async fn find(db: &DatabaseConnection, id: &str) -> Result<Option<Model>, DbErr> {
    Entity::find_by_id(id.to_string()).one(db).await
}

/// Inserts a new `processing` record.
pub async fn create_processing(
    db: &DatabaseConnection,
    id: &str,
    user_id: Option<&str>,
    config: &AvatarConfig,
) -> Result<Model, RecordError> {
    let model = active_processing(id, user_id, config)?.insert(db).await?;
    info!("Created generation {}", model.id);
    Ok(model)
}

/// Creates the `processing` record for a new run, under `id` when the client supplied one.
///
/// Each record belongs to exactly one run, so an id that already has a record, in any state, is
/// rejected and the stored record is left untouched.
pub async fn claim(
    db: &DatabaseConnection,
    id: Option<&str>,
    user_id: Option<&str>,
    config: &AvatarConfig,
) -> Result<Model, RecordError> {
    let Some(id) = id else {
        return create_processing(db, &new_generation_id(), user_id, config).await;
    };

    let txn = db.begin().await?;
    if let Some(existing) = Entity::find_by_id(id.to_string()).one(&txn).await? {
        debug!("Generation {} is already {}", existing.id, existing.status.as_str());
        return Err(RecordError::AlreadyClaimed {
            id: existing.id,
            status: existing.status,
        });
    }
    let model = active_processing(id, user_id, config)?.insert(&txn).await?;
    txn.commit().await?;
    info!("Created generation {}", model.id);
    Ok(model)
}

/// `processing → completed`, storing the output URLs and optional archive path.
pub async fn mark_completed(
    db: &DatabaseConnection,
    id: &str,
    images: Json,
    archive_path: Option<&str>,
) -> Result<Model, RecordError> {
    let txn = db.begin().await?;
    let mut am = processing_record(&txn, id).await?.into_active_model();
    am.status = Set(GenerationStatus::Completed);
    am.images = Set(Some(images));
    am.archive_path = Set(archive_path.map(str::to_string));
    am.error_message = Set(None);
    am.completed_at = Set(Some(Utc::now()));
    let model = am.update(&txn).await?;
    txn.commit().await?;
    info!("Generation {} completed", id);
    Ok(model)
}

/// `processing → failed`, keeping the reason.
pub async fn mark_failed(
    db: &DatabaseConnection,
    id: &str,
    message: &str,
) -> Result<Model, RecordError> {
    let txn = db.begin().await?;
    let mut am = processing_record(&txn, id).await?.into_active_model();
    am.status = Set(GenerationStatus::Failed);
    am.error_message = Set(Some(message.to_string()));
    am.completed_at = Set(Some(Utc::now()));
    let model = am.update(&txn).await?;
    txn.commit().await?;
    info!("Generation {} failed: {}", id, message);
    Ok(model)
}

async fn processing_record<C: ConnectionTrait>(db: &C, id: &str) -> Result<Model, RecordError> {
    let model = Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| RecordError::NotFound(id.to_string()))?;
    if model.status.is_terminal() {
        return Err(RecordError::AlreadyFinished {
            id: model.id,
            status: model.status,
        });
    }
    Ok(model)
}

fn active_processing(
    id: &str,
    user_id: Option<&str>,
    config: &AvatarConfig,
) -> Result<ActiveModel, RecordError> {
    Ok(ActiveModel {
        id: Set(id.to_string()),
        user_id: Set(user_id.map(str::to_string)),
        style: Set(config.style.as_str().to_string()),
        config: Set(serde_json::to_value(config)?),
        images: Set(None),
        archive_path: Set(None),
        status: Set(GenerationStatus::Processing),
        paid: Set(false),
        error_message: Set(None),
        created_at: Set(Utc::now()),
        completed_at: Set(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::{EyeColor, Gender, HairColor, HairStyle, Mood, Style};
    use sea_orm_migration::MigratorTrait;
    use serde_json::json;

    async fn setup_db() -> DatabaseConnection {
        let db = crate::db::connect_test_db().await.expect("connect test db");
        crate::db::migrations::Migrator::up(&db, None)
            .await
            .expect("run migrations");
        db
    }

    fn config() -> AvatarConfig {
        AvatarConfig {
            style: Style::Pixel,
            gender: Gender::Male,
            hair_style: HairStyle::Short,
            hair_color: HairColor::Black,
            eye_color: EyeColor::Gold,
            traits: vec![],
            moods: vec![Mood::Avatar],
        }
    }

    #[test]
    fn generated_ids_are_alphanumeric() {
        let id = new_generation_id();
        assert_eq!(id.len(), GENERATION_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_generation_id());
    }

    #[tokio::test]
    async fn completed_records_keep_images_and_archive() {
        let db = setup_db().await;
        let created = create_processing(&db, "gen-a", Some("user-1"), &config())
            .await
            .expect("create");
        assert_eq!(created.status, GenerationStatus::Processing);
        assert_eq!(created.style, "pixel");
        assert!(!created.paid);
        assert_eq!(created.config["hairColor"], "black");

        let done = mark_completed(
            &db,
            "gen-a",
            json!({"original": "u1", "zip": "u2"}),
            Some("gen-a/avatar-pack.tar.gz"),
        )
        .await
        .expect("complete");
        assert_eq!(done.status, GenerationStatus::Completed);
        assert!(done.completed_at.is_some());

        let found = find(&db, "gen-a").await.expect("find").expect("exists");
        assert_eq!(found.archive_path.as_deref(), Some("gen-a/avatar-pack.tar.gz"));
        assert_eq!(found.images, Some(json!({"original": "u1", "zip": "u2"})));
    }

    #[tokio::test]
    async fn terminal_records_reject_further_transitions() {
        let db = setup_db().await;
        create_processing(&db, "gen-b", None, &config())
            .await
            .expect("create");
        let failed = mark_failed(&db, "gen-b", "model exploded")
            .await
            .expect("fail");
        assert_eq!(failed.error_message.as_deref(), Some("model exploded"));

        assert!(matches!(
            mark_completed(&db, "gen-b", json!({}), None).await,
            Err(RecordError::AlreadyFinished {
                status: GenerationStatus::Failed,
                ..
            })
        ));
        assert!(matches!(
            mark_failed(&db, "gen-b", "again").await,
            Err(RecordError::AlreadyFinished { .. })
        ));
        assert!(matches!(
            mark_failed(&db, "missing", "nope").await,
            Err(RecordError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn claiming_an_existing_id_is_rejected_in_any_state() {
        let db = setup_db().await;

        let fresh = claim(&db, None, None, &config()).await.expect("claim new");
        assert_eq!(fresh.id.len(), GENERATION_ID_LENGTH);

        let supplied = claim(&db, Some("client-id"), Some("alice"), &config())
            .await
            .expect("claim supplied");
        assert_eq!(supplied.id, "client-id");

        let mut other = config();
        other.style = Style::Ghibli;
        other.hair_color = HairColor::Silver;
        assert!(matches!(
            claim(&db, Some("client-id"), Some("bob"), &other).await,
            Err(RecordError::AlreadyClaimed {
                status: GenerationStatus::Processing,
                ..
            })
        ));
        let stored = find(&db, "client-id").await.expect("find").expect("exists");
        assert_eq!(stored.style, "pixel");
        assert_eq!(stored.config["hairColor"], "black");
        assert_eq!(stored.user_id.as_deref(), Some("alice"));

        mark_completed(&db, "client-id", json!({}), None)
            .await
            .expect("complete");
        assert!(matches!(
            claim(&db, Some("client-id"), None, &config()).await,
            Err(RecordError::AlreadyClaimed {
                status: GenerationStatus::Completed,
                ..
            })
        ));
    }
}
