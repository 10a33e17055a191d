use std::sync::Arc;
use std::time::Duration;

use avatarpack::config::setup_logging;
use avatarpack::constants::{IMAGES_BUCKET, PACKS_BUCKET};
use avatarpack::generation::{Generator, RetryPolicy};
use avatarpack::generation::pacing::{Pacing, TokioSleeper};
use avatarpack::generation::provider::ReplicateProvider;
use avatarpack::packager::ArchiveUrlPolicy;
use avatarpack::pipeline::PackPipeline;
use avatarpack::storage::LocalBlobStore;
use clap::Parser;
use rand::distr::{Alphanumeric, Distribution};
use sea_orm_migration::MigratorTrait;
use tracing::{error, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = avatarpack::cli::CliOptions::parse();

    let _ = setup_logging(cli.debug);

    let db = match avatarpack::db::connect_db(&cli.database_path).await {
        Ok(db) => db,
        Err(err) => {
            error!("Database connection error: {}", err);
            return;
        }
    };

    if let Err(err) = avatarpack::db::migrations::Migrator::up(&db, None).await {
        error!("Database migration error: {}", err);
        return;
    }

    let secret = match cli.signing_secret {
        Some(secret) => secret,
        None => {
            warn!("No signing secret configured, download links will stop working on restart");
            Alphanumeric
                .sample_iter(rand::rng())
                .take(48)
                .map(char::from)
                .collect()
        }
    };

    let images = LocalBlobStore::new(&cli.storage_dir, IMAGES_BUCKET, cli.base_url.clone(), &secret);
    let packs = Arc::new(LocalBlobStore::new(
        &cli.storage_dir,
        PACKS_BUCKET,
        cli.base_url.clone(),
        &secret,
    ));

    let provider = ReplicateProvider::new(&cli.replicate_api_token, &cli.replicate_model);
    let generator = Generator::new(
        Arc::new(provider),
        Arc::new(images.clone()),
        Arc::new(TokioSleeper),
        Pacing::FixedInterval(Duration::from_secs(cli.pacing_seconds)),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: cli.max_attempts,
        ..RetryPolicy::default()
    });
    let pipeline = PackPipeline::new(
        db,
        generator,
        packs.clone(),
        ArchiveUrlPolicy::Signed(Duration::from_secs(cli.archive_url_ttl)),
    );

    if let Err(err) =
        avatarpack::web::setup_server(&cli.listen_address, cli.port, pipeline, &images, packs).await
    {
        error!("Application error: {}", err);
    }
}
