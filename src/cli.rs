//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_ARCHIVE_URL_TTL_SECONDS, DEFAULT_PACING_SECONDS, MAX_GENERATION_ATTEMPTS, STORAGE_DIR,
};
use crate::generation::provider::DEFAULT_MODEL;

#[derive(Parser, Debug)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "AVATARPACK_DEBUG")]
    /// Enable debug logging. Env: AVATARPACK_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "9000", env = "AVATARPACK_PORT")]
    /// http listener, defaults to `9000`.
    /// Env: AVATARPACK_PORT
    pub port: NonZeroU16,
    #[clap(
        long,
        short,
        default_value = "127.0.0.1",
        env = "AVATARPACK_LISTEN_ADDRESS"
    )]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: AVATARPACK_LISTEN_ADDRESS
    pub listen_address: String,
    #[clap(
        long,
        short,
        default_value = "http://localhost:9000/",
        env = "AVATARPACK_BASE_URL"
    )]
    /// Public base URL that image and download links are built on.
    /// Env: AVATARPACK_BASE_URL
    pub base_url: url::Url,

    #[clap(long, short, default_value = "avatarpack.sqlite", env = "AVATARPACK_DATABASE_PATH")]
    /// Path to the database file, eg `/data/avatarpack.sqlite`.
    /// Env: AVATARPACK_DATABASE_PATH
    pub database_path: String,

    #[clap(long, default_value = STORAGE_DIR, env = "AVATARPACK_STORAGE_DIR")]
    /// Where generated images and archives are kept.
    /// Env: AVATARPACK_STORAGE_DIR
    pub storage_dir: PathBuf,

    #[clap(long, env = "AVATARPACK_REPLICATE_API_TOKEN", hide_env_values = true)]
    /// Replicate API token.
    /// Env: AVATARPACK_REPLICATE_API_TOKEN
    pub replicate_api_token: String,

    #[clap(long, default_value = DEFAULT_MODEL, env = "AVATARPACK_REPLICATE_MODEL")]
    /// Model to run, `owner/name`.
    /// Env: AVATARPACK_REPLICATE_MODEL
    pub replicate_model: String,

    #[clap(long, env = "AVATARPACK_SIGNING_SECRET", hide_env_values = true)]
    /// Secret for download link signatures; a random one is used per run if unset, so links
    /// won't survive a restart.
    /// Env: AVATARPACK_SIGNING_SECRET
    pub signing_secret: Option<String>,

    #[clap(long, default_value_t = DEFAULT_ARCHIVE_URL_TTL_SECONDS, env = "AVATARPACK_ARCHIVE_URL_TTL")]
    /// Lifetime of archive download links, in seconds.
    /// Env: AVATARPACK_ARCHIVE_URL_TTL
    pub archive_url_ttl: u64,

    #[clap(long, default_value_t = DEFAULT_PACING_SECONDS, env = "AVATARPACK_PACING_SECONDS")]
    /// Gap between mood generations in a batch, in seconds. `0` disables pacing.
    /// Env: AVATARPACK_PACING_SECONDS
    pub pacing_seconds: u64,

    #[clap(long, default_value_t = MAX_GENERATION_ATTEMPTS, env = "AVATARPACK_MAX_ATTEMPTS")]
    /// Provider calls per image before giving up, including the first.
    /// Env: AVATARPACK_MAX_ATTEMPTS
    pub max_attempts: u32,
}
