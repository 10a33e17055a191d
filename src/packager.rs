//! Bundles rendered assets into a gzip-compressed tar and uploads it.

use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::avatar::Style;
use crate::storage::{BlobStore, StorageError};
use crate::transform::{AssetReport, PLATFORMS, WALLPAPERS, platform_spec};

/// File name of the archive inside the generation's folder.
pub const ARCHIVE_FILE_NAME: &str = "avatar-pack.tar.gz";

/// MIME type the archive is stored with.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// Errors building or storing an archive.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Two inputs mapped onto the same archive path
    #[error("Duplicate archive entry: {0}")]
    DuplicatePath(String),
    /// An avatar key that isn't in the platform catalog
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("Failed to write archive: {0}")]
    #[allow(missing_docs)]
    Io(#[from] std::io::Error),
    #[error("Failed to store archive: {0}")]
    #[allow(missing_docs)]
    Storage(#[from] StorageError),
}

/// Who and when, for the archive's root folder, README and timestamps.
#[derive(Clone, Debug)]
pub struct PackMetadata {
    #[allow(missing_docs)]
    pub generation_id: String,
    #[allow(missing_docs)]
    pub style: Style,
    /// Used as every entry's mtime
    pub created_at: DateTime<Utc>,
}

impl PackMetadata {
    fn root(&self) -> String {
        format!("avatar-pack-{}", self.generation_id)
    }
}

/// Which kind of URL an uploaded archive is handed out with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveUrlPolicy {
    /// Plain public URL
    Public,
    /// Expiring signed URL
    Signed(Duration),
}

/// Where an archive ended up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadedArchive {
    /// Object path in the bucket, for re-signing later
    pub path: String,
    /// URL handed to the client
    pub url: String,
}

struct PackWriter {
    builder: tar::Builder<GzEncoder<Vec<u8>>>,
    seen: HashSet<String>,
    mtime: u64,
}

impl PackWriter {
    fn new(mtime: u64) -> Self {
        Self {
            builder: tar::Builder::new(GzEncoder::new(Vec::new(), Compression::best())),
            seen: HashSet::new(),
            mtime,
        }
    }

    fn add(&mut self, path: String, bytes: &[u8]) -> Result<(), PackError> {
        if !self.seen.insert(path.clone()) {
            return Err(PackError::DuplicatePath(path));
        }
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.builder.append_data(&mut header, &path, bytes)?;
        debug!("Packed {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, PackError> {
        let mut encoder = self.builder.into_inner()?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }
}

/// Writes the archive for one generation.
///
/// Layout, under `avatar-pack-<id>/`: `avatars/<category>/<platform>_<w>x<h>.png`,
/// `wallpapers/<key>_<w>x<h>.png`, `README.txt` and `LICENSE.txt`.
pub fn pack(
    avatars: &AssetReport,
    wallpapers: &AssetReport,
    metadata: &PackMetadata,
) -> Result<Vec<u8>, PackError> {
    let root = metadata.root();
    let mtime = u64::try_from(metadata.created_at.timestamp()).unwrap_or_default();
    let mut writer = PackWriter::new(mtime);

    for (key, asset) in &avatars.assets {
        let spec = platform_spec(key).ok_or_else(|| PackError::UnknownPlatform(key.to_string()))?;
        writer.add(
            format!(
                "{root}/avatars/{}/{key}_{}x{}.png",
                spec.category.as_str(),
                asset.width,
                asset.height
            ),
            &asset.bytes,
        )?;
    }
    for (key, asset) in &wallpapers.assets {
        writer.add(
            format!("{root}/wallpapers/{key}_{}x{}.png", asset.width, asset.height),
            &asset.bytes,
        )?;
    }
    writer.add(format!("{root}/README.txt"), readme(avatars, wallpapers, metadata).as_bytes())?;
    writer.add(format!("{root}/LICENSE.txt"), license(metadata).as_bytes())?;

    let archive = writer.finish()?;
    info!(
        "Packed {} avatars and {} wallpapers into {} bytes",
        avatars.assets.len(),
        wallpapers.assets.len(),
        archive.len()
    );
    Ok(archive)
}

/// Stores the archive at `<generation_id>/avatar-pack.tar.gz` and returns its URL per `policy`.
pub async fn upload(
    store: &dyn BlobStore,
    archive: Vec<u8>,
    generation_id: &str,
    policy: ArchiveUrlPolicy,
) -> Result<UploadedArchive, PackError> {
    let path = format!("{generation_id}/{ARCHIVE_FILE_NAME}");
    let public_url = store
        .put_object(&path, archive, ARCHIVE_CONTENT_TYPE)
        .await?;
    let url = match policy {
        ArchiveUrlPolicy::Public => public_url,
        ArchiveUrlPolicy::Signed(ttl) => store.create_signed_url(&path, ttl).await?,
    };
    Ok(UploadedArchive { path, url })
}

fn readme(avatars: &AssetReport, wallpapers: &AssetReport, metadata: &PackMetadata) -> String {
    let mut out = String::new();
    out.push_str("ANIME AVATAR PACK\n=================\n\n");
    out.push_str(&format!("Generation: {}\n", metadata.generation_id));
    out.push_str(&format!("Style: {}\n", metadata.style));
    out.push_str(&format!(
        "Created: {}\n\n",
        metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("AVATARS\n-------\n");
    out.push_str("Upload the file for each platform as your profile picture. Circle\n");
    out.push_str("avatars are already cropped, with transparent corners.\n\n");
    for spec in PLATFORMS {
        if let Some(asset) = avatars.assets.get(spec.key) {
            out.push_str(&format!(
                "  {:<18} avatars/{}/{}_{}x{}.png\n",
                spec.name,
                spec.category.as_str(),
                spec.key,
                asset.width,
                asset.height
            ));
        }
    }

    out.push_str("\nWALLPAPERS\n----------\n");
    for spec in WALLPAPERS {
        if let Some(asset) = wallpapers.assets.get(spec.key) {
            out.push_str(&format!(
                "  {:<18} wallpapers/{}_{}x{}.png\n",
                spec.name, spec.key, asset.width, asset.height
            ));
        }
    }

    if !avatars.failures.is_empty() || !wallpapers.failures.is_empty() {
        out.push_str("\nNot included (failed to render):\n");
        for key in avatars.failures.keys().chain(wallpapers.failures.keys()) {
            out.push_str(&format!("  {key}\n"));
        }
    }

    out.push_str("\nSee LICENSE.txt for usage rights.\n");
    out
}

fn license(metadata: &PackMetadata) -> String {
    format!(
        "AVATAR PACK LICENSE\n\
         ===================\n\n\
         Pack {} generated {}.\n\n\
         The purchaser may use the images in this pack for personal and commercial\n\
         purposes, including profile pictures, streaming overlays, merchandise and\n\
         print, without attribution.\n\n\
         You may not resell or redistribute the images as a stock asset pack, or claim\n\
         exclusive copyright over the generated artwork.\n",
        metadata.generation_id,
        metadata.created_at.format("%Y-%m-%d")
    )
}
