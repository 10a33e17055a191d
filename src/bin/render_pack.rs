use anyhow::{Context, Result, anyhow};
use avatarpack::avatar::Style;
use avatarpack::config::setup_logging;
use avatarpack::db::entities::generations::new_generation_id;
use avatarpack::packager::{PackMetadata, pack};
use avatarpack::transform::{expand_to_platforms, expand_to_wallpapers};
use chrono::Utc;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

/// Build an avatar-pack archive from a local portrait, without calling any model.
///
///   render_pack portrait.png --style ghibli
#[derive(Parser, Debug)]
#[command(name = "render_pack")]
struct Args {
    /// Square-ish source portrait (PNG or JPEG)
    input: PathBuf,

    /// Style recorded in the README
    #[arg(long, default_value = "genshin", value_parser = parse_style)]
    style: Style,

    /// Id used for the archive's root folder; random when unset
    #[arg(long)]
    generation_id: Option<String>,

    /// Output file, defaults to ./avatar-pack-<id>.tar.gz
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "AVATARPACK_DEBUG")]
    debug: bool,
}

fn parse_style(value: &str) -> Result<Style, String> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("unknown style '{value}'"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _ = setup_logging(args.debug);

    let source = fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let avatars = expand_to_platforms(&source);
    if avatars.assets.is_empty() {
        let reason = avatars
            .failures
            .values()
            .next()
            .cloned()
            .unwrap_or_default();
        return Err(anyhow!("No avatars could be rendered: {reason}"));
    }
    let wallpapers = expand_to_wallpapers(&source);
    for (key, reason) in avatars.failures.iter().chain(wallpapers.failures.iter()) {
        eprintln!("Skipped {key}: {reason}");
    }

    let metadata = PackMetadata {
        generation_id: args.generation_id.unwrap_or_else(new_generation_id),
        style: args.style,
        created_at: Utc::now(),
    };
    let archive = pack(&avatars, &wallpapers, &metadata).context("Failed to build archive")?;

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(format!("avatar-pack-{}.tar.gz", metadata.generation_id)));
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&out, &archive).with_context(|| format!("Failed to write {}", out.display()))?;

    eprintln!(
        "Saved {} ({} avatars, {} wallpapers, {} bytes)",
        out.display(),
        avatars.assets.len(),
        wallpapers.assets.len(),
        archive.len()
    );
    Ok(())
}
