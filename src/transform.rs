//! Derives the per-platform avatars and wallpapers from one source portrait.
//!
//! Every catalog entry is rendered independently: one failing entry is reported in
//! [AssetReport::failures] and never stops the others.

use std::collections::BTreeMap;
use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageEncoder, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use tracing::{debug, info, warn};

/// Background for contain-fit wallpapers, `#1a1a2e`.
pub const WALLPAPER_BACKGROUND: Rgb<u8> = Rgb([0x1a, 0x1a, 0x2e]);

/// Outline of an avatar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shape {
    /// Masked to a circle, transparent outside it
    Circle,
    #[allow(missing_docs)]
    Square,
}

/// Folder an avatar lands in inside the pack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[allow(missing_docs)]
pub enum Category {
    Social,
    Gaming,
    Streaming,
    Professional,
}

impl Category {
    /// Directory name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Gaming => "gaming",
            Self::Streaming => "streaming",
            Self::Professional => "professional",
        }
    }
}

/// One platform's avatar requirements.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlatformSpec {
    /// Catalog key, also used in file names
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// Width and height in pixels
    pub size: u32,
    #[allow(missing_docs)]
    pub shape: Shape,
    #[allow(missing_docs)]
    pub category: Category,
    /// Flat colour to flatten onto, if any
    pub background: Option<Rgb<u8>>,
    /// Encode with alpha at maximum compression
    pub keep_transparency: bool,
}

const fn platform(
    key: &'static str,
    name: &'static str,
    size: u32,
    shape: Shape,
    category: Category,
) -> PlatformSpec {
    PlatformSpec {
        key,
        name,
        size,
        shape,
        category,
        background: None,
        keep_transparency: false,
    }
}

/// The platform catalog.
pub const PLATFORMS: &[PlatformSpec] = &[
    platform("discord", "Discord", 128, Shape::Circle, Category::Social),
    platform("twitter", "Twitter/X", 400, Shape::Circle, Category::Social),
    platform("instagram", "Instagram", 320, Shape::Circle, Category::Social),
    platform("facebook", "Facebook", 180, Shape::Circle, Category::Social),
    platform("linkedin", "LinkedIn", 400, Shape::Square, Category::Social),
    platform("tiktok", "TikTok", 200, Shape::Circle, Category::Social),
    platform("steam", "Steam", 184, Shape::Square, Category::Gaming),
    platform("xbox", "Xbox", 1080, Shape::Square, Category::Gaming),
    platform("playstation", "PlayStation", 1000, Shape::Square, Category::Gaming),
    platform("epicgames", "Epic Games", 512, Shape::Square, Category::Gaming),
    platform("nintendo", "Nintendo Switch", 256, Shape::Square, Category::Gaming),
    platform("twitch", "Twitch", 256, Shape::Circle, Category::Streaming),
    platform("youtube", "YouTube", 800, Shape::Circle, Category::Streaming),
    platform("kick", "Kick", 300, Shape::Circle, Category::Streaming),
    platform("highres", "High Resolution", 1024, Shape::Square, Category::Professional),
    PlatformSpec {
        keep_transparency: true,
        ..platform("transparent", "Transparent BG", 512, Shape::Square, Category::Professional)
    },
    platform("print", "Print Quality", 2048, Shape::Square, Category::Professional),
];

/// Looks up a platform by catalog key.
pub fn platform_spec(key: &str) -> Option<&'static PlatformSpec> {
    PLATFORMS.iter().find(|spec| spec.key == key)
}

/// How a wallpaper fills its frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fit {
    /// Scale to fill and crop the overflow
    Cover,
    /// Scale to fit and pad with [WALLPAPER_BACKGROUND]
    Contain,
}

/// One wallpaper format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct WallpaperSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
}

/// The wallpaper catalog.
pub const WALLPAPERS: &[WallpaperSpec] = &[
    WallpaperSpec {
        key: "mobile",
        name: "Mobile Wallpaper",
        width: 1080,
        height: 1920,
        fit: Fit::Cover,
    },
    WallpaperSpec {
        key: "desktop",
        name: "Desktop Wallpaper",
        width: 1920,
        height: 1080,
        fit: Fit::Contain,
    },
];

/// Errors rendering a single asset.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The source isn't an image we can read
    #[error("Failed to decode source image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode PNG: {0}")]
    #[allow(missing_docs)]
    Encode(image::ImageError),
}

/// An encoded PNG and its pixel size.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedAsset {
    /// PNG bytes
    pub bytes: Vec<u8>,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

/// What a catalog expansion produced, keyed by catalog key.
#[derive(Clone, Debug, Default)]
pub struct AssetReport {
    /// Rendered assets
    pub assets: BTreeMap<&'static str, RenderedAsset>,
    /// Entries that failed, with the reason
    pub failures: BTreeMap<&'static str, String>,
}

impl AssetReport {
    fn all_failed(keys: impl Iterator<Item = &'static str>, reason: &str) -> Self {
        Self {
            assets: BTreeMap::new(),
            failures: keys.map(|key| (key, reason.to_string())).collect(),
        }
    }
}

/// Renders every platform in the catalog.
pub fn expand_to_platforms(source: &[u8]) -> AssetReport {
    render_platforms(source, PLATFORMS)
}

/// Renders every wallpaper in the catalog.
pub fn expand_to_wallpapers(source: &[u8]) -> AssetReport {
    render_wallpapers(source, WALLPAPERS)
}

/// Renders the given platforms from encoded source bytes.
pub fn render_platforms(source: &[u8], platforms: &'static [PlatformSpec]) -> AssetReport {
    let image = match decode(source) {
        Ok(image) => image,
        Err(err) => {
            warn!("Cannot render avatars: {}", err);
            return AssetReport::all_failed(platforms.iter().map(|p| p.key), &err.to_string());
        }
    };

    let mut report = AssetReport::default();
    for spec in platforms {
        match render_platform(&image, spec) {
            Ok(asset) => {
                debug!("Rendered {} ({}x{})", spec.name, asset.width, asset.height);
                report.assets.insert(spec.key, asset);
            }
            Err(err) => {
                warn!("Failed to render {}: {}", spec.name, err);
                report.failures.insert(spec.key, err.to_string());
            }
        }
    }
    info!(
        "Rendered {}/{} platform avatars",
        report.assets.len(),
        platforms.len()
    );
    report
}

/// Renders the given wallpapers from encoded source bytes.
pub fn render_wallpapers(source: &[u8], wallpapers: &'static [WallpaperSpec]) -> AssetReport {
    let image = match decode(source) {
        Ok(image) => image,
        Err(err) => {
            warn!("Cannot render wallpapers: {}", err);
            return AssetReport::all_failed(wallpapers.iter().map(|w| w.key), &err.to_string());
        }
    };

    let mut report = AssetReport::default();
    for spec in wallpapers {
        match render_wallpaper(&image, spec) {
            Ok(asset) => {
                report.assets.insert(spec.key, asset);
            }
            Err(err) => {
                warn!("Failed to render {}: {}", spec.name, err);
                report.failures.insert(spec.key, err.to_string());
            }
        }
    }
    info!(
        "Rendered {}/{} wallpapers",
        report.assets.len(),
        wallpapers.len()
    );
    report
}

fn decode(source: &[u8]) -> Result<DynamicImage, TransformError> {
    image::load_from_memory(source).map_err(TransformError::Decode)
}

/// Cover-fit, mask, flatten and encode a single platform avatar.
pub fn render_platform(
    source: &DynamicImage,
    spec: &PlatformSpec,
) -> Result<RenderedAsset, TransformError> {
    let mut canvas = source
        .resize_to_fill(spec.size, spec.size, FilterType::Lanczos3)
        .to_rgba8();

    if spec.shape == Shape::Circle {
        apply_mask(&mut canvas, &circle_mask(spec.size));
    }

    let bytes = if spec.keep_transparency {
        encode_rgba(&canvas, CompressionType::Best)?
    } else if let Some(background) = spec.background {
        encode_rgb(&flatten(&canvas, background))?
    } else {
        encode_rgba(&canvas, CompressionType::Default)?
    };

    Ok(RenderedAsset {
        bytes,
        width: spec.size,
        height: spec.size,
    })
}

/// Fit and encode a single wallpaper.
pub fn render_wallpaper(
    source: &DynamicImage,
    spec: &WallpaperSpec,
) -> Result<RenderedAsset, TransformError> {
    let bytes = match spec.fit {
        Fit::Cover => {
            let filled = source
                .resize_to_fill(spec.width, spec.height, FilterType::Lanczos3)
                .to_rgba8();
            encode_rgba(&filled, CompressionType::Default)?
        }
        Fit::Contain => {
            let fitted = source
                .resize(spec.width, spec.height, FilterType::Lanczos3)
                .to_rgba8();
            let [r, g, b] = WALLPAPER_BACKGROUND.0;
            let mut canvas = RgbaImage::from_pixel(spec.width, spec.height, Rgba([r, g, b, 255]));
            let x = i64::from(spec.width.saturating_sub(fitted.width()) / 2);
            let y = i64::from(spec.height.saturating_sub(fitted.height()) / 2);
            imageops::overlay(&mut canvas, &fitted, x, y);
            encode_rgb(&DynamicImage::ImageRgba8(canvas).to_rgb8())?
        }
    };

    Ok(RenderedAsset {
        bytes,
        width: spec.width,
        height: spec.height,
    })
}

/// White disc of radius `size / 2` with a one pixel anti-aliased rim.
pub fn circle_mask(size: u32) -> GrayImage {
    let radius = f64::from(size) / 2.0;
    GrayImage::from_fn(size, size, |x, y| {
        let dx = f64::from(x) + 0.5 - radius;
        let dy = f64::from(y) + 0.5 - radius;
        let coverage = (radius - (dx * dx + dy * dy).sqrt() + 0.5).clamp(0.0, 1.0);
        Luma([(coverage * 255.0).round() as u8])
    })
}

/// Destination-in: keeps the canvas where the mask is white.
fn apply_mask(canvas: &mut RgbaImage, mask: &GrayImage) {
    for (pixel, coverage) in canvas.pixels_mut().zip(mask.pixels()) {
        let alpha = u16::from(pixel.0[3]) * u16::from(coverage.0[0]);
        pixel.0[3] = ((alpha + 127) / 255) as u8;
    }
}

fn flatten(canvas: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let Rgba([r, g, b, a]) = *canvas.get_pixel(x, y);
        let blend = |fg: u8, bg: u8| {
            let a = u16::from(a);
            ((u16::from(fg) * a + u16::from(bg) * (255 - a) + 127) / 255) as u8
        };
        Rgb([
            blend(r, background.0[0]),
            blend(g, background.0[1]),
            blend(b, background.0[2]),
        ])
    })
}

fn encode_rgba(image: &RgbaImage, compression: CompressionType) -> Result<Vec<u8>, TransformError> {
    let mut out = Cursor::new(Vec::new());
    PngEncoder::new_with_quality(&mut out, compression, PngFilter::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(TransformError::Encode)?;
    Ok(out.into_inner())
}

fn encode_rgb(image: &RgbImage) -> Result<Vec<u8>, TransformError> {
    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(TransformError::Encode)?;
    Ok(out.into_inner())
}
