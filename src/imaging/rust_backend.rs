//! Pure Rust image processing backend, no system libraries needed.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (PNG, WebP, BMP, TIFF, GIF, JPEG) | `image` crate (pure Rust decoders) |
//! | Flatten to RGB | `DynamicImage::to_rgb8` (alpha dropped, JPEG has no alpha channel) |
//! | Encode → JPEG | `jpeg_encoder::Encoder` with optimized Huffman tables, in memory |
//!
//! Every encode, size-search probes included, builds Huffman tables from the
//! image's own symbol statistics instead of using the standard ones.

use super::backend::{BackendError, ImageBackend};
use super::params::{EncodeParams, Quality};
use image::{ImageFormat, ImageReader, RgbImage};
use jpeg_encoder::{ColorType, Encoder};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const DECODE_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("png", ImageFormat::Png),
    ("webp", ImageFormat::WebP),
    ("bmp", ImageFormat::Bmp),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("gif", ImageFormat::Gif),
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
];

static DECODABLE_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    DECODE_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn decodable_extensions() -> &'static [&'static str] {
    &DECODABLE_EXTENSIONS
}

/// Whether `ext` (with or without a leading dot, any case) has a decoder.
pub fn is_decodable_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    DECODABLE_EXTENSIONS.iter().any(|e| *e == ext)
}

/// Encode RGB pixels as baseline JPEG into a fresh buffer.
fn encode_jpeg(image: &RgbImage, quality: Quality, optimized: bool) -> Result<Vec<u8>, BackendError> {
    let (Ok(width), Ok(height)) = (u16::try_from(image.width()), u16::try_from(image.height()))
    else {
        return Err(BackendError::Encode(format!(
            "{}x{} exceeds the JPEG limit of {} pixels per side",
            image.width(),
            image.height(),
            u16::MAX
        )));
    };
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, quality.value());
    encoder.set_optimized_huffman_tables(optimized);
    encoder
        .encode(image.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| BackendError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBackend for RustBackend {
    fn decode(&self, path: &Path) -> Result<RgbImage, BackendError> {
        let decode_err = |reason: String| BackendError::Decode {
            path: path.display().to_string(),
            reason,
        };
        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| decode_err(e.to_string()))?;
        Ok(img.to_rgb8())
    }

    fn encode(&self, image: &RgbImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        encode_jpeg(image, params.quality, true)
    }
}
