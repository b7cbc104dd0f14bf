//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the transmuter needs:
//! decode a source file into RGB pixels, and encode those pixels as JPEG at a
//! given quality into memory. Encodes stay in memory so the size-target search
//! can measure each probe without touching the output directory.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), which is pure Rust with
//! no external dependencies.

use super::params::EncodeParams;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("JPEG encode failed: {0}")]
    Encode(String),
}

/// Trait for image processing backends.
///
/// Implementations are shared by every worker in the pool, hence the
/// `Send + Sync` bound.
pub trait ImageBackend: Send + Sync {
    /// Decode a source image and flatten it to 8-bit RGB.
    fn decode(&self, path: &Path) -> Result<RgbImage, BackendError>;

    /// Encode pixels as JPEG, returning the encoded bytes.
    fn encode(&self, image: &RgbImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError>;
}
