//! Image decoding and JPEG encoding in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (format sniffed from content) |
//! | **Encode → JPEG** | `jpeg_encoder::Encoder`, optimized Huffman tables, in memory |
//!
//! The module is split into:
//! - **Parameters**: [`Quality`] and per-encode parameters
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use params::{EncodeParams, Quality};
pub use rust_backend::{RustBackend, decodable_extensions, is_decodable_extension};
