//! Output file naming.
//!
//! Every saved JPEG records how it was produced in its name:
//!
//! ```text
//! {stem}_{size_kb}kb_q{quality}_id{token}.jpeg
//! ```
//!
//! - `stem`: source file name without extension
//! - `size_kb`: saved size in whole kilobytes, rounded down (1 KB = 1024 bytes)
//! - `quality`: JPEG quality the file was encoded at
//! - `token`: random four-digit number so re-runs never overwrite earlier output
//!
//! `photo.png` saved at 153 600 bytes and quality 72 becomes
//! `photo_150kb_q72_id4821.jpeg`.

use crate::imaging::Quality;
use rand::Rng;
use std::ops::RangeInclusive;

pub const OUTPUT_EXTENSION: &str = "jpeg";
pub const TOKEN_RANGE: RangeInclusive<u16> = 1000..=9999;

/// Build the output file name for a saved image.
pub fn output_file_name(stem: &str, size_bytes: u64, quality: Quality, token: u16) -> String {
    format!(
        "{stem}_{}kb_q{}_id{token}.{OUTPUT_EXTENSION}",
        size_bytes / 1024,
        quality.value()
    )
}

/// Draw a fresh disambiguation token.
pub fn random_token() -> u16 {
    rand::thread_rng().gen_range(TOKEN_RANGE)
}

/// Fields recovered from an output file name.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputName {
    pub stem: String,
    pub size_kb: u64,
    pub quality: u8,
    pub token: u16,
}

/// Parse a name produced by [`output_file_name`].
///
/// Splits from the right, so stems that themselves contain underscores parse
/// correctly. Returns `None` for anything that does not follow the pattern.
pub fn parse_output_name(name: &str) -> Option<OutputName> {
    let base = name.strip_suffix(&format!(".{OUTPUT_EXTENSION}"))?;

    let (rest, token) = base.rsplit_once("_id")?;
    let (rest, quality) = rest.rsplit_once("_q")?;
    let (stem, size) = rest.rsplit_once('_')?;
    let size_kb = size.strip_suffix("kb")?.parse().ok()?;

    let token: u16 = token.parse().ok()?;
    let quality: u8 = quality.parse().ok()?;
    if stem.is_empty() || !TOKEN_RANGE.contains(&token) || !(1..=100).contains(&quality) {
        return None;
    }
    Some(OutputName {
        stem: stem.to_string(),
        size_kb,
        quality,
        token,
    })
}
