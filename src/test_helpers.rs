//! Shared test utilities for the holy-compress test suite.
//!
//! Generates synthetic source images on the fly so tests need no binary
//! fixtures. Noise images are seeded, so the same seed always produces the same
//! pixels and the same encode sizes.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! write_noise_png(tmp.path(), "busy.png", 256, 256, 42);
//! write_gradient_png(tmp.path(), "calm.png", 256, 256);
//! ```

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

use crate::batch::BatchSummary;
use crate::transmute::{OutcomeStatus, TransmutationOutcome};

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a smooth RGB gradient PNG. Compresses very well as JPEG.
pub fn write_gradient_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

/// Write a seeded random-noise PNG. Compresses poorly as JPEG, so encode size
/// climbs steeply with quality.
pub fn write_noise_png(dir: &Path, name: &str, width: u32, height: u32, seed: u64) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::new(width, height);
    for pixel in img.pixels_mut() {
        *pixel = Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

// =========================================================================
// Outcome lookups (panic with a clear message on miss)
// =========================================================================

/// Find the outcome for a source file name. Panics if not found.
pub fn find_outcome<'a>(
    outcomes: &'a [TransmutationOutcome],
    file_name: &str,
) -> &'a TransmutationOutcome {
    outcomes
        .iter()
        .find(|o| o.source_path.file_name().is_some_and(|n| n == file_name))
        .unwrap_or_else(|| {
            let names: Vec<String> = outcomes
                .iter()
                .map(|o| o.source_path.display().to_string())
                .collect();
            panic!("no outcome for '{file_name}'. Available: {names:?}")
        })
}

/// Count outcomes with the given status.
pub fn count_status(outcomes: &[TransmutationOutcome], status: OutcomeStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

/// Assert the summary's counters add up to the batch size.
pub fn assert_summary_balanced(summary: &BatchSummary) {
    let accounted = summary.succeeded
        + summary.partial
        + summary.failed
        + summary.skipped
        + summary.not_attempted;
    assert_eq!(
        accounted, summary.total_images,
        "summary counters do not add up: {summary:?}"
    );
}

/// List the file names in a directory, sorted.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
