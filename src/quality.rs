//! Quality selection: which JPEG quality each image is encoded at.
//!
//! Everything here is pure: no I/O, no images. The transmuter feeds real
//! encode sizes into [`search_highest_fitting`]; tests feed synthetic curves.
//!
//! # Strategies
//!
//! | Strategy | Decision | Encodes per image |
//! |---|---|---|
//! | [`Strategy::TargetSize`] | highest quality whose encode fits the byte budget | several (search) |
//! | [`Strategy::RelativeQuality`] | quality scaled by size relative to the batch average | one |
//!
//! ## Size-target search
//!
//! Probing starts at `max_quality` and descends in coarse steps sized by how far
//! the last probe overshot the target (overshoot > 1.5× → 10, > 1.1× → 5, else 2).
//! The last coarse step is clamped so `min_quality` is always probed. Once a
//! probe fits, the qualities skipped by the final step are re-probed from the
//! top down, so the answer is the highest fitting quality in `[min, max]`,
//! provided encoded size never grows as quality drops.
//!
//! ## Relative quality curve
//!
//! With `r = original_size / average_size`:
//!
//! ```text
//! r >= 1:  q = base - (base - min) * (1 - 1/r)     // r = 1 → base, r → ∞ → min
//! r <  1:  q = base + (max - base) * (1 - r)       // r → 0 → max
//! ```
//!
//! Continuous at `r = 1`, non-increasing in `r`, rounded to the nearest
//! integer and clamped to `[min, max]`.

use crate::imaging::Quality;
use crate::inventory::ImageRecord;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("min_quality ({min}) must not exceed max_quality ({max})")]
    InvertedBounds { min: u8, max: u8 },
    #[error("base_quality ({base}) must lie within [{min}, {max}]")]
    BaseOutOfRange { base: u8, min: u8, max: u8 },
    #[error("target size must be at least 1 KB")]
    ZeroTarget,
    #[error("relative quality needs a batch average, but the batch is empty")]
    NoAverage,
}

/// How qualities are chosen for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TargetSize {
        target_kb: u64,
        min_quality: Quality,
        max_quality: Quality,
        save_best_effort: bool,
    },
    RelativeQuality {
        base_quality: Quality,
        min_quality: Quality,
        max_quality: Quality,
    },
}

impl Strategy {
    /// Check the quality ordering invariants.
    pub fn validate(&self) -> Result<(), StrategyError> {
        let (min, max) = self.bounds();
        if min > max {
            return Err(StrategyError::InvertedBounds {
                min: min.value(),
                max: max.value(),
            });
        }
        match *self {
            Strategy::TargetSize { target_kb: 0, .. } => Err(StrategyError::ZeroTarget),
            Strategy::TargetSize { .. } => Ok(()),
            Strategy::RelativeQuality { base_quality, .. } => {
                if base_quality < min || base_quality > max {
                    Err(StrategyError::BaseOutOfRange {
                        base: base_quality.value(),
                        min: min.value(),
                        max: max.value(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// `(min_quality, max_quality)` for either variant.
    pub fn bounds(&self) -> (Quality, Quality) {
        match *self {
            Strategy::TargetSize {
                min_quality,
                max_quality,
                ..
            }
            | Strategy::RelativeQuality {
                min_quality,
                max_quality,
                ..
            } => (min_quality, max_quality),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::TargetSize { .. } => "target size",
            Strategy::RelativeQuality { .. } => "relative quality",
        }
    }
}

/// A strategy resolved for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPlan {
    /// Encode once at this quality.
    Fixed(Quality),
    /// Search for the highest quality whose encode fits `target_bytes`.
    Search {
        target_bytes: u64,
        min: Quality,
        max: Quality,
        save_best_effort: bool,
    },
}

impl QualityPlan {
    /// Resolve `strategy` for `record`, given the batch's average size in bytes.
    pub fn for_record(
        strategy: &Strategy,
        record: &ImageRecord,
        average: Option<f64>,
    ) -> Result<Self, StrategyError> {
        match *strategy {
            Strategy::TargetSize {
                target_kb,
                min_quality,
                max_quality,
                save_best_effort,
            } => Ok(QualityPlan::Search {
                target_bytes: target_kb.saturating_mul(1024),
                min: min_quality,
                max: max_quality,
                save_best_effort,
            }),
            Strategy::RelativeQuality {
                base_quality,
                min_quality,
                max_quality,
            } => {
                let average = average.ok_or(StrategyError::NoAverage)?;
                Ok(QualityPlan::Fixed(relative_quality(
                    record.original_size_bytes,
                    average,
                    base_quality,
                    min_quality,
                    max_quality,
                )))
            }
        }
    }
}

/// Quality for an image of `original` bytes in a batch averaging `average` bytes.
///
/// See the [module docs](self) for the curve.
pub fn relative_quality(
    original: u64,
    average: f64,
    base: Quality,
    min: Quality,
    max: Quality,
) -> Quality {
    if !(average.is_finite() && average > 0.0) {
        return base.max(min).min(max);
    }
    let (b, lo, hi) = (base.value() as f64, min.value() as f64, max.value() as f64);
    let ratio = original as f64 / average;

    let q = if ratio >= 1.0 {
        b - (b - lo) * (1.0 - 1.0 / ratio)
    } else {
        b + (hi - b) * (1.0 - ratio)
    };
    Quality::new(q.round().max(lo).min(hi) as u32)
}

/// Quality drop for the next coarse probe, from how far `size` overshot `target`.
pub fn coarse_step(size: u64, target: u64) -> u8 {
    let overshoot = size as f64 / target.max(1) as f64;
    if overshoot > 1.5 {
        10
    } else if overshoot > 1.1 {
        5
    } else {
        2
    }
}

/// One trial encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub quality: Quality,
    pub size_bytes: u64,
}

/// What the size-target search settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Highest quality whose encode fit the target, if any did.
    pub best_fit: Option<Quality>,
    /// Smallest encode seen across all probes.
    pub smallest: Option<Probe>,
    /// Number of probes run.
    pub probes: u32,
}

/// Find the highest quality in `[min, max]` whose encoded size is at most `target_bytes`.
///
/// `probe` encodes at a quality and reports the size in bytes. Errors from
/// `probe` abort the search and are returned unchanged.
pub fn search_highest_fitting<E>(
    min: Quality,
    max: Quality,
    target_bytes: u64,
    mut probe: impl FnMut(Quality) -> Result<u64, E>,
) -> Result<SearchResult, E> {
    let mut result = SearchResult {
        best_fit: None,
        smallest: None,
        probes: 0,
    };
    let (min, max) = (min.value(), max.value().max(min.value()));

    let mut measure = |q: u8, result: &mut SearchResult| -> Result<u64, E> {
        let quality = Quality::new(q as u32);
        let size_bytes = probe(quality)?;
        result.probes += 1;
        if result.smallest.is_none_or(|s| size_bytes < s.size_bytes) {
            result.smallest = Some(Probe {
                quality,
                size_bytes,
            });
        }
        Ok(size_bytes)
    };

    let mut q = max;
    let mut lowest_too_big: Option<u8> = None;
    loop {
        let size = measure(q, &mut result)?;
        if size <= target_bytes {
            if let Some(too_big) = lowest_too_big {
                for candidate in (q + 1..too_big).rev() {
                    if measure(candidate, &mut result)? <= target_bytes {
                        result.best_fit = Some(Quality::new(candidate as u32));
                        return Ok(result);
                    }
                }
            }
            result.best_fit = Some(Quality::new(q as u32));
            return Ok(result);
        }

        lowest_too_big = Some(q);
        if q <= min {
            return Ok(result);
        }
        q = q.saturating_sub(coarse_step(size, target_bytes)).max(min);
    }
}
