//! Parameter types for image operations.
//!
//! These types describe *what* to encode, not *how*. They sit between the
//! quality selection logic (which decides the quality for an image) and the
//! [`backend`](super::backend) (which does the pixel work), so backends can be
//! swapped (e.g. for a recording mock in tests) without touching the search.
//!
//! ## Types
//!
//! - [`Quality`]: JPEG encoding quality (1-100, default 90). Clamped on construction.
//! - [`EncodeParams`]: settings for one trial encode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy JPEG encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: Quality = Quality(1);
    pub const MAX: Quality = Quality(100);

    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for a single JPEG encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub quality: Quality,
}

impl EncodeParams {
    pub fn at(quality: Quality) -> Self {
        Self { quality }
    }
}
