//! # holy-compress
//!
//! Batch recompression of an image folder into size-constrained JPEGs.
//! Point it at a directory of PNG, WebP, BMP, TIFF or GIF files and it writes
//! one JPEG per image into an output directory, choosing each image's quality
//! by one of two strategies.
//!
//! # Architecture: Scan, Plan, Transmute
//!
//! ```text
//! 1. Scan       input/    →  Inventory          (file sizes only, no decoding)
//! 2. Plan       Strategy  →  QualityPlan/image  (fixed quality, or size search)
//! 3. Transmute  per image →  output/*.jpeg      (parallel, one outcome each)
//! ```
//!
//! The batch coordinator runs step 3 on a worker pool, streams one progress
//! event per finished image, and ends with a [`BatchSummary`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`inventory`] | Scans the input directory and computes size statistics |
//! | [`quality`] | Strategies and the pure quality-selection math |
//! | [`imaging`] | Decode any input format to RGB, encode JPEG in memory |
//! | [`transmute`] | One image end to end: decode, choose quality, encode, write |
//! | [`batch`] | Worker pool, progress events, cancellation, summary |
//! | [`naming`] | `{stem}_{kb}kb_q{quality}_id{token}.jpeg` output names |
//! | [`config`] | Optional TOML defaults for the CLI |
//! | [`output`] | CLI output formatting |
//!
//! # Usage
//!
//! ```no_run
//! use holy_compress::{BatchRequest, Quality, ScanOptions, Strategy, output};
//!
//! let request = BatchRequest {
//!     input_dir: "input".into(),
//!     output_dir: "output".into(),
//!     strategy: Strategy::TargetSize {
//!         target_kb: 250,
//!         min_quality: Quality::new(70),
//!         max_quality: Quality::new(98),
//!         save_best_effort: true,
//!     },
//!     workers: None,
//!     scan: ScanOptions::default(),
//! };
//! let handle = holy_compress::start(&request)?;
//! for event in handle.events() {
//!     output::print_batch_event(&event);
//! }
//! let summary = handle.wait();
//! println!("{} of {} saved", summary.saved(), summary.total_images);
//! # Ok::<(), holy_compress::BatchError>(())
//! ```
//!
//! # Design Decisions
//!
//! ## Threads, Not Processes
//!
//! Each image is independent and CPU-bound, so work is spread over a dedicated
//! rayon thread pool. Workers receive owned inputs and send back owned
//! outcomes; the only shared state is the atomic cancel flag.
//!
//! ## Gated Dispatch
//!
//! The coordinator keeps at most `workers` images in flight and only hands out
//! the next one after an outcome returns. Cancellation is checked at every
//! hand-out, so it takes effect at the next image boundary and the set of
//! processed images is exactly the set that had already been handed out.
//!
//! ## Failures Stay Local
//!
//! Fatal problems (missing input, unusable output, invalid parameters) are
//! returned from [`start`] before any image is touched. Anything that goes
//! wrong with a single image, panics included, becomes that image's
//! [`TransmutationOutcome`] and the batch carries on.
//!
//! ## Silent Library
//!
//! The library never prints. All user-facing text lives in outcomes and the
//! summary; diagnostics go through `tracing` and only show up when the binary
//! installs a subscriber.

pub mod batch;
pub mod config;
pub mod imaging;
pub mod inventory;
pub mod naming;
pub mod output;
pub mod quality;
pub mod transmute;

pub use batch::{
    BatchCoordinator, BatchError, BatchEvent, BatchHandle, BatchRequest, BatchState,
    BatchSummary, CancelToken, start,
};
pub use imaging::Quality;
pub use inventory::{ImageRecord, Inventory, ScanOptions};
pub use quality::Strategy;
pub use transmute::{OutcomeStatus, TransmutationOutcome};

#[cfg(test)]
pub(crate) mod test_helpers;
