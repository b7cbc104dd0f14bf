//! Per-image work: decode, pick a quality, encode, write.
//!
//! [`transmute`] is what a worker runs for one [`ImageRecord`]. It never
//! returns an error. Every failure (undecodable source, failed encode, full
//! disk, unreachable size target) is folded into the returned
//! [`TransmutationOutcome`], so one bad image cannot stop the batch.
//!
//! ## Outcomes
//!
//! | Status | File written | When |
//! |---|---|---|
//! | `Success` | yes | fixed quality encoded, or the size target was met |
//! | `PartialSuccess` | yes | target not met; smallest encode saved as best effort |
//! | `Failed` | no | decode/encode/write error, or target not met without best effort |
//! | `Skipped` | no | batch cancelled before the task started |
//!
//! The source file is only ever opened for reading.

use crate::imaging::{BackendError, EncodeParams, ImageBackend, Quality};
use crate::inventory::ImageRecord;
use crate::naming::{output_file_name, random_token};
use crate::quality::{QualityPlan, search_highest_fitting};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fresh tokens drawn before giving up on finding an unused output name.
const MAX_NAME_ATTEMPTS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Failed,
    Skipped,
}

impl OutcomeStatus {
    /// Whether an output file exists for this status.
    pub fn is_saved(self) -> bool {
        matches!(self, OutcomeStatus::Success | OutcomeStatus::PartialSuccess)
    }
}

/// Size and quality of one trial encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodeAttempt {
    pub quality: Quality,
    pub size_bytes: u64,
}

/// Result of processing one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransmutationOutcome {
    pub source_path: PathBuf,
    pub original_size_bytes: u64,
    pub result_size_bytes: Option<u64>,
    pub quality_used: Option<Quality>,
    pub status: OutcomeStatus,
    pub message: String,
    pub output_path: Option<PathBuf>,
    pub encode_attempts: u32,
    /// Smallest encode seen when a size target was not met.
    pub smallest_attempt: Option<EncodeAttempt>,
}

impl TransmutationOutcome {
    fn unsaved(record: &ImageRecord, status: OutcomeStatus, message: String) -> Self {
        Self {
            source_path: record.path.clone(),
            original_size_bytes: record.original_size_bytes,
            result_size_bytes: None,
            quality_used: None,
            status,
            message,
            output_path: None,
            encode_attempts: 0,
            smallest_attempt: None,
        }
    }

    pub fn failed(record: &ImageRecord, message: impl Into<String>) -> Self {
        Self::unsaved(record, OutcomeStatus::Failed, message.into())
    }

    pub fn skipped(record: &ImageRecord) -> Self {
        Self::unsaved(
            record,
            OutcomeStatus::Skipped,
            "Skipped: batch cancelled".to_string(),
        )
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }

    /// Size saved relative to the original, in percent. `None` if nothing was
    /// written or the original was empty.
    pub fn reduction_percent(&self) -> Option<f64> {
        let result = self.result_size_bytes?;
        if self.original_size_bytes == 0 {
            return None;
        }
        Some((1.0 - result as f64 / self.original_size_bytes as f64) * 100.0)
    }
}

/// Why an image ends without a file.
enum Unsaved {
    Backend(BackendError),
    TargetUnmet(String),
}

impl From<BackendError> for Unsaved {
    fn from(e: BackendError) -> Self {
        Unsaved::Backend(e)
    }
}

/// Encoded bytes chosen for saving.
struct Chosen {
    bytes: Vec<u8>,
    quality: Quality,
    status: OutcomeStatus,
    message: String,
}

/// Process one image according to `plan`, writing into `output_dir`.
pub fn transmute(
    backend: &dyn ImageBackend,
    record: &ImageRecord,
    plan: &QualityPlan,
    output_dir: &Path,
) -> TransmutationOutcome {
    let image = match backend.decode(&record.path) {
        Ok(image) => image,
        Err(e) => {
            warn!(source = %record.path.display(), error = %e, "decode failed");
            return TransmutationOutcome::failed(record, e.to_string());
        }
    };

    let mut attempts = 0u32;
    let mut smallest_attempt = None;

    let chosen = match *plan {
        QualityPlan::Fixed(quality) => {
            attempts = 1;
            backend
                .encode(&image, &EncodeParams::at(quality))
                .map(|bytes| Chosen {
                    bytes,
                    quality,
                    status: OutcomeStatus::Success,
                    message: "Success".to_string(),
                })
                .map_err(Unsaved::from)
        }
        QualityPlan::Search {
            target_bytes,
            min,
            max,
            save_best_effort,
        } => {
            // Highest fitting encode, and the smallest non-fitting one.
            let mut best: Option<(Quality, Vec<u8>)> = None;
            let mut smallest: Option<(Quality, Vec<u8>)> = None;

            let searched = search_highest_fitting(min, max, target_bytes, |quality| {
                let bytes = backend.encode(&image, &EncodeParams::at(quality))?;
                let size = bytes.len() as u64;
                debug!(source = %record.path.display(), quality = quality.value(), size, "probe");
                if size <= target_bytes {
                    if best.as_ref().is_none_or(|(q, _)| quality > *q) {
                        best = Some((quality, bytes));
                    }
                } else if smallest.as_ref().is_none_or(|(_, b)| bytes.len() < b.len()) {
                    smallest = Some((quality, bytes));
                }
                Ok::<u64, BackendError>(size)
            });

            searched.map_err(Unsaved::from).and_then(|result| {
                attempts = result.probes;
                if let (Some(_), Some((quality, bytes))) = (result.best_fit, best) {
                    return Ok(Chosen {
                        bytes,
                        quality,
                        status: OutcomeStatus::Success,
                        message: "Success".to_string(),
                    });
                }

                smallest_attempt = result.smallest.map(|p| EncodeAttempt {
                    quality: p.quality,
                    size_bytes: p.size_bytes,
                });
                let (quality, bytes) = smallest.ok_or_else(|| {
                    BackendError::Encode("size search produced no encodes".to_string())
                })?;
                let size_kb = bytes.len() as f64 / 1024.0;

                if save_best_effort {
                    Ok(Chosen {
                        message: format!(
                            "Target not met. Saved best effort: {size_kb:.1}KB @ Q{quality}"
                        ),
                        bytes,
                        quality,
                        status: OutcomeStatus::PartialSuccess,
                    })
                } else {
                    Err(Unsaved::TargetUnmet(format!(
                        "Could not meet target size of {}KB. Smallest achievable size was {size_kb:.1}KB at quality {quality}",
                        target_bytes / 1024
                    )))
                }
            })
        }
    };

    let chosen = match chosen {
        Ok(chosen) => chosen,
        Err(unsaved) => {
            let message = match unsaved {
                Unsaved::Backend(e) => e.to_string(),
                Unsaved::TargetUnmet(msg) => msg,
            };
            warn!(source = %record.path.display(), reason = %message, "image not saved");
            return TransmutationOutcome {
                encode_attempts: attempts,
                smallest_attempt,
                ..TransmutationOutcome::failed(record, message)
            };
        }
    };

    let stem = record
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    match write_unique(output_dir, &stem, &chosen.bytes, chosen.quality, random_token) {
        Ok(output_path) => {
            debug!(
                source = %record.path.display(),
                output = %output_path.display(),
                quality = chosen.quality.value(),
                "saved"
            );
            TransmutationOutcome {
                source_path: record.path.clone(),
                original_size_bytes: record.original_size_bytes,
                result_size_bytes: Some(chosen.bytes.len() as u64),
                quality_used: Some(chosen.quality),
                status: chosen.status,
                message: chosen.message,
                output_path: Some(output_path),
                encode_attempts: attempts,
                smallest_attempt,
            }
        }
        Err(e) => {
            warn!(source = %record.path.display(), error = %e, "write failed");
            TransmutationOutcome {
                encode_attempts: attempts,
                smallest_attempt,
                ..TransmutationOutcome::failed(record, format!("Failed to write output: {e}"))
            }
        }
    }
}

/// Write `bytes` under a name that does not exist yet, drawing tokens from
/// `next_token` until one is free.
fn write_unique(
    dir: &Path,
    stem: &str,
    bytes: &[u8],
    quality: Quality,
    mut next_token: impl FnMut() -> u16,
) -> io::Result<PathBuf> {
    let size = bytes.len() as u64;
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(output_file_name(stem, size, quality, next_token()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                fill_or_remove(file, &path, bytes)?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free output name for {stem} after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

/// Write all of `bytes` to the freshly created file at `path`. If the write
/// stops part way (full disk, file size limit) the partial file is removed.
fn fill_or_remove(mut out: impl Write, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) else {
        return Ok(());
    };
    drop(out);
    if let Err(cleanup) = fs::remove_file(path) {
        warn!(output = %path.display(), error = %cleanup, "could not remove partial output");
    }
    Err(e)
}
