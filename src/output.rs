//! CLI output formatting for scans, progress and summaries.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Inventory of photos/
//!     Images:   3
//!     Total:    3,000.0 KB
//!     Average:  1,000.0 KB
//!     Range:    500.0 KB to 1,500.0 KB
//! 001 beach.png (500.0 KB)
//! 002 city.png (1,000.0 KB)
//! 003 forest.png (1,500.0 KB)
//! ```
//!
//! ## Compress
//!
//! One entry per finished image, in completion order:
//!
//! ```text
//! [001/003] city.png: 1,000.0 KB → 187.2 KB (Quality: 80, Ratio: 18.7%)
//!     Saved: city_187kb_q80_id4821.jpeg
//! [002/003] forest.png: 1,500.0 KB → 199.0 KB (Quality: 62, Ratio: 13.3%)
//!     Target not met. Saved best effort: 199.0KB @ Q62
//! [003/003] beach.png: FAILED
//!     Failed to decode beach.png: ...
//! ```
//!
//! followed by the summary block from [`format_summary`].
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::batch::{BatchEvent, BatchState, BatchSummary};
use crate::inventory::Inventory;
use crate::transmute::{OutcomeStatus, TransmutationOutcome};

const RULE_WIDTH: usize = 50;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Insert `,` between thousands in the integer part of a formatted number.
fn group_thousands(formatted: &str) -> String {
    let (int_part, rest) = match formatted.find('.') {
        Some(dot) => formatted.split_at(dot),
        None => (formatted, ""),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("", int_part),
    };
    let mut grouped = String::with_capacity(formatted.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{rest}")
}

/// Bytes as kilobytes (1 KB = 1024 bytes) with `decimals` places.
fn format_kb(bytes: u64, decimals: usize) -> String {
    let kb = bytes as f64 / 1024.0;
    format!("{} KB", group_thousands(&format!("{kb:.decimals$}")))
}

// ============================================================================
// Scan
// ============================================================================

/// Format inventory statistics and the image list.
pub fn format_inventory(inventory: &Inventory) -> Vec<String> {
    let mut lines = vec![format!("Inventory of {}", inventory.root.display())];
    let i = indent(1);
    lines.push(format!("{i}Images:   {}", inventory.count()));
    if inventory.is_empty() {
        lines.push(format!("{i}No matching images found"));
        return lines;
    }

    lines.push(format!("{i}Total:    {}", format_kb(inventory.total_bytes(), 1)));
    if let Some(avg) = inventory.average_size() {
        lines.push(format!("{i}Average:  {}", format_kb(avg.round() as u64, 1)));
    }
    if let (Some(min), Some(max)) = (inventory.min_size(), inventory.max_size()) {
        lines.push(format!(
            "{i}Range:    {} to {}",
            format_kb(min, 1),
            format_kb(max, 1)
        ));
    }
    for (pos, record) in inventory.records.iter().enumerate() {
        lines.push(format!(
            "{} {} ({})",
            format_index(pos + 1),
            record.file_name(),
            format_kb(record.original_size_bytes, 1)
        ));
    }
    lines
}

pub fn print_inventory(inventory: &Inventory) {
    for line in format_inventory(inventory) {
        println!("{}", line);
    }
}

// ============================================================================
// Compress progress
// ============================================================================

/// Format one batch event as display lines.
pub fn format_batch_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Started { total, workers } => {
            let plural = if *total == 1 { "image" } else { "images" };
            vec![format!(
                "Compressing {total} {plural} with {workers} worker{}",
                if *workers == 1 { "" } else { "s" }
            )]
        }
        BatchEvent::Progress {
            completed,
            total,
            outcome,
        } => format_outcome_lines(*completed, *total, outcome),
    }
}

fn progress_prefix(completed: usize, total: usize) -> String {
    let width = total.to_string().len().max(3);
    format!("[{completed:0>width$}/{total:0>width$}]")
}

/// Outcome header line plus indented detail.
pub fn format_outcome_lines(
    completed: usize,
    total: usize,
    outcome: &TransmutationOutcome,
) -> Vec<String> {
    let prefix = progress_prefix(completed, total);
    let name = outcome.file_name();
    let i = indent(1);

    match (outcome.status, outcome.result_size_bytes, outcome.quality_used) {
        (status, Some(size), Some(quality)) if status.is_saved() => {
            let ratio = if outcome.original_size_bytes > 0 {
                size as f64 / outcome.original_size_bytes as f64 * 100.0
            } else {
                0.0
            };
            let mut lines = vec![format!(
                "{prefix} {name}: {} \u{2192} {} (Quality: {quality}, Ratio: {ratio:.1}%)",
                format_kb(outcome.original_size_bytes, 1),
                format_kb(size, 1),
            )];
            if status == OutcomeStatus::PartialSuccess {
                lines.push(format!("{i}{}", outcome.message));
            }
            if let Some(saved_as) = outcome.output_path.as_ref().and_then(|p| p.file_name()) {
                lines.push(format!("{i}Saved: {}", saved_as.to_string_lossy()));
            }
            lines
        }
        (OutcomeStatus::Skipped, ..) => vec![format!("{prefix} {name}: skipped")],
        _ => vec![
            format!("{prefix} {name}: FAILED"),
            format!("{i}{}", outcome.message),
        ],
    }
}

pub fn print_batch_event(event: &BatchEvent) {
    for line in format_batch_event(event) {
        println!("{}", line);
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Format the end-of-batch report.
pub fn format_summary(summary: &BatchSummary) -> Vec<String> {
    let rule = "=".repeat(RULE_WIDTH);
    let i = indent(1);
    let title = match summary.state {
        BatchState::Cancelled => "COMPRESSION JOB CANCELLED",
        _ => "COMPRESSION JOB COMPLETE",
    };

    let mut lines = vec![rule.clone(), title.to_string(), rule.clone(), String::new()];

    lines.push("Overall".to_string());
    lines.push(format!(
        "{i}Processed:        {} / {}",
        summary.processed(),
        summary.total_images
    ));
    lines.push(format!("{i}Full success:     {}", summary.succeeded));
    if summary.partial > 0 {
        lines.push(format!("{i}Partial success:  {}", summary.partial));
    }
    lines.push(format!("{i}Failed:           {}", summary.failed));
    if summary.cancelled_count() > 0 {
        lines.push(format!(
            "{i}Not processed:    {} (cancelled)",
            summary.cancelled_count()
        ));
    }
    lines.push(format!("{i}Workers:          {}", summary.workers));
    lines.push(format!(
        "{i}Time taken:       {:.2} s",
        summary.elapsed.as_secs_f64()
    ));
    if let Some(rate) = summary.images_per_second() {
        lines.push(format!("{i}Speed:            {rate:.2} images/sec"));
    }

    if summary.saved() > 0 {
        lines.push(String::new());
        lines.push("Saved images".to_string());
        lines.push(format!(
            "{i}Original size:    {}",
            format_kb(summary.original_bytes, 2)
        ));
        lines.push(format!(
            "{i}Final size:       {}",
            format_kb(summary.result_bytes, 2)
        ));
        if let Some(reduction) = summary.reduction_percent() {
            lines.push(format!("{i}Size reduction:   {reduction:.2}%"));
        }
    }

    if let (Some(mean), Some(min), Some(max)) =
        (summary.quality_mean, summary.quality_min, summary.quality_max)
    {
        lines.push(String::new());
        lines.push("Quality".to_string());
        lines.push(format!("{i}Average:          {mean:.1}"));
        lines.push(format!("{i}Range:            {min} to {max}"));
    }

    if !summary.failures.is_empty() {
        lines.push(String::new());
        lines.push("Failed files (not saved)".to_string());
        for (name, message) in &summary.failures {
            lines.push(format!("{i}- {name}: {message}"));
        }
    }

    lines.push(String::new());
    lines.push(rule);
    lines
}

pub fn print_summary(summary: &BatchSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}
