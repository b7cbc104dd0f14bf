//! Input directory scanning and batch statistics.
//!
//! The first step of every run. Lists the images a batch will cover and reads
//! their byte sizes from filesystem metadata. Nothing is decoded here, so
//! scanning a folder of large images is cheap.
//!
//! ## Matching rules
//!
//! - Only regular files whose extension is in [`ScanOptions::extensions`].
//!   The defaults (`png`, `webp`, `bmp`, `tiff`, `gif`) leave out JPEG, which
//!   is already an efficient format.
//! - Extensions match case-insensitively unless `case_sensitive` is set.
//! - Only the directory itself is scanned unless `recursive` is set.
//! - Dot-prefixed (hidden) entries are skipped.
//!
//! Records are sorted by path, so two scans of the same folder give the same
//! order.
//!
//! ## Statistics
//!
//! [`Inventory`] exposes count, total, average, minimum and maximum size. The
//! average drives the relative-quality strategy and is `None` for an empty
//! inventory.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "webp", "bmp", "tiff", "gif"];

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Input directory not found: {0}")]
    NotFound(PathBuf),
    #[error("Input path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Cannot read input directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One source image and its size on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub original_size_bytes: u64,
}

impl ImageRecord {
    /// File name for display, falling back to the full path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Which files a scan picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub extensions: Vec<String>,
    pub recursive: bool,
    pub case_sensitive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            recursive: false,
            case_sensitive: false,
        }
    }
}

impl ScanOptions {
    fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
            return false;
        };
        self.extensions.iter().any(|wanted| {
            let wanted = wanted.trim_start_matches('.');
            if self.case_sensitive {
                ext == wanted
            } else {
                ext.eq_ignore_ascii_case(wanted)
            }
        })
    }
}

/// The images of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub root: PathBuf,
    pub records: Vec<ImageRecord>,
}

impl Inventory {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.original_size_bytes).sum()
    }

    /// Mean size in bytes; `None` when there are no records.
    pub fn average_size(&self) -> Option<f64> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.total_bytes() as f64 / self.records.len() as f64)
        }
    }

    pub fn min_size(&self) -> Option<u64> {
        self.records.iter().map(|r| r.original_size_bytes).min()
    }

    pub fn max_size(&self) -> Option<u64> {
        self.records.iter().map(|r| r.original_size_bytes).max()
    }
}

/// Scan `input_dir` for images matching `options`.
///
/// A directory with no matching files yields an empty inventory, not an error.
pub fn scan(input_dir: &Path, options: &ScanOptions) -> Result<Inventory, InventoryError> {
    let meta = fs::metadata(input_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InventoryError::NotFound(input_dir.to_path_buf()),
        _ => InventoryError::Unreadable {
            path: input_dir.to_path_buf(),
            source: e,
        },
    })?;
    if !meta.is_dir() {
        return Err(InventoryError::NotADirectory(input_dir.to_path_buf()));
    }

    let mut records = if options.recursive {
        collect_recursive(input_dir, options)?
    } else {
        collect_flat(input_dir, options)?
    };
    records.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
        dir = %input_dir.display(),
        images = records.len(),
        "inventory scanned"
    );
    Ok(Inventory {
        root: input_dir.to_path_buf(),
        records,
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

fn collect_flat(dir: &Path, options: &ScanOptions) -> Result<Vec<ImageRecord>, InventoryError> {
    let unreadable = |source| InventoryError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };
    let mut records = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if is_hidden(&path) || !options.matches(&path) {
            continue;
        }
        // Follows symlinks, so a linked image counts with its target's size.
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if meta.is_file() {
            records.push(ImageRecord {
                path,
                original_size_bytes: meta.len(),
            });
        }
    }
    Ok(records)
}

fn collect_recursive(
    dir: &Path,
    options: &ScanOptions,
) -> Result<Vec<ImageRecord>, InventoryError> {
    let mut records = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
    for entry in walker {
        let entry = entry.map_err(|e| InventoryError::Unreadable {
            path: e.path().unwrap_or(dir).to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
        })?;
        if !entry.file_type().is_file() || !options.matches(entry.path()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        records.push(ImageRecord {
            path: entry.into_path(),
            original_size_bytes: meta.len(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    fn names(inventory: &Inventory) -> Vec<String> {
        inventory.records.iter().map(|r| r.file_name()).collect()
    }

    #[test]
    fn scan_finds_supported_extensions_only() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.png", 10);
        touch(tmp.path(), "b.webp", 20);
        touch(tmp.path(), "c.jpg", 30);
        touch(tmp.path(), "notes.txt", 5);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(names(&inv), vec!["a.png", "b.webp"]);
    }

    #[test]
    fn scan_reads_sizes_without_decoding() {
        let tmp = TempDir::new().unwrap();
        // Not valid images; scanning never decodes.
        touch(tmp.path(), "one.png", 1000);
        touch(tmp.path(), "two.bmp", 3000);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(inv.count(), 2);
        assert_eq!(inv.total_bytes(), 4000);
        assert_eq!(inv.average_size(), Some(2000.0));
        assert_eq!(inv.min_size(), Some(1000));
        assert_eq!(inv.max_size(), Some(3000));
    }

    #[test]
    fn scan_is_case_insensitive_by_default() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "LOUD.PNG", 1);
        touch(tmp.path(), "mixed.Gif", 1);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(inv.count(), 2);
    }

    #[test]
    fn scan_case_sensitive_option() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "LOUD.PNG", 1);
        touch(tmp.path(), "quiet.png", 1);

        let options = ScanOptions {
            case_sensitive: true,
            ..Default::default()
        };
        let inv = scan(tmp.path(), &options).unwrap();
        assert_eq!(names(&inv), vec!["quiet.png"]);
    }

    #[test]
    fn scan_is_not_recursive_by_default() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "top.png", 1);
        touch(tmp.path(), "nested/deep.png", 1);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(names(&inv), vec!["top.png"]);
    }

    #[test]
    fn scan_recursive_option_descends() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "top.png", 1);
        touch(tmp.path(), "nested/deep.png", 1);
        touch(tmp.path(), ".hidden/secret.png", 1);

        let options = ScanOptions {
            recursive: true,
            ..Default::default()
        };
        let inv = scan(tmp.path(), &options).unwrap();
        assert_eq!(names(&inv), vec!["deep.png", "top.png"]);
    }

    #[test]
    fn scan_skips_hidden_files_and_directories_named_like_images() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".thumb.png", 1);
        fs::create_dir(tmp.path().join("folder.png")).unwrap();
        touch(tmp.path(), "real.png", 1);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(names(&inv), vec!["real.png"]);
    }

    #[test]
    fn custom_extensions_accept_leading_dot() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "photo.jpg", 1);
        touch(tmp.path(), "pic.png", 1);

        let options = ScanOptions {
            extensions: vec![".jpg".to_string()],
            ..Default::default()
        };
        let inv = scan(tmp.path(), &options).unwrap();
        assert_eq!(names(&inv), vec!["photo.jpg"]);
    }

    #[test]
    fn records_are_sorted_by_path() {
        let tmp = TempDir::new().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            touch(tmp.path(), name, 1);
        }
        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(names(&inv), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn empty_directory_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "readme.txt", 1);

        let inv = scan(tmp.path(), &ScanOptions::default()).unwrap();
        assert!(inv.is_empty());
        assert_eq!(inv.total_bytes(), 0);
        assert_eq!(inv.average_size(), None);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let result = scan(&tmp.path().join("nope"), &ScanOptions::default());
        assert!(matches!(result, Err(InventoryError::NotFound(_))));
    }

    #[test]
    fn file_instead_of_directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "a.png", 1);
        let result = scan(&file, &ScanOptions::default());
        assert!(matches!(result, Err(InventoryError::NotADirectory(_))));
    }
}
