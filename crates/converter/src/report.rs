//! Post-hoc audit of a converted library.
//!
//! Pairs every original with its sibling MP4 and flags conversions that came
//! out much smaller than their source, which usually means the encoder stopped
//! early without reporting an error.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use humansize::{format_size, FormatSizeOptions, DECIMAL};
use log::{info, warn};
use serde::Serialize;
use crate::error::Result;
use crate::job::output_path_for;
use crate::scan::find_files_to_convert;

/// Output/original size ratio below which a conversion is suspect
pub const SUSPICION_THRESHOLD: f64 = 2.0 / 3.0;

/// Originals audited when no pattern is given
pub const DEFAULT_REPORT_PATTERN: &str = "*.wmv";

/// Byte count with automatic decimal unit scaling, e.g. `1.5 GB`
pub fn format_bytes(bytes: u64, precision: usize) -> String {
    let options = FormatSizeOptions::from(DECIMAL)
        .decimal_places(precision)
        .decimal_zeroes(precision);
    format_size(bytes, options)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousPair {
    pub original: PathBuf,
    pub output: PathBuf,
    pub original_bytes: u64,
    pub output_bytes: u64,
}

impl SuspiciousPair {
    pub fn ratio(&self) -> f64 {
        ratio(self.output_bytes, self.original_bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionReport {
    pub unconverted: Vec<PathBuf>,
    pub remaining_bytes: u64,
    pub converted_count: usize,
    pub original_bytes: u64,
    pub output_bytes: u64,
    pub suspicious: Vec<SuspiciousPair>,
}

impl ConversionReport {
    /// Combined output size as a fraction of the converted originals
    pub fn overall_ratio(&self) -> f64 {
        ratio(self.output_bytes, self.original_bytes)
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.output_bytes)
    }

    fn add_pair(&mut self, original: PathBuf, output: PathBuf, original_bytes: u64, output_bytes: u64) {
        self.converted_count += 1;
        self.original_bytes += original_bytes;
        self.output_bytes += output_bytes;

        if original_bytes > 0 && ratio(output_bytes, original_bytes) < SUSPICION_THRESHOLD {
            self.suspicious.push(SuspiciousPair {
                original,
                output,
                original_bytes,
                output_bytes,
            });
        }
    }

    /// Text report. `deleted` notes that the suspicious outputs are already gone.
    pub fn render(&self, deleted: bool) -> String {
        let mut out = String::new();

        if !self.unconverted.is_empty() {
            let _ = writeln!(out, "{} files were not converted.", self.unconverted.len());
            for path in &self.unconverted {
                let _ = writeln!(out, "  - {}", path.display());
            }
        }

        if !self.unconverted.is_empty() && !self.suspicious.is_empty() {
            out.push('\n');
        }

        if !self.suspicious.is_empty() {
            let _ = writeln!(
                out,
                "{} files were suspiciously small, and may have been converted incorrectly or incompletely.",
                self.suspicious.len()
            );
            if deleted {
                let _ = writeln!(out, "All of the MP4 files for the below originals have been deleted.");
            }

            let mut sorted: Vec<&SuspiciousPair> = self.suspicious.iter().collect();
            sorted.sort_by_key(|pair| pair.original.to_string_lossy().to_lowercase());
            for pair in sorted {
                let _ = writeln!(
                    out,
                    "  - {} ({}/{}, {})",
                    pair.original.display(),
                    format_bytes(pair.output_bytes, 1),
                    format_bytes(pair.original_bytes, 1),
                    percent(pair.ratio())
                );
            }
        }

        if !self.unconverted.is_empty() || !self.suspicious.is_empty() {
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "Converted {} files from originals ({}) to MP4 ({}).",
            self.converted_count,
            format_bytes(self.original_bytes, 0),
            format_bytes(self.output_bytes, 0)
        );
        let _ = writeln!(
            out,
            "Using {} of original size, saving {}.",
            percent(self.overall_ratio()),
            format_bytes(self.bytes_saved(), 0)
        );
        let _ = writeln!(
            out,
            "There are {} files ({}) remaining to convert.",
            self.unconverted.len(),
            format_bytes(self.remaining_bytes, 1)
        );

        out
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Walk `root` for originals matching `patterns` and pair each with its output
pub fn build_report(root: &Path, patterns: &[String]) -> Result<ConversionReport> {
    info!("Scanning for {} files in {}", patterns.join(", "), root.display());

    let mut report = ConversionReport::default();
    for original in find_files_to_convert(root, patterns)? {
        let output = output_path_for(&original);
        let original_bytes = file_len(&original);

        if output.is_file() {
            let output_bytes = file_len(&output);
            report.add_pair(original, output, original_bytes, output_bytes);
        } else {
            report.remaining_bytes += original_bytes;
            report.unconverted.push(original);
        }
    }

    Ok(report)
}

/// Delete the output of every suspicious pair. Originals are never touched.
pub fn delete_suspicious(report: &ConversionReport) -> Vec<PathBuf> {
    let mut deleted = Vec::new();
    for pair in &report.suspicious {
        match fs::remove_file(&pair.output) {
            Ok(()) => {
                info!("Deleted {}", pair.output.display());
                deleted.push(pair.output.clone());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", pair.output.display(), e),
        }
    }
    deleted
}
