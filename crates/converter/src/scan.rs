use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};
use crate::error::{ConvertError, Result};

/// A file-name glob of the form `*.ext` or `*.ext1.ext2`, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPattern {
    suffix: String,
}

impl ExtensionPattern {
    /// Parse `*.ts` style globs; a bare `ts` or `.ts` is accepted too
    pub fn parse(glob: &str) -> Self {
        let trimmed = glob.trim().trim_start_matches('*').trim_start_matches('.');
        Self {
            suffix: format!(".{}", trimmed.to_lowercase()),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| {
                let name = name.to_lowercase();
                // "x.ts" matches, a file literally named ".ts" does not
                name.len() > self.suffix.len() && name.ends_with(&self.suffix)
            })
            .unwrap_or(false)
    }
}

/// Recursively find files under `root` matching any of `patterns`.
///
/// The returned iterator is lazy and yields absolute paths in the order the
/// filesystem enumerates them. Nothing downstream depends on that order.
pub fn find_files_to_convert(
    root: &Path,
    patterns: &[String],
) -> Result<impl Iterator<Item = PathBuf>> {
    if !root.is_dir() {
        return Err(ConvertError::DirectoryNotFound(root.to_path_buf()));
    }

    let root = root.canonicalize()?;
    let patterns: Vec<ExtensionPattern> = patterns.iter().map(|p| ExtensionPattern::parse(p)).collect();

    info!("Scanning directory: {}", root.display());

    let walker = WalkDir::new(&root).follow_links(false);
    let files = walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| patterns.iter().any(|p| p.matches(entry.path())))
        .map(|entry| {
            debug!("Found media file: {}", entry.path().display());
            entry.into_path()
        });

    Ok(files)
}
