use std::fmt;
use std::path::{Path, PathBuf};

/// Extension every conversion produces
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Containers that only need their streams copied into MP4
const REMUX_EXTENSIONS: &[&str] = &["ts"];

/// Suffixes marking an incomplete download; the content underneath is already a video
const PARTIAL_MARKER_EXTENSIONS: &[&str] = &["part"];

/// How an input is turned into an MP4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stream copy into the new container, no re-encode
    Remux,
    /// Full re-encode with the fixed x264/AAC parameter set
    Transcode,
}

impl Action {
    /// Pick the action from the input's extension alone
    pub fn for_input(input: &Path) -> Self {
        match lowercase_extension(input) {
            Some(ext)
                if REMUX_EXTENSIONS.contains(&ext.as_str())
                    || PARTIAL_MARKER_EXTENSIONS.contains(&ext.as_str()) =>
            {
                Action::Remux
            }
            _ => Action::Transcode,
        }
    }

    /// Word used in progress lines
    pub fn present_participle(&self) -> &'static str {
        match self {
            Action::Remux => "Remuxing",
            Action::Transcode => "Transcoding",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Remux => write!(f, "remux"),
            Action::Transcode => write!(f, "transcode"),
        }
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Whether the input ends in a partial-download marker such as `.part`
pub fn has_partial_marker(input: &Path) -> bool {
    lowercase_extension(input)
        .map(|ext| PARTIAL_MARKER_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Sibling output path for an input.
///
/// `clip.ts` becomes `clip.mp4`. A partial marker is stripped without any
/// further substitution, so `download.mp4.part` becomes `download.mp4`.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut output = input.to_path_buf();
    if has_partial_marker(input) {
        output.set_extension("");
    } else {
        output.set_extension(OUTPUT_EXTENSION);
    }
    output
}

/// One unit of conversion work. Built by the classifier, consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    input_path: PathBuf,
    output_path: PathBuf,
    action: Action,
    overwrite_allowed: bool,
    remove_input_on_success: bool,
    rate_factor: Option<u8>,
}

impl JobDescriptor {
    pub fn new(
        input_path: PathBuf,
        output_path: PathBuf,
        action: Action,
        overwrite_allowed: bool,
        remove_input_on_success: bool,
        rate_factor: Option<u8>,
    ) -> Self {
        Self {
            input_path,
            output_path,
            action,
            overwrite_allowed,
            remove_input_on_success,
            rate_factor,
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.overwrite_allowed
    }

    pub fn remove_input_on_success(&self) -> bool {
        self.remove_input_on_success
    }

    /// Caller-supplied quality factor; transcodes fall back to the configured default
    pub fn rate_factor(&self) -> Option<u8> {
        self.rate_factor
    }
}

/// Result of executing one job. Reported right away, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    SkippedExisting,
    AnalysisFailed(String),
    RenderFailed {
        reason: String,
        diagnostics: Option<String>,
    },
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::AnalysisFailed(_) | ExecutionOutcome::RenderFailed { .. })
    }
}
