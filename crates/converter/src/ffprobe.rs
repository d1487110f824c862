use std::path::Path;
use serde::Deserialize;
use tokio::process::Command;
use log::debug;
use crate::error::{ConvertError, Result};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: String,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
}

impl FFProbeData {
    pub fn has_video(&self) -> bool {
        self.streams.iter().any(|s| s.codec_type.as_deref() == Some("video"))
    }
}

/// Parse ffprobe JSON and make sure there is a video stream to convert
pub fn parse_ffprobe_output(file_path: &Path, json: &str) -> Result<FFProbeData> {
    let data: FFProbeData = serde_json::from_str(json).map_err(|e| ConvertError::Analysis {
        path: file_path.to_path_buf(),
        reason: format!("Failed to parse ffprobe JSON: {}", e),
    })?;

    if !data.has_video() {
        return Err(ConvertError::Analysis {
            path: file_path.to_path_buf(),
            reason: format!("No video stream found (container: {})", data.format.format_name),
        });
    }

    Ok(data)
}

/// Run ffprobe on `file_path` and parse the JSON output
pub async fn run_ffprobe(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeData> {
    let analysis_error = |reason: String| ConvertError::Analysis {
        path: file_path.to_path_buf(),
        reason,
    };

    if !file_path.exists() {
        return Err(analysis_error("File does not exist".to_string()));
    }

    debug!("Executing FFprobe for: {}", file_path.display());

    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(file_path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            analysis_error(format!(
                "Failed to execute FFprobe at {}: {}",
                ffprobe_bin.display(),
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(analysis_error(format!(
            "FFprobe failed (exit code {}): {}",
            exit_code,
            stderr.trim()
        )));
    }

    let json_str = String::from_utf8(output.stdout)
        .map_err(|_| analysis_error("FFprobe output is not valid UTF-8".to_string()))?;

    parse_ffprobe_output(file_path, &json_str)
}
