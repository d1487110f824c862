use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::config::ConvertConfig;
use crate::encoder::{Encoder, EncoderInvocation};
use crate::error::{ConvertError, Result};
use crate::ffprobe::{self, FFProbeData};

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> anyhow::Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Drop distro suffixes such as "-3ubuntu5"
        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();

        let major = parts
            .first()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", version_part))?;
        let minor = match parts.get(1) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse minor version from: {}", p))?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse patch version from: {}", p))?,
            None => 0,
        };

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Runs the real ffmpeg/ffprobe binaries as child processes
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
        }
    }

    /// Run `ffmpeg -version` to make sure the binary is there before dispatching anything
    pub async fn detect_version(&self) -> anyhow::Result<FFmpegVersion> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        FFmpegVersion::parse(first_line)
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn analyze(&self, input: &Path) -> Result<FFProbeData> {
        ffprobe::run_ffprobe(&self.ffprobe_bin, input).await
    }

    async fn render(&self, invocation: &EncoderInvocation, cancel: &CancellationToken) -> Result<()> {
        let args = invocation.to_args();
        let render_error = |message: String, diagnostics: Option<String>| ConvertError::Render {
            path: invocation.input.clone(),
            message,
            diagnostics,
        };

        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        // kill_on_drop: an aborted worker must not leave its encoder running
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                render_error(
                    format!("Failed to spawn FFmpeg process at {}: {}", self.ffmpeg_bin.display(), e),
                    None,
                )
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stdout) = stdout {
                let mut line_stream = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    lines.push(line);
                }
            }
            lines.join("\n")
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                let mut line_stream = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    lines.push(line);
                }
            }
            lines.join("\n")
        });

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| render_error(format!("Failed to wait for FFmpeg process: {}", e), None))?,
            _ = cancel.cancelled() => {
                // kill() also reaps, so nothing writes the output after this returns
                if let Err(e) = child.kill().await {
                    debug!("FFmpeg already gone: {}", e);
                }
                return Err(ConvertError::Interrupted);
            }
        };

        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        // No exit code means the child was killed by a signal
        let Some(exit_code) = status.code() else {
            return Err(ConvertError::Interrupted);
        };

        let diagnostics = if !stderr.trim().is_empty() {
            Some(stderr)
        } else if !stdout.trim().is_empty() {
            Some(stdout)
        } else {
            None
        };

        Err(render_error(
            format!("FFmpeg exited with code {}", exit_code),
            diagnostics,
        ))
    }
}
