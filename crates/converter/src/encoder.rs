use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::error::Result;
use crate::ffprobe::FFProbeData;
use crate::job::{Action, JobDescriptor};

/// x264 speed preset used for every transcode
pub const TRANSCODE_PRESET: &str = "faster";
/// Pixel format used for every transcode
pub const TRANSCODE_PIXEL_FORMAT: &str = "yuvj420p";
/// AAC bitrate for transcoded audio
pub const TRANSCODE_AUDIO_BITRATE_KBPS: u32 = 128;
/// Packets buffered per stream while waiting for the first packet of the other streams.
/// Inputs with many packets of one stream before the other would otherwise fail with
/// "Too many packets buffered for output stream".
pub const MAX_MUXING_QUEUE_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Copy,
    Libx264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Copy,
    Aac,
}

/// One named output setting handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    VideoCodec(VideoCodec),
    AudioCodec(AudioCodec),
    ConstantRateFactor(u8),
    Preset(&'static str),
    PixelFormat(&'static str),
    AudioBitrateKbps(u32),
    MaxMuxingQueueSize(u32),
}

impl Setting {
    /// ffmpeg command-line arguments for this setting
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Setting::VideoCodec(codec) => {
                let name = match codec {
                    VideoCodec::Copy => "copy",
                    VideoCodec::Libx264 => "libx264",
                };
                vec!["-c:v".to_string(), name.to_string()]
            }
            Setting::AudioCodec(codec) => {
                let name = match codec {
                    AudioCodec::Copy => "copy",
                    AudioCodec::Aac => "aac",
                };
                vec!["-c:a".to_string(), name.to_string()]
            }
            Setting::ConstantRateFactor(crf) => vec!["-crf".to_string(), crf.to_string()],
            Setting::Preset(preset) => vec!["-preset".to_string(), preset.to_string()],
            Setting::PixelFormat(fmt) => vec!["-pix_fmt".to_string(), fmt.to_string()],
            Setting::AudioBitrateKbps(kbps) => vec!["-b:a".to_string(), format!("{}k", kbps)],
            Setting::MaxMuxingQueueSize(packets) => {
                vec!["-max_muxing_queue_size".to_string(), packets.to_string()]
            }
        }
    }
}

/// Output settings for an action
pub fn settings_for(action: Action, rate_factor: u8) -> Vec<Setting> {
    match action {
        Action::Remux => vec![
            Setting::VideoCodec(VideoCodec::Copy),
            Setting::AudioCodec(AudioCodec::Copy),
        ],
        Action::Transcode => vec![
            Setting::VideoCodec(VideoCodec::Libx264),
            Setting::ConstantRateFactor(rate_factor),
            Setting::Preset(TRANSCODE_PRESET),
            Setting::PixelFormat(TRANSCODE_PIXEL_FORMAT),
            Setting::AudioCodec(AudioCodec::Aac),
            Setting::AudioBitrateKbps(TRANSCODE_AUDIO_BITRATE_KBPS),
            Setting::MaxMuxingQueueSize(MAX_MUXING_QUEUE_SIZE),
        ],
    }
}

/// Everything one encoder process needs: input, output, container and settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub input: PathBuf,
    pub output: PathBuf,
    pub container: &'static str,
    pub overwrite: bool,
    pub settings: Vec<Setting>,
}

impl EncoderInvocation {
    pub fn for_job(job: &JobDescriptor, default_crf: u8) -> Self {
        let rate_factor = job.rate_factor().unwrap_or(default_crf);
        Self {
            input: job.input_path().to_path_buf(),
            output: job.output_path().to_path_buf(),
            container: "mp4",
            overwrite: job.overwrite_allowed(),
            settings: settings_for(job.action(), rate_factor),
        }
    }

    /// Full ffmpeg argument list, binary excluded
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            "error".to_string(),
            if self.overwrite { "-y" } else { "-n" }.to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
        ];
        for setting in &self.settings {
            args.extend(setting.to_args());
        }
        args.push("-f".to_string());
        args.push(self.container.to_string());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// The external encoder as seen by the executor
#[async_trait]
pub trait Encoder: Send + Sync + 'static {
    /// Check that `input` is a decodable source. Errors are `ConvertError::Analysis`.
    async fn analyze(&self, input: &Path) -> Result<FFProbeData>;

    /// Run one encoder process to completion. Errors are `ConvertError::Render`
    /// carrying the captured diagnostic stream, or `ConvertError::Interrupted`.
    ///
    /// Once `cancel` fires the process must be killed and reaped before
    /// returning `Interrupted`, so the caller can delete the output safely.
    async fn render(&self, invocation: &EncoderInvocation, cancel: &CancellationToken) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job(input: &str, output: &str, action: Action, rate_factor: Option<u8>) -> JobDescriptor {
        JobDescriptor::new(
            PathBuf::from(input),
            PathBuf::from(output),
            action,
            false,
            false,
            rate_factor,
        )
    }

    #[test]
    fn test_remux_copies_streams() {
        let invocation = EncoderInvocation::for_job(&job("clip.ts", "clip.mp4", Action::Remux, None), 23);
        let args = invocation.to_args();

        assert_eq!(
            args,
            vec![
                "-hide_banner", "-nostdin", "-v", "error", "-n",
                "-i", "clip.ts",
                "-c:v", "copy", "-c:a", "copy",
                "-f", "mp4", "clip.mp4",
            ]
        );
    }

    #[test]
    fn test_transcode_uses_fixed_parameter_table() {
        let invocation = EncoderInvocation::for_job(&job("movie.wmv", "movie.mp4", Action::Transcode, Some(20)), 23);
        let args = invocation.to_args().join(" ");

        assert!(args.contains("-c:v libx264"));
        assert!(args.contains("-crf 20"));
        assert!(args.contains("-preset faster"));
        assert!(args.contains("-pix_fmt yuvj420p"));
        assert!(args.contains("-c:a aac"));
        assert!(args.contains("-b:a 128k"));
        assert!(args.contains("-max_muxing_queue_size 1024"));
        assert!(args.ends_with("-f mp4 movie.mp4"));
    }

    #[test]
    fn test_overwrite_flag() {
        let overwriting = JobDescriptor::new(
            PathBuf::from("a.ts"),
            PathBuf::from("a.mp4"),
            Action::Remux,
            true,
            false,
            None,
        );
        let args = EncoderInvocation::for_job(&overwriting, 23).to_args();
        assert!(args.contains(&"-y".to_string()));
        assert!(!args.contains(&"-n".to_string()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The caller's rate factor wins; the default only fills in when none is given
        #[test]
        fn test_rate_factor_selection(
            given in proptest::option::of(0u8..=51),
            default_crf in 0u8..=51,
        ) {
            let invocation = EncoderInvocation::for_job(&job("m.wmv", "m.mp4", Action::Transcode, given), default_crf);
            let expected = given.unwrap_or(default_crf);
            prop_assert!(invocation.settings.contains(&Setting::ConstantRateFactor(expected)));
        }

        /// Remux never re-encodes, whatever rate factor was asked for
        #[test]
        fn test_remux_ignores_rate_factor(given in proptest::option::of(0u8..=51)) {
            let invocation = EncoderInvocation::for_job(&job("c.ts", "c.mp4", Action::Remux, given), 23);
            prop_assert!(invocation
                .settings
                .iter()
                .all(|s| !matches!(s, Setting::ConstantRateFactor(_))));
        }
    }
}
