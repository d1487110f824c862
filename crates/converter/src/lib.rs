pub mod config;
pub mod error;
pub mod scan;
pub mod job;
pub mod classifier;
pub mod encoder;
pub mod ffprobe;
pub mod ffmpeg;
pub mod process;
pub mod lifecycle;
pub mod executor;
pub mod dispatcher;
pub mod report;

pub use config::ConvertConfig;
pub use error::{ConvertError, Result};
pub use job::{Action, ExecutionOutcome, JobDescriptor};
pub use classifier::JobPlan;
pub use encoder::{Encoder, EncoderInvocation, Setting};
pub use ffmpeg::FfmpegEncoder;
pub use lifecycle::{LifecycleGuard, ShutdownReport, ShutdownTrigger};
pub use executor::Executor;
pub use dispatcher::RunSummary;
pub use report::ConversionReport;
