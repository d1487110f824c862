use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, info, warn};
use crate::classifier::OutputState;
use crate::encoder::{Encoder, EncoderInvocation};
use crate::error::ConvertError;
use crate::job::{ExecutionOutcome, JobDescriptor};
use crate::lifecycle::LifecycleGuard;
use crate::report::format_bytes;

/// Runs one job at a time through the encoder and turns every failure into an outcome
pub struct Executor<E> {
    encoder: E,
    guard: Arc<LifecycleGuard>,
    default_crf: u8,
    /// Outputs produced earlier in this run; never overwritten by a later job
    written: Mutex<HashSet<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<E: Encoder> Executor<E> {
    pub fn new(encoder: E, guard: Arc<LifecycleGuard>, default_crf: u8) -> Self {
        Self {
            encoder,
            guard,
            default_crf,
            written: Mutex::new(HashSet::new()),
        }
    }

    pub fn guard(&self) -> &LifecycleGuard {
        &self.guard
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Convert one input. Never fails: errors become `ExecutionOutcome`s.
    pub async fn execute(&self, job: JobDescriptor) -> ExecutionOutcome {
        let outcome = self.run(&job).await;
        report_outcome(&job, &outcome);
        outcome
    }

    async fn run(&self, job: &JobDescriptor) -> ExecutionOutcome {
        let input = job.input_path();
        let output = job.output_path();

        if let Err(err) = self.encoder.analyze(input).await {
            let reason = match err {
                ConvertError::Analysis { reason, .. } => reason,
                other => other.to_string(),
            };
            return ExecutionOutcome::AnalysisFailed(reason);
        }

        // Two inputs can share an output (clip.ts and clip.mp4.part); the first claim wins
        let Some(active) = self.guard.claim_output(output) else {
            debug!("{} is being written by another job", output.display());
            return ExecutionOutcome::SkippedExisting;
        };

        // Claimed after the guard drained its set: nothing would clean this up
        if self.guard.is_shutting_down() {
            active.release();
            return ExecutionOutcome::RenderFailed {
                reason: ConvertError::Interrupted.to_string(),
                diagnostics: None,
            };
        }

        let written_this_run = lock(&self.written).contains(output);
        if written_this_run
            || (!job.overwrite_allowed() && OutputState::of(output) == OutputState::Present)
        {
            active.release();
            return ExecutionOutcome::SkippedExisting;
        }

        let invocation = EncoderInvocation::for_job(job, self.default_crf);
        let input_size = fs::metadata(input).map(|m| m.len()).unwrap_or(0);
        info!(
            "{} {} ({})",
            job.action().present_participle(),
            input.display(),
            format_bytes(input_size, 1)
        );

        let rendered = self.encoder.render(&invocation, &self.guard.cancellation()).await;

        match rendered {
            Ok(()) => {
                lock(&self.written).insert(output.to_path_buf());
                active.release();
                if job.remove_input_on_success() {
                    remove_input(input, output);
                }
                ExecutionOutcome::Success
            }
            Err(err) => {
                // still claimed, so no other job can be writing this path
                remove_partial_output(output);
                active.release();
                match err {
                    ConvertError::Render { message, diagnostics, .. } => ExecutionOutcome::RenderFailed {
                        reason: message,
                        diagnostics,
                    },
                    other => ExecutionOutcome::RenderFailed {
                        reason: other.to_string(),
                        diagnostics: None,
                    },
                }
            }
        }
    }
}

fn report_outcome(job: &JobDescriptor, outcome: &ExecutionOutcome) {
    let input = job.input_path();
    match outcome {
        ExecutionOutcome::Success => {
            info!("Converted {} -> {}", input.display(), job.output_path().display());
        }
        ExecutionOutcome::SkippedExisting => {
            info!("Skipping existing file {}", job.output_path().display());
        }
        ExecutionOutcome::AnalysisFailed(reason) => {
            warn!(
                "Skipping file due to failure in pre-conversion analysis of {}: {}",
                input.display(),
                reason
            );
        }
        ExecutionOutcome::RenderFailed { reason, diagnostics } => {
            warn!("Conversion failed for file {}: {}", input.display(), reason);
            if let Some(diagnostics) = diagnostics {
                warn!("{}", diagnostics);
            }
        }
    }
}

/// Delete whatever the encoder left at `output` after a failure
fn remove_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => info!("Deleted partial output {}", output.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete partial output {}: {}", output.display(), e),
    }
}

/// Delete the original once its conversion is confirmed on disk
fn remove_input(input: &Path, output: &Path) {
    if !output.exists() {
        warn!(
            "Keeping {} because {} does not exist after conversion",
            input.display(),
            output.display()
        );
        return;
    }

    let removed = clear_readonly(input).and_then(|()| fs::remove_file(input));
    match removed {
        Ok(()) => info!("Removed original {}", input.display()),
        Err(e) => warn!("Failed to remove original {}: {}", input.display(), e),
    }
}

#[cfg(windows)]
fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

// Unlinking only needs write access to the directory on unix
#[cfg(not(windows))]
fn clear_readonly(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;
    use crate::classifier::classify;
    use crate::error::Result;
    use crate::ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream};
    use crate::job::Action;
    use crate::lifecycle::tests::quiet_guard;
    use crate::lifecycle::ShutdownTrigger;

    /// How the scripted encoder behaves when asked to render
    #[derive(Clone)]
    pub(crate) enum Script {
        /// Write the output and succeed
        Succeed,
        /// Write a partial output, then fail with a diagnostic
        FailAfterPartialWrite,
        /// Write a partial output, signal `started`, then never return
        Hang { started: Arc<Notify> },
        /// Signal `entered`, wait for `gate`, write a partial output, then stop when cancelled
        Late { entered: Arc<Notify>, gate: Arc<Notify> },
    }

    pub(crate) struct FakeEncoder {
        pub script: Script,
        pub undecodable: Vec<PathBuf>,
        pub renders: AtomicUsize,
        pub invocations: Mutex<Vec<EncoderInvocation>>,
    }

    impl FakeEncoder {
        pub(crate) fn new(script: Script) -> Self {
            Self {
                script,
                undecodable: Vec::new(),
                renders: AtomicUsize::new(0),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    fn video_analysis() -> FFProbeData {
        FFProbeData {
            streams: vec![FFProbeStream {
                index: 0,
                codec_type: Some("video".to_string()),
            }],
            format: FFProbeFormat {
                format_name: "mpegts".to_string(),
            },
        }
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn analyze(&self, input: &Path) -> Result<FFProbeData> {
            if self.undecodable.iter().any(|p| p == input) {
                return Err(ConvertError::Analysis {
                    path: input.to_path_buf(),
                    reason: "Invalid data found when processing input".to_string(),
                });
            }
            Ok(video_analysis())
        }

        async fn render(&self, invocation: &EncoderInvocation, cancel: &CancellationToken) -> Result<()> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            self.invocations.lock().unwrap().push(invocation.clone());
            match &self.script {
                Script::Succeed => {
                    fs::write(&invocation.output, b"converted")?;
                    Ok(())
                }
                Script::FailAfterPartialWrite => {
                    fs::write(&invocation.output, b"partial")?;
                    Err(ConvertError::Render {
                        path: invocation.input.clone(),
                        message: "FFmpeg exited with code 1".to_string(),
                        diagnostics: Some("Conversion failed!".to_string()),
                    })
                }
                Script::Hang { started } => {
                    fs::write(&invocation.output, b"partial")?;
                    started.notify_one();
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Script::Late { entered, gate } => {
                    entered.notify_one();
                    gate.notified().await;
                    fs::write(&invocation.output, b"partial")?;
                    cancel.cancelled().await;
                    Err(ConvertError::Interrupted)
                }
            }
        }
    }

    fn executor(script: Script) -> Executor<FakeEncoder> {
        Executor::new(FakeEncoder::new(script), Arc::new(quiet_guard()), 23)
    }

    #[tokio::test]
    async fn test_remux_success_keeps_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.ts");
        fs::write(&input, b"ts data").unwrap();

        let executor = executor(Script::Succeed);
        let job = classify(&input, false, false, None);
        assert_eq!(job.action(), Action::Remux);

        let outcome = executor.execute(job).await;
        assert_eq!(outcome, ExecutionOutcome::Success);
        assert!(dir.path().join("clip.mp4").exists());
        assert!(input.exists());
        assert!(executor.guard().active_outputs().is_empty());

        let invocations = executor.encoder().invocations.lock().unwrap();
        assert_eq!(invocations[0].to_args()[7..11], ["-c:v", "copy", "-c:a", "copy"]);
    }

    #[tokio::test]
    async fn test_success_removes_input_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.ts");
        fs::write(&input, b"ts data").unwrap();

        let executor = executor(Script::Succeed);
        let outcome = executor.execute(classify(&input, true, false, None)).await;

        assert_eq!(outcome, ExecutionOutcome::Success);
        assert!(!input.exists());
        assert!(dir.path().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_render_failure_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.wmv");
        fs::write(&input, b"wmv data").unwrap();

        let executor = executor(Script::FailAfterPartialWrite);
        let job = classify(&input, true, false, Some(20));
        assert_eq!(job.action(), Action::Transcode);

        let outcome = executor.execute(job).await;
        match outcome {
            ExecutionOutcome::RenderFailed { reason, diagnostics } => {
                assert!(reason.contains("code 1"));
                assert_eq!(diagnostics.as_deref(), Some("Conversion failed!"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(!dir.path().join("movie.mp4").exists());
        assert_eq!(fs::read(&input).unwrap(), b"wmv data");
        assert!(executor.guard().active_outputs().is_empty());

        let invocations = executor.encoder().invocations.lock().unwrap();
        assert!(invocations[0].to_args().join(" ").contains("-crf 20"));
    }

    #[tokio::test]
    async fn test_analysis_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.ts");
        fs::write(&input, b"garbage").unwrap();

        let mut encoder = FakeEncoder::new(Script::Succeed);
        encoder.undecodable.push(input.clone());
        let executor = Executor::new(encoder, Arc::new(quiet_guard()), 23);

        let outcome = executor.execute(classify(&input, true, false, None)).await;
        assert!(matches!(outcome, ExecutionOutcome::AnalysisFailed(_)));
        assert!(outcome.is_failure());
        assert_eq!(executor.encoder().renders.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("broken.mp4").exists());
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_output_appearing_after_classification_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.wmv");
        fs::write(&input, b"wmv").unwrap();

        let job = classify(&input, false, false, None);
        fs::write(dir.path().join("clip.mp4"), b"from clip.ts").unwrap();

        let executor = executor(Script::Succeed);
        assert_eq!(executor.execute(job).await, ExecutionOutcome::SkippedExisting);
        assert_eq!(executor.encoder().renders.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(dir.path().join("clip.mp4")).unwrap(), b"from clip.ts");
    }

    #[tokio::test]
    async fn test_interrupt_mid_job_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.wmv");
        fs::write(&input, b"wmv data").unwrap();
        let output = dir.path().join("movie.mp4");

        let started = Arc::new(Notify::new());
        let executor = Arc::new(executor(Script::Hang { started: started.clone() }));
        let job = classify(&input, true, false, None);

        let worker = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(job).await })
        };
        started.notified().await;
        assert!(output.exists());
        assert_eq!(executor.guard().active_outputs(), vec![output.clone()]);

        worker.abort();
        let _ = worker.await;

        let report = executor.guard().shutdown(ShutdownTrigger::Interrupt).unwrap();
        assert_eq!(report.deleted_outputs, vec![output.clone()]);
        assert!(!output.exists());
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_no_render_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.ts");
        fs::write(&input, b"ts").unwrap();

        let executor = executor(Script::Succeed);
        executor.guard().shutdown(ShutdownTrigger::Interrupt);

        let outcome = executor.execute(classify(&input, true, false, None)).await;
        assert!(outcome.is_failure());
        assert_eq!(executor.encoder().renders.load(Ordering::SeqCst), 0);
        assert!(executor.guard().active_outputs().is_empty());
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_encoder_started_after_cleanup_removes_own_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.wmv");
        fs::write(&input, b"wmv data").unwrap();
        let output = dir.path().join("movie.mp4");

        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(executor(Script::Late {
            entered: entered.clone(),
            gate: gate.clone(),
        }));
        let job = classify(&input, true, false, None);

        let worker = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(job).await })
        };
        entered.notified().await;

        // Cleanup runs before the encoder has written anything
        let report = executor.guard().shutdown(ShutdownTrigger::Interrupt).unwrap();
        assert!(report.deleted_outputs.is_empty());
        assert!(executor.guard().active_outputs().is_empty());
        gate.notify_one();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), worker)
            .await
            .expect("worker stopped after cancellation")
            .unwrap();
        match outcome {
            ExecutionOutcome::RenderFailed { reason, .. } => {
                assert_eq!(reason, ConvertError::Interrupted.to_string());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!output.exists());
        assert!(input.exists());
        assert!(executor.guard().active_outputs().is_empty());
    }

    #[tokio::test]
    async fn test_output_claimed_by_another_job_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4.part");
        fs::write(&input, b"part").unwrap();
        let output = dir.path().join("clip.mp4");
        fs::write(&output, b"being written by clip.ts").unwrap();

        let executor = executor(Script::FailAfterPartialWrite);
        let held = executor.guard().claim_output(&output).unwrap();

        let outcome = executor.execute(classify(&input, false, true, None)).await;
        assert_eq!(outcome, ExecutionOutcome::SkippedExisting);
        assert_eq!(executor.encoder().renders.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&output).unwrap(), b"being written by clip.ts");
        assert_eq!(executor.guard().active_outputs(), vec![output.clone()]);
        held.release();
    }
}
