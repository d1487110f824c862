use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use crate::classifier::JobPlan;
use crate::encoder::Encoder;
use crate::executor::Executor;
use crate::job::{ExecutionOutcome, JobDescriptor};

/// Per-run counters, summed in whatever order jobs finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub queued: usize,
    pub skipped_existing: usize,
    pub succeeded: usize,
    pub analysis_failed: usize,
    pub render_failed: usize,
    /// Never started because shutdown began first
    pub cancelled: usize,
    /// Worker task panicked or was aborted
    pub aborted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn start(queued: usize) -> Self {
        let now = Utc::now();
        Self {
            queued,
            skipped_existing: 0,
            succeeded: 0,
            analysis_failed: 0,
            render_failed: 0,
            cancelled: 0,
            aborted: 0,
            started_at: now,
            finished_at: now,
        }
    }

    fn record(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Success => self.succeeded += 1,
            ExecutionOutcome::SkippedExisting => self.skipped_existing += 1,
            ExecutionOutcome::AnalysisFailed(_) => self.analysis_failed += 1,
            ExecutionOutcome::RenderFailed { .. } => self.render_failed += 1,
        }
    }

    fn record_join(&mut self, joined: Result<ExecutionOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.record(&outcome),
            Err(e) => {
                warn!("Conversion worker did not finish: {}", e);
                self.aborted += 1;
            }
        }
    }

    pub fn failed(&self) -> usize {
        self.analysis_failed + self.render_failed + self.aborted
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn log(&self) {
        info!(
            "Finished in {}s: {} converted, {} skipped, {} failed ({} analysis, {} conversion), {} cancelled",
            self.elapsed().num_seconds(),
            self.succeeded,
            self.skipped_existing,
            self.failed(),
            self.analysis_failed,
            self.render_failed,
            self.cancelled
        );
    }
}

/// Worker count when `--jobs` is not given.
///
/// Stream copies are I/O bound and run one per CPU. A single x264 encode
/// already saturates every core, so any transcode drops the pool to one worker.
pub fn default_concurrency(plan: &JobPlan) -> usize {
    if plan.is_remux_only() {
        num_cpus::get().max(1)
    } else {
        1
    }
}

/// Run every job through `executor` with at most `concurrency` in flight.
///
/// Jobs start in the order given. Failures never stop the batch. Once the
/// executor's guard is shutting down, jobs that have not started yet are
/// counted as cancelled instead, and jobs in flight are drained.
pub async fn run<E: Encoder>(
    jobs: Vec<JobDescriptor>,
    concurrency: usize,
    executor: Arc<Executor<E>>,
) -> RunSummary {
    let mut summary = RunSummary::start(jobs.len());
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();
    let mut pending = jobs.into_iter();
    let cancel = executor.guard().cancellation();

    while let Some(job) = pending.next() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = permits.clone().acquire_owned() => permit.ok(),
        };

        let Some(permit) = permit.filter(|_| !executor.guard().is_shutting_down()) else {
            summary.cancelled += 1 + pending.len();
            info!("Shutting down, {} conversions not started", summary.cancelled);
            break;
        };

        let executor = executor.clone();
        workers.spawn(async move {
            let _permit = permit;
            executor.execute(job).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        summary.record_join(joined);
    }

    summary.finished_at = Utc::now();
    summary
}
