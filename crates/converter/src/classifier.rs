use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info};
use crate::job::{output_path_for, Action, JobDescriptor};

/// State of the output path at classification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Missing,
    /// Zero-length leftover of an aborted run
    Empty,
    Present,
}

impl OutputState {
    pub fn of(output: &Path) -> Self {
        match fs::metadata(output) {
            Ok(meta) if meta.len() == 0 => OutputState::Empty,
            Ok(_) => OutputState::Present,
            Err(_) => OutputState::Missing,
        }
    }
}

/// Whether a job for `output` should be dispatched
pub fn should_queue(output: &Path, overwrite_existing: bool) -> bool {
    overwrite_existing || OutputState::of(output) != OutputState::Present
}

/// Map an input file to its job descriptor
pub fn classify(
    input: &Path,
    remove_originals: bool,
    overwrite_existing: bool,
    rate_factor: Option<u8>,
) -> JobDescriptor {
    let output = output_path_for(input);
    let action = Action::for_input(input);
    let overwrite_allowed = overwrite_existing || OutputState::of(&output) == OutputState::Empty;

    debug!("Classified {} as {} -> {}", input.display(), action, output.display());

    JobDescriptor::new(
        input.to_path_buf(),
        output,
        action,
        overwrite_allowed,
        remove_originals,
        rate_factor,
    )
}

/// Jobs to dispatch plus the inputs skipped because they were already converted
#[derive(Debug, Default)]
pub struct JobPlan {
    pub queued: Vec<JobDescriptor>,
    pub skipped: Vec<PathBuf>,
}

impl JobPlan {
    /// True when every queued job is a stream copy
    pub fn is_remux_only(&self) -> bool {
        self.queued.iter().all(|job| job.action() == Action::Remux)
    }
}

/// Classify every input and split them into queued and skipped
pub fn plan_jobs<I>(
    inputs: I,
    remove_originals: bool,
    overwrite_existing: bool,
    rate_factor: Option<u8>,
) -> JobPlan
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut plan = JobPlan::default();

    for input in inputs {
        let job = classify(&input, remove_originals, overwrite_existing, rate_factor);
        if should_queue(job.output_path(), overwrite_existing) {
            plan.queued.push(job);
        } else {
            info!("Skipping {}", input.display());
            plan.skipped.push(input);
        }
    }

    info!("Skipping {} existing files.", plan.skipped.len());
    plan
}
