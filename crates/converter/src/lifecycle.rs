//! Crash-safe cleanup on exit or interrupt.
//!
//! Workers claim each output path right before the encoder starts writing
//! it and release it right after the encoder returns. A path can be claimed
//! by one worker at a time. Anything still claimed when the guard shuts down
//! was cut off mid-write, so it is deleted after the orphaned encoder
//! children have been killed. Encoders started after that point see the
//! guard's cancellation token and stop on their own.

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use crate::process::{find_descendants_by_name, ProcessTable};

/// What moved the guard from RUNNING to SHUTTING_DOWN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Exit,
    Interrupt,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Exit => write!(f, "exit"),
            ShutdownTrigger::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// What the single cleanup pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    pub killed_pids: Vec<u32>,
    pub deleted_outputs: Vec<PathBuf>,
}

pub struct LifecycleGuard {
    shutting_down: AtomicBool,
    active_outputs: Mutex<HashSet<PathBuf>>,
    encoder_process_name: String,
    processes: Mutex<Box<dyn ProcessTable>>,
    cancel: CancellationToken,
}

/// Exclusive claim on one in-flight output.
///
/// Must be released once the encoder returns. Dropping it without `release`
/// leaves the path claimed, which is what an aborted worker should do.
#[must_use = "an unreleased output is deleted on shutdown"]
pub struct ActiveOutput<'a> {
    guard: &'a LifecycleGuard,
    path: PathBuf,
}

impl ActiveOutput<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {
        lock(&self.guard.active_outputs).remove(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicked worker must not block cleanup
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LifecycleGuard {
    pub fn new(encoder_process_name: impl Into<String>, processes: Box<dyn ProcessTable>) -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            active_outputs: Mutex::new(HashSet::new()),
            encoder_process_name: encoder_process_name.into(),
            processes: Mutex::new(processes),
            cancel: CancellationToken::new(),
        }
    }

    /// Claim `path` for one encoder run. `None` if another worker holds it.
    pub fn claim_output(&self, path: &Path) -> Option<ActiveOutput<'_>> {
        if !lock(&self.active_outputs).insert(path.to_path_buf()) {
            return None;
        }
        Some(ActiveOutput {
            guard: self,
            path: path.to_path_buf(),
        })
    }

    /// Cancelled once shutdown has killed the known children and deleted their outputs
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the outputs currently being written
    pub fn active_outputs(&self) -> Vec<PathBuf> {
        lock(&self.active_outputs).iter().cloned().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Kill orphaned encoder children, delete interrupted outputs, log the final line.
    ///
    /// Only the first call does any work; every later call returns `None`.
    /// Blocks while children are being killed, so async callers should run it
    /// on a blocking thread.
    pub fn shutdown(&self, trigger: ShutdownTrigger) -> Option<ShutdownReport> {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        info!("Cleaning up before exiting...");

        let killed_pids = self.kill_child_encoders();
        // encoders spawned after the snapshot kill themselves and clean up
        self.cancel.cancel();

        let outputs: Vec<PathBuf> = lock(&self.active_outputs).drain().collect();
        let mut deleted_outputs = Vec::new();
        for output in outputs {
            info!("Deleting incomplete conversion output file {}", output.display());
            match std::fs::remove_file(&output) {
                Ok(()) => deleted_outputs.push(output),
                // the executor may have removed it already
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {}", output.display(), e),
            }
        }

        info!("Exiting...");

        Some(ShutdownReport {
            trigger,
            killed_pids,
            deleted_outputs,
        })
    }

    fn kill_child_encoders(&self) -> Vec<u32> {
        let mut processes = lock(&self.processes);
        let me = processes.current_pid();
        let snapshot = processes.snapshot();

        let mut killed = Vec::new();
        for child in find_descendants_by_name(&snapshot, me, &self.encoder_process_name) {
            info!("Killing child process {} ({})", child.name, child.pid);
            if processes.kill_and_wait(child.pid) {
                killed.push(child.pid);
            } else {
                warn!("Failed to kill child process {} ({})", child.name, child.pid);
            }
        }
        killed
    }
}

impl fmt::Debug for LifecycleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleGuard")
            .field("shutting_down", &self.is_shutting_down())
            .field("active_outputs", &self.active_outputs())
            .field("encoder_process_name", &self.encoder_process_name)
            .finish()
    }
}
