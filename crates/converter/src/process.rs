use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use sysinfo::{Pid, System};

/// A process as seen in one snapshot of the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
}

/// Access to the OS process table, kept behind a trait so cleanup logic can be
/// tested without real child processes
pub trait ProcessTable: Send {
    fn current_pid(&self) -> u32;

    fn snapshot(&mut self) -> Vec<ProcessInfo>;

    /// Forcibly terminate `pid` and block until it is gone. Returns false if it could not be killed.
    fn kill_and_wait(&mut self, pid: u32) -> bool;
}

/// Compare process names ignoring case and a Windows `.exe` suffix
fn same_program(process_name: &str, wanted: &str) -> bool {
    let normalize = |s: &str| {
        let lower = s.to_lowercase();
        lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
    };
    normalize(process_name) == normalize(wanted)
}

/// Processes named `name` whose parent chain reaches `ancestor`.
///
/// Walking the whole chain keeps a same-named process started by someone
/// else on the machine out of the result. Cycles in a stale snapshot end the walk.
pub fn find_descendants_by_name(snapshot: &[ProcessInfo], ancestor: u32, name: &str) -> Vec<ProcessInfo> {
    let parents: HashMap<u32, Option<u32>> = snapshot.iter().map(|p| (p.pid, p.parent)).collect();

    snapshot
        .iter()
        .filter(|p| p.pid != ancestor && same_program(&p.name, name))
        .filter(|p| {
            let mut seen = HashSet::new();
            let mut current = p.parent;
            while let Some(pid) = current {
                if pid == ancestor {
                    return true;
                }
                if !seen.insert(pid) {
                    return false;
                }
                current = parents.get(&pid).copied().flatten();
            }
            false
        })
        .cloned()
        .collect()
}

/// `ProcessTable` backed by `sysinfo`
pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn snapshot(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_all();
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                name: AsRef::<OsStr>::as_ref(process.name()).to_string_lossy().into_owned(),
            })
            .collect()
    }

    fn kill_and_wait(&mut self, pid: u32) -> bool {
        match self.system.process(Pid::from_u32(pid)) {
            Some(process) => {
                if !process.kill() {
                    return false;
                }
                process.wait();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, parent: Option<u32>, name: &str) -> ProcessInfo {
        ProcessInfo { pid, parent, name: name.to_string() }
    }

    #[test]
    fn test_direct_and_nested_children_found() {
        let snapshot = vec![
            proc(1, None, "init"),
            proc(100, Some(1), "convert"),
            proc(101, Some(100), "ffmpeg"),
            proc(102, Some(100), "sh"),
            proc(103, Some(102), "ffmpeg.exe"),
            proc(200, Some(1), "ffmpeg"),
        ];

        let mut pids: Vec<u32> = find_descendants_by_name(&snapshot, 100, "ffmpeg")
            .into_iter()
            .map(|p| p.pid)
            .collect();
        pids.sort();
        assert_eq!(pids, vec![101, 103]);
    }

    #[test]
    fn test_unrelated_same_named_process_ignored() {
        let snapshot = vec![
            proc(100, Some(1), "convert"),
            proc(300, Some(299), "ffmpeg"),
            proc(299, Some(1), "bash"),
        ];
        assert!(find_descendants_by_name(&snapshot, 100, "ffmpeg").is_empty());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let snapshot = vec![
            proc(10, Some(11), "ffmpeg"),
            proc(11, Some(10), "ffmpeg"),
        ];
        assert!(find_descendants_by_name(&snapshot, 100, "ffmpeg").is_empty());
    }

    #[test]
    fn test_system_table_sees_current_process() {
        let mut table = SystemProcessTable::new();
        let me = table.current_pid();
        assert!(table.snapshot().iter().any(|p| p.pid == me));
    }
}
