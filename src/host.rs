//! Host probing: free disk space and recorder process usage

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of the recorder process
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

pub trait HostProbe: Send + Sync {
    /// Free bytes on the volume holding `path`. None when unknown
    fn available_space(&self, path: &Path) -> Option<u64>;

    fn process_usage(&self) -> ProcessUsage;
}

/// [`HostProbe`] backed by `sysinfo`
///
/// CPU usage is measured between two refreshes, so the first sample
/// reports 0.
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest ancestor of `path` that exists, made absolute
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .find_map(|p| p.canonicalize().ok())
        .or_else(|| std::env::current_dir().ok())
}

impl HostProbe for SystemProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let target = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point containing the target wins
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    fn process_usage(&self) -> ProcessUsage {
        let Some(pid) = self.pid else {
            return ProcessUsage::default();
        };

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        system
            .process(pid)
            .map(|process| ProcessUsage {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_leaf_resolves_to_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("not").join("yet").join("clip.mp4");
        let resolved = existing_ancestor(&missing).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_probe_reports_memory() {
        let probe = SystemProbe::new();
        let usage = probe.process_usage();
        assert!(usage.memory_mb > 0.0);
        assert!(probe.process_usage().cpu_percent >= 0.0);
    }
}
