//! Disk usage of the recording volume.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use sysinfo::Disks;

/// Reported when the volume cannot be determined.
pub const UNKNOWN_USAGE_PERCENT: u32 = 99;

/// Source of the used-space percentage of the volume holding a directory.
pub trait DiskProbe: Send {
    /// Used space in percent (0..=100) of the volume holding `dir`.
    ///
    /// Returns [`UNKNOWN_USAGE_PERCENT`] when `dir` is `None` or the volume
    /// cannot be determined.
    fn used_percent(&mut self, dir: Option<&Path>) -> u32;
}

/// Used percentage from available and total bytes.
pub fn used_percent(available: u64, total: u64) -> u32 {
    if total == 0 {
        return UNKNOWN_USAGE_PERCENT;
    }
    let available = available.min(total);
    let free_percent = (available as u128 * 100 / total as u128) as u32;
    100 - free_percent
}

/// Probe backed by the operating system's mounted disk list.
#[derive(Debug, Default)]
pub struct SystemDiskProbe;

impl SystemDiskProbe {
    pub fn new() -> Self {
        Self
    }
}

impl DiskProbe for SystemDiskProbe {
    fn used_percent(&mut self, dir: Option<&Path>) -> u32 {
        let Some(dir) = dir else {
            return UNKNOWN_USAGE_PERCENT;
        };
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| dir.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().components().count())
            .map(|d| used_percent(d.available_space(), d.total_space()))
            .unwrap_or(UNKNOWN_USAGE_PERCENT)
    }
}

/// Probe reporting a value the caller controls; clones share the value.
#[derive(Debug, Clone)]
pub struct FixedDiskProbe {
    percent: Arc<AtomicU32>,
}

impl FixedDiskProbe {
    pub fn new(percent: u32) -> Self {
        Self {
            percent: Arc::new(AtomicU32::new(percent)),
        }
    }

    pub fn set(&self, percent: u32) {
        self.percent.store(percent, Ordering::SeqCst);
    }
}

impl DiskProbe for FixedDiskProbe {
    fn used_percent(&mut self, dir: Option<&Path>) -> u32 {
        if dir.is_none() {
            return UNKNOWN_USAGE_PERCENT;
        }
        self.percent.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_percent() {
        assert_eq!(used_percent(25, 100), 75);
        assert_eq!(used_percent(100, 100), 0);
        assert_eq!(used_percent(0, 100), 100);
        assert_eq!(used_percent(1, 3), 67);
        assert_eq!(used_percent(10, 0), UNKNOWN_USAGE_PERCENT);
    }

    #[test]
    fn test_no_directory_is_unknown() {
        assert_eq!(SystemDiskProbe::new().used_percent(None), UNKNOWN_USAGE_PERCENT);
        assert_eq!(FixedDiskProbe::new(10).used_percent(None), UNKNOWN_USAGE_PERCENT);
    }

    #[test]
    fn test_fixed_probe_is_shared() {
        let probe = FixedDiskProbe::new(40);
        let mut owned = probe.clone();
        let dir = Path::new("/data");
        assert_eq!(owned.used_percent(Some(dir)), 40);
        probe.set(96);
        assert_eq!(owned.used_percent(Some(dir)), 96);
    }

    #[test]
    fn test_system_probe_reports_a_percentage() {
        let dir = tempfile::tempdir().unwrap();
        let percent = SystemDiskProbe::new().used_percent(Some(dir.path()));
        assert!(percent <= 100);
    }
}
