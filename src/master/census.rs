//! # Process census for the `INFO` diagnostic signal.
//!
//! This runtime cannot enumerate live objects, so the census is restricted
//! to process statistics: resident set and address-space size, open
//! descriptor count, allocator high-water mark, and the supervision
//! tallies (listeners, workers). Each dump logs deltas against the
//! previous one.
//!
//! The census is strictly a diagnostic: every failure in here is logged
//! and swallowed, never fatal.

use nix::sys::resource::{getrusage, UsageWho};

/// One census sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct CensusSnapshot {
    /// Live listener children.
    pub listeners: i64,
    /// Worker pids tracked across all listeners.
    pub workers: i64,
    /// `ru_maxrss` from getrusage, in kilobytes.
    pub max_rss_kb: Option<i64>,
    /// `VmRSS` from /proc, in kilobytes (Linux only).
    pub vm_rss_kb: Option<i64>,
    /// `VmSize` from /proc, in kilobytes (Linux only).
    pub vm_size_kb: Option<i64>,
    /// Open file descriptors (Linux only).
    pub open_fds: Option<i64>,
}

impl CensusSnapshot {
    fn collect(listeners: usize, workers: usize) -> Self {
        let mut snap = Self {
            listeners: listeners as i64,
            workers: workers as i64,
            ..Self::default()
        };

        match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => snap.max_rss_kb = Some(i64::from(usage.max_rss())),
            Err(e) => tracing::debug!(error = %e, "getrusage failed"),
        }

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                snap.vm_rss_kb = proc_status_kb(&status, "VmRSS:");
                snap.vm_size_kb = proc_status_kb(&status, "VmSize:");
            }
            if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
                snap.open_fds = Some(entries.count() as i64);
            }
        }

        snap
    }
}

/// Keeps the previous snapshot so dumps can report deltas.
#[derive(Debug, Default)]
pub struct Census {
    last: Option<CensusSnapshot>,
}

impl Census {
    /// Collects a snapshot, logs it with deltas, and remembers it for the
    /// next dump.
    pub fn dump(&mut self, listeners: usize, workers: usize) {
        let snap = CensusSnapshot::collect(listeners, workers);
        let prev = self.last.replace(snap);

        tracing::info!(
            listeners = %delta(Some(snap.listeners), prev.map(|p| p.listeners)),
            workers = %delta(Some(snap.workers), prev.map(|p| p.workers)),
            max_rss_kb = %delta(snap.max_rss_kb, prev.and_then(|p| p.max_rss_kb)),
            vm_rss_kb = %delta(snap.vm_rss_kb, prev.and_then(|p| p.vm_rss_kb)),
            vm_size_kb = %delta(snap.vm_size_kb, prev.and_then(|p| p.vm_size_kb)),
            open_fds = %delta(snap.open_fds, prev.and_then(|p| p.open_fds)),
            "process census"
        );
    }
}

/// Renders `value (+delta)` against the previous sample, or `-` when the
/// statistic is unavailable on this platform.
fn delta(now: Option<i64>, before: Option<i64>) -> String {
    match (now, before) {
        (Some(n), Some(b)) => format!("{n} ({:+})", n - b),
        (Some(n), None) => n.to_string(),
        (None, _) => "-".to_string(),
    }
}

#[cfg(target_os = "linux")]
fn proc_status_kb(status: &str, key: &str) -> Option<i64> {
    let line = status.lines().find(|l| l.starts_with(key))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_formats_against_previous_sample() {
        assert_eq!(delta(Some(10), Some(7)), "10 (+3)");
        assert_eq!(delta(Some(5), Some(9)), "5 (-4)");
        assert_eq!(delta(Some(5), None), "5");
        assert_eq!(delta(None, Some(1)), "-");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_proc_status_fields() {
        let status = "Name:\tresqued\nVmSize:\t  12345 kB\nVmRSS:\t    678 kB\n";
        assert_eq!(proc_status_kb(status, "VmSize:"), Some(12345));
        assert_eq!(proc_status_kb(status, "VmRSS:"), Some(678));
        assert_eq!(proc_status_kb(status, "VmSwap:"), None);
    }

    #[test]
    fn dump_never_panics() {
        let mut census = Census::default();
        census.dump(1, 3);
        census.dump(2, 1);
    }
}
