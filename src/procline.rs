//! # Process title updates.
//!
//! Keeps `ps` output honest about what the master is doing. On Linux this
//! uses `prctl(PR_SET_NAME)`, which caps the comm name at 15 bytes; the
//! full title always goes to the trace log. Elsewhere the update is a
//! no-op beyond the log line.

/// Builds the master's title from its supervision state.
pub fn master_title(generation: u64, listeners: usize, workers: usize, paused: bool) -> String {
    let mut title = format!("resqued master [gen {generation}] [{listeners} listeners] [{workers} workers]");
    if paused {
        title.push_str(" [paused]");
    }
    title
}

/// Applies a process title, best-effort.
pub fn set(title: &str) {
    tracing::trace!(%title, "process title");

    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;

        // PR_SET_NAME truncates at 15 bytes + NUL.
        let short: String = title.chars().take(15).collect();
        if let Ok(name) = CString::new(short) {
            unsafe {
                libc::prctl(
                    libc::PR_SET_NAME,
                    name.as_ptr() as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_reflects_supervision_state() {
        assert_eq!(
            master_title(3, 2, 5, false),
            "resqued master [gen 3] [2 listeners] [5 workers]"
        );
        assert_eq!(
            master_title(1, 0, 0, true),
            "resqued master [gen 1] [0 listeners] [0 workers] [paused]"
        );
    }
}
