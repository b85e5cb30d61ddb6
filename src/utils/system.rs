// src/utils/system.rs: Host resource probes

use sysinfo::System;

/// Number of physical cores on the host, used as the default thread hint.
/// Never less than one.
pub fn detect_physical_cores() -> usize {
    System::physical_core_count().unwrap_or(1).max(1)
}

/// How many organisms can be sorted at once without oversubscribing the host.
///
/// # Arguments
///
/// * `cores` - Physical cores available
/// * `sorting_threads` - Threads each `samtools sort` is given
///
/// # Returns
///
/// usize, at least 1
pub fn default_parallel_jobs(cores: usize, sorting_threads: usize) -> usize {
    (cores / sorting_threads.max(1)).max(1)
}
