// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io;

/// Lists the kernel thread ids of every live thread in this process, by
/// reading `/proc/self/task`.  The snapshot is immediately stale: threads may
/// be born or die before the caller acts on it, and the coordinator is built
/// to tolerate both.
pub fn list_threads() -> io::Result<Vec<libc::pid_t>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir("/proc/self/task")? {
        let entry = entry?;
        if let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<libc::pid_t>().ok())
        {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// Kernel thread id of the calling thread.
pub fn gettid() -> libc::pid_t {
    // Safety: no preconditions.
    unsafe { libc::gettid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_at_least_the_calling_thread() {
        let tids = list_threads().unwrap();
        assert!(!tids.is_empty());
        assert!(tids.contains(&gettid()));
    }

    #[test]
    fn main_thread_group_leader_is_listed() {
        let tids = list_threads().unwrap();
        let pid = unsafe { libc::getpid() };
        assert!(tids.contains(&pid));
    }
}
