// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

use stacktracker::{
    gettid, install_internal_handler, internal_signum, CollectorConfiguration, StackTraceCollector,
};
use std::thread;
use std::time::Duration;

// Lives in its own test binary because it forks.

#[test]
fn collection_signal_from_another_process_is_dropped() {
    install_internal_handler().unwrap();

    let parent = unsafe { libc::getpid() };
    // Safety: the child only calls async-signal-safe kill and _exit.
    let child = unsafe { libc::fork() };
    if child == 0 {
        unsafe {
            libc::kill(parent, internal_signum());
            libc::_exit(0);
        }
    }
    assert!(child > 0, "fork failed");
    unsafe { libc::waitpid(child, std::ptr::null_mut(), 0) };

    // The handler drops outsider signals without touching the (absent)
    // payload; give delivery a moment, then confirm the process still
    // collects normally.
    thread::sleep(Duration::from_millis(200));

    let me = gettid();
    let results = StackTraceCollector::new(CollectorConfiguration::default())
        .with_thread_source(move || Ok(vec![me]))
        .collect()
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tids, vec![me]);
}
