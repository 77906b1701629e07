// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

use stacktracker::{
    gettid, install_internal_handler, internal_signum, CollectorConfiguration, StackTraceCollector,
};
use std::sync::mpsc;
use std::thread;

// Lives in its own test binary so the targeted tid set is fully controlled.

/// A thread that blocks the collection signal never acks: the queued signal
/// sits undelivered, which is indistinguishable from a wedged handler as far
/// as the coordinator is concerned.
fn spawn_non_acking_thread() -> libc::pid_t {
    let (tid_tx, tid_rx) = mpsc::channel();
    thread::spawn(move || {
        // Safety: masking a signal on the current thread.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, internal_signum());
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        }
        tid_tx.send(gettid()).unwrap();
        loop {
            thread::park();
        }
    });
    tid_rx.recv().unwrap()
}

#[test]
fn deadline_expiry_reports_exact_counts_and_no_results() {
    install_internal_handler().unwrap();

    let blocked_tid = spawn_non_acking_thread();
    let me = gettid();

    let err = StackTraceCollector::new(CollectorConfiguration::new(1).unwrap())
        .with_thread_source(move || Ok(vec![me, blocked_tid]))
        .collect()
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Failed to get all 2 stacktraces within timeout. Got only 1"
    );

    // The timed-out collection leaks its payload slots rather than freeing
    // memory a straggler handler could still write; the process stays healthy
    // and a later collection succeeds.
    let results = StackTraceCollector::new(CollectorConfiguration::default())
        .with_thread_source(move || Ok(vec![me]))
        .collect()
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tids, vec![me]);
}
