// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

use stacktracker::{external_signum, install_external_handler, install_internal_handler};
use std::fs;
use std::os::fd::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

// Lives in its own test binary: it redirects the process's stderr while the
// service thread writes the dump.

#[test]
fn external_signal_produces_a_framed_dump_on_stderr() {
    install_internal_handler().unwrap();
    install_external_handler().unwrap();

    let capture = tempfile::NamedTempFile::new().unwrap();
    // Safety: descriptor juggling on stderr, restored below.
    let saved_stderr = unsafe { libc::dup(libc::STDERR_FILENO) };
    assert!(saved_stderr >= 0);
    unsafe { libc::dup2(capture.as_file().as_raw_fd(), libc::STDERR_FILENO) };

    // Safety: raising a handled signal at ourselves.
    let rc = unsafe { libc::kill(libc::getpid(), external_signum()) };
    assert_eq!(rc, 0);

    // The dump is asynchronous; wait for the closing banner.
    let deadline = Instant::now() + Duration::from_secs(15);
    let mut contents = String::new();
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
        contents = fs::read_to_string(capture.path()).unwrap();
        if contents.contains("Stack traces - End") {
            break;
        }
    }

    // Safety: restoring the saved stderr.
    unsafe {
        libc::dup2(saved_stderr, libc::STDERR_FILENO);
        libc::close(saved_stderr);
    }

    assert!(
        contents.contains("1) Stack traces - Start"),
        "no start banner in: {contents}"
    );
    assert!(contents.contains("Threads:"), "no groups in: {contents}");
    assert!(contents.contains("Stack trace:"));
    assert!(contents.contains("1) Stack traces - End"));
}
