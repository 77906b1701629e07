// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The external dump path.
//!
//! An outside agent (an operator with `kill`, a watchdog) raises the external
//! realtime signal at this process to ask for a dump of every thread's stack.
//! The handler that catches it cannot run the collection itself: it may have
//! interrupted code holding locks the collector needs, it must not allocate,
//! and the collection blocks.  So the handler only forwards the request over
//! a pipe to a long-lived service thread, and the service thread does the
//! real work in ordinary thread context.
//!
//! Each request carries a one-shot reply descriptor.  The service thread
//! closes it once the dump is flushed, so a requester that opened the other
//! end beforehand observes EOF exactly when the trace text is available.

use crate::collector::coordinator::{CollectError, StackTraceCollector};
use crate::collector::err_log;
use crate::shared::configuration::CollectorConfiguration;
use crate::shared::constants::{STACK_DUMP_BEGIN_BANNER, STACK_DUMP_END_BANNER};
use crate::stack_info::{render_to_string, CollectionResult};
use nix::fcntl::OFlag;
use std::ffi::{c_int, c_void};
use std::io::{self, Write};
use std::mem;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;

/// Process-wide record of the dump service.  Created on first install of the
/// external handler, never torn down.  `server_tgid` pins the process that
/// started the service thread: a post-`fork` child inherits the signal
/// disposition but not the thread, and must not write into the inherited
/// pipe.
pub(crate) struct ServiceState {
    pub(crate) server_tgid: libc::pid_t,
    pub(crate) request_fd: RawFd,
}

static SERVICE: OnceLock<ServiceState> = OnceLock::new();

/// Returns the singleton service state, starting the service thread on first
/// call and blocking until it has published its request pipe.  A failed start
/// is recorded as `request_fd == -1`.
pub(crate) fn service_state() -> &'static ServiceState {
    SERVICE.get_or_init(|| {
        let (ready_tx, ready_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("stack-dump-service".into())
            .spawn(move || request_processor(ready_tx));
        let request_fd = match spawned {
            // The handle is dropped, detaching the thread; it runs for the
            // life of the process.
            Ok(_handle) => ready_rx.recv().unwrap_or(-1),
            Err(e) => {
                eprintln!("Failed to spawn stack dump service thread: {e}");
                -1
            }
        };
        ServiceState {
            // Safety: getpid has no preconditions.
            server_tgid: unsafe { libc::getpid() },
            request_fd,
        }
    })
}

/// Handler for the external dump signal.  Signal context: creates the reply
/// pipe and forwards its write end to the service thread, nothing more.
pub(crate) extern "C" fn handle_dump_request(
    _signum: c_int,
    _sig_info: *mut libc::siginfo_t,
    _ucontext: *mut c_void,
) {
    let Some(state) = SERVICE.get() else {
        // Handler registered without going through the installer.
        err_log("Stack dump service is not initialized, ignoring dump request\n");
        return;
    };
    // Safety: getpid is async-signal-safe.
    if state.server_tgid != unsafe { libc::getpid() } {
        err_log("Not contacting stack dump service started in a different thread group\n");
        return;
    }

    let mut fds = [0 as c_int; 2];
    // Safety: pipe into a stack array; pipe(2) is async-signal-safe.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        err_log("Failed to create reply pipe for stack dump request\n");
        return;
    }
    // The handler does not wait for the dump to finish, so its read end can
    // go right away.  The requester holds its own copy if it wants the EOF.
    // Safety: fds[0] was just opened.
    unsafe { libc::close(fds[0]) };

    let reply_fd = fds[1];
    let bytes = reply_fd.to_ne_bytes();
    // Safety: fixed-width write of a stack buffer; 4 bytes <= PIPE_BUF, so
    // concurrent handlers never interleave.
    let written =
        unsafe { libc::write(state.request_fd, bytes.as_ptr() as *const c_void, bytes.len()) };
    if written != bytes.len() as isize {
        err_log("Failed to send a request to the stack dump service thread\n");
        // Safety: reply_fd was just opened and not handed off.
        unsafe { libc::close(reply_fd) };
    }
}

/// Body of the service thread.  Creates the request pipe, publishes its write
/// end through `ready_tx`, then serves dump requests until EOF on the pipe.
fn request_processor(ready_tx: mpsc::Sender<RawFd>) {
    let (request_rx, request_tx) = match nix::unistd::pipe2(OFlag::O_CLOEXEC) {
        Ok(pair) => pair,
        // ready_tx drops unsent; the installer sees the failure.
        Err(e) => {
            eprintln!("Failed to create stack dump request pipe: {e}");
            return;
        }
    };
    // The write end is published process-wide and must outlive this scope.
    let request_tx_fd = request_tx.into_raw_fd();
    let _ = ready_tx.send(request_tx_fd);
    drop(ready_tx);

    let config = CollectorConfiguration::default();
    let mut request_count: u64 = 0;
    loop {
        let mut buf = [0u8; mem::size_of::<c_int>()];
        // Safety: fixed-width read into a stack buffer.
        let n = unsafe {
            libc::read(
                request_rx.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        };
        if n == -1 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            eprintln!("Failed to read stack dump request: {e}");
            continue;
        }
        if n == 0 {
            eprintln!("Received request to terminate the stack dump service thread");
            // Safety: the published write end is ours to close on shutdown.
            unsafe { libc::close(request_tx_fd) };
            break;
        }
        if n != buf.len() as isize {
            eprintln!(
                "Read partial stack dump request. Expected {} bytes, got {n}",
                buf.len()
            );
            continue;
        }

        request_count += 1;
        let reply_fd = c_int::from_ne_bytes(buf);

        let collection = StackTraceCollector::new(config.clone()).collect();
        let dump = render_dump(request_count, &collection);
        let mut err_stream = io::stderr().lock();
        let _ = err_stream.write_all(dump.as_bytes());
        // Requesters may assert on the presence of trace text once their
        // reply descriptor becomes readable, so the flush has to land before
        // the close.
        let _ = err_stream.flush();
        drop(err_stream);
        // Safety: reply_fd arrived over the request pipe and is owned by this
        // request; closing it is the completion ack.
        unsafe { libc::close(reply_fd) };
    }
}

/// Formats one framed dump.  The `Start`/`End` banners always pair up with
/// the same request counter, collection failure included.
fn render_dump(
    request_count: u64,
    collection: &Result<Vec<CollectionResult>, CollectError>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{STACK_DUMP_BEGIN_BANNER}\n{request_count}) Stack traces - Start\n{STACK_DUMP_BEGIN_BANNER}\n"
    ));
    match collection {
        Ok(results) => {
            out.push('\n');
            out.push_str(&render_to_string(results));
        }
        Err(e) => {
            out.push_str(&format!("StackTrace collection failed: {e}\n"));
        }
    }
    out.push_str(&format!(
        "{STACK_DUMP_END_BANNER}\n{request_count}) Stack traces - End\n{STACK_DUMP_END_BANNER}\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_info::ThreadStack;

    fn one_group() -> Vec<CollectionResult> {
        let mut trace = ThreadStack::new(5);
        trace.add_frame(0, 0x1000);
        vec![CollectionResult {
            trace,
            tids: vec![5],
        }]
    }

    #[test]
    fn dump_frame_start_and_end_share_the_counter() {
        let dump = render_dump(3, &Ok(one_group()));
        assert!(dump.contains("3) Stack traces - Start\n"));
        assert!(dump.contains("3) Stack traces - End\n"));
        assert!(dump.contains("Threads: 5\n"));
        assert!(dump.contains("Stack trace:\n"));
    }

    #[test]
    fn failed_collection_still_gets_a_closing_banner() {
        let err = CollectError::DeadlineExceeded {
            expected: 4,
            acked: 2,
        };
        let dump = render_dump(1, &Err(err));
        assert!(dump.contains(
            "StackTrace collection failed: Failed to get all 4 stacktraces within timeout. Got only 2\n"
        ));
        assert!(dump.contains("1) Stack traces - End\n"));
    }

    #[test]
    fn banners_bracket_the_body() {
        let dump = render_dump(1, &Ok(one_group()));
        assert!(dump.starts_with(STACK_DUMP_BEGIN_BANNER));
        assert!(dump.ends_with(&format!("{STACK_DUMP_END_BANNER}\n")));
    }
}
