// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::collector::internal_handler::handle_trace_request;
use crate::collector::service_thread::{handle_dump_request, service_state};
use libc::{c_int, c_void, siginfo_t};
use std::io;
use std::mem;
use std::ptr;

/// Signal the coordinator queues at each target thread, with a payload
/// pointer.  First realtime signal: guaranteed queued, never merged.
pub fn internal_signum() -> c_int {
    libc::SIGRTMIN()
}

/// Signal an outside agent sends to request a full dump to stderr.
pub fn external_signum() -> c_int {
    libc::SIGRTMIN() + 1
}

// Realtime signal numbers are resolved at runtime (SIGRTMIN is a libc call),
// so they cannot go through `nix`'s `Signal` enum; the registration uses
// `libc::sigaction` directly.
fn register(
    signum: c_int,
    handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
) -> anyhow::Result<()> {
    // Safety: zeroed sigaction is a valid starting point on Linux.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler as usize;
    // SA_RESTART so supported syscalls resume if interrupted by a collection
    // signal; SA_SIGINFO for the sigval payload.
    action.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    // Safety: action.sa_mask is a plain sigset_t.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // Safety: handler stays valid for the life of the process.
    let ret = unsafe { libc::sigaction(signum, &action, ptr::null_mut()) };
    anyhow::ensure!(
        ret == 0,
        "sigaction({signum}) failed: {}",
        io::Error::last_os_error()
    );
    Ok(())
}

/// Registers the in-thread trace handler for [`internal_signum`].
/// Idempotent.  Does not touch the signal mask; unblocking is the caller's
/// business.
pub fn install_internal_handler() -> anyhow::Result<()> {
    register(internal_signum(), handle_trace_request)
}

/// Registers the external-dump handler for [`external_signum`], starting the
/// dump service thread on first use.  Idempotent.  Does not touch the signal
/// mask.
pub fn install_external_handler() -> anyhow::Result<()> {
    let state = service_state();
    anyhow::ensure!(
        state.request_fd >= 0,
        "stack dump service thread failed to start"
    );
    register(external_signum(), handle_dump_request)
}
