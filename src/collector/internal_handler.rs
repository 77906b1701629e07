// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The in-thread trace handler.
//!
//! Runs on the interrupted thread's stack when the coordinator queues the
//! internal realtime signal at it.  Everything here must be async-signal-safe
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>: the handler
//! walks its own stack via libunwind's local stepping, writes frames into the
//! coordinator-owned payload, and acks with a single `write`.  No allocation,
//! no locks, no formatted output; diagnostics are string literals pushed
//! straight at stderr.

use crate::collector::coordinator::TraceSlot;
use crate::collector::err_log;
use crate::collector::unwinder::capture_from_ucontext;
use libc::{c_int, c_void, siginfo_t, ucontext_t};

pub(crate) extern "C" fn handle_trace_request(
    _signum: c_int,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    if sig_info.is_null() {
        return;
    }

    // The collection signal normally comes from this process's coordinator,
    // but anyone with the right credentials can queue it from outside (e.g.
    // `kill`).  An outsider's sigval is not a pointer we own, so it must not
    // be dereferenced.
    // Safety: the kernel filled sig_info for a queued signal.
    let sender = unsafe { (*sig_info).si_pid() };
    // Safety: getpid is async-signal-safe.
    if sender != unsafe { libc::getpid() } {
        err_log("Ignoring stacktrace signal sent from an outsider pid\n");
        return;
    }

    // Safety: si_value is valid for SI_QUEUE signals.
    let slot = unsafe { (*sig_info).si_value() }.sival_ptr as *mut TraceSlot;
    if slot.is_null() {
        err_log("Stacktrace signal carried no payload, ignoring\n");
        return;
    }

    // Safety: the coordinator keeps the slot alive until it has seen this
    // thread's ack (or forever, after a timeout); only this handler writes it.
    let slot = unsafe { &mut *slot };
    // Safety: ucontext is the machine context the kernel delivered.
    unsafe { capture_from_ucontext(ucontext as *const ucontext_t, 0, slot.stack_mut()) };

    if !slot.submit() {
        err_log("Failed to ack stacktrace request\n");
    }
}
