// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

mod coordinator;
mod internal_handler;
mod service_thread;
mod signal_handler_manager;
mod threads;
mod unwinder;

pub use coordinator::{CollectError, StackTraceCollector};
pub use signal_handler_manager::{
    external_signum, install_external_handler, install_internal_handler, internal_signum,
};
pub use threads::{gettid, list_threads};
pub use unwinder::capture_current;

use std::ffi::c_void;

/// Writes a preformatted diagnostic straight to stderr.  The only logging
/// primitive allowed in signal context: no allocation, no formatting, no
/// locks.
pub(crate) fn err_log(msg: &str) {
    // Safety: plain write of a static message.
    let _ = unsafe { libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const c_void, msg.len()) };
}
