// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack unwinding for the collection path.
//!
//! The in-thread trace handler receives the interrupted thread's register
//! state as a `ucontext_t` and must walk the stack from there, under
//! async-signal-safety constraints.  The `backtrace` crate only unwinds from
//! the current context, so the context path wraps libunwind directly: an
//! opaque cursor seeded from the delivered context, stepped one activation
//! record at a time.  Unwinding uses DWARF CFI / `.eh_frame`, so no frame
//! pointers are required.
//!
//! Frame sizes are not exposed by this unwinder; every frame is recorded with
//! size zero.  The [`ThreadStack`] schema keeps the size slot so a richer
//! unwinder could populate it without changing the layout.

use crate::collector::err_log;
use crate::shared::constants::MAX_STACK_DEPTH;
use crate::stack_info::ThreadStack;
use libc::ucontext_t;
use std::ffi::c_int;

/// Size of libunwind's `unw_cursor_t` (`UNW_TDEP_CURSOR_LEN == 127` words).
const UNW_CURSOR_SIZE: usize = 127;

/// Flag for `unw_init_local2`: the context comes from a signal frame.
const UNW_INIT_SIGNAL_FRAME: c_int = 1;

/// Opaque cursor matching libunwind's `unw_cursor_t`.
#[repr(C)]
struct UnwCursor {
    opaque: [u64; UNW_CURSOR_SIZE],
}

impl Default for UnwCursor {
    fn default() -> Self {
        Self {
            opaque: [0u64; UNW_CURSOR_SIZE],
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod ffi {
    use super::*;

    /// libunwind register number for RIP on x86_64.
    pub const REG_IP: c_int = 16;

    #[link(name = "unwind")]
    extern "C" {
        fn _ULx86_64_init_local2(
            cursor: *mut UnwCursor,
            context: *const ucontext_t,
            flags: c_int,
        ) -> c_int;
        fn _ULx86_64_step(cursor: *mut UnwCursor) -> c_int;
        fn _ULx86_64_get_reg(cursor: *const UnwCursor, reg: c_int, value: *mut u64) -> c_int;
    }

    #[inline]
    pub unsafe fn init_local(cursor: *mut UnwCursor, context: *const ucontext_t) -> c_int {
        _ULx86_64_init_local2(cursor, context, UNW_INIT_SIGNAL_FRAME)
    }

    #[inline]
    pub unsafe fn step(cursor: *mut UnwCursor) -> c_int {
        _ULx86_64_step(cursor)
    }

    #[inline]
    pub unsafe fn get_reg(cursor: *const UnwCursor, reg: c_int, value: *mut u64) -> c_int {
        _ULx86_64_get_reg(cursor, reg, value)
    }
}

#[cfg(target_arch = "aarch64")]
mod ffi {
    use super::*;

    /// libunwind register number for the PC on aarch64.
    pub const REG_IP: c_int = 30;

    #[link(name = "unwind")]
    extern "C" {
        fn _ULaarch64_init_local2(
            cursor: *mut UnwCursor,
            context: *const ucontext_t,
            flags: c_int,
        ) -> c_int;
        fn _ULaarch64_step(cursor: *mut UnwCursor) -> c_int;
        fn _ULaarch64_get_reg(cursor: *const UnwCursor, reg: c_int, value: *mut u64) -> c_int;
    }

    #[inline]
    pub unsafe fn init_local(cursor: *mut UnwCursor, context: *const ucontext_t) -> c_int {
        _ULaarch64_init_local2(cursor, context, UNW_INIT_SIGNAL_FRAME)
    }

    #[inline]
    pub unsafe fn step(cursor: *mut UnwCursor) -> c_int {
        _ULaarch64_step(cursor)
    }

    #[inline]
    pub unsafe fn get_reg(cursor: *const UnwCursor, reg: c_int, value: *mut u64) -> c_int {
        _ULaarch64_get_reg(cursor, reg, value)
    }
}

/// Walks the stack described by `ucontext` into `stack`, discarding the first
/// `skip_count` frames.
///
/// Async-signal-safe: libunwind's local-only stepping plus direct writes for
/// diagnostics.  On cursor-initialisation failure the stack is left empty;
/// the handler path has no other recourse than the diagnostic.
///
/// # Safety
///
/// `ucontext` must be null or point to a register context delivered by the
/// kernel at signal entry.
pub(crate) unsafe fn capture_from_ucontext(
    ucontext: *const ucontext_t,
    skip_count: usize,
    stack: &mut ThreadStack,
) {
    if ucontext.is_null() {
        err_log("StacktraceCollector: no machine context to unwind from\n");
        return;
    }

    let mut cursor = UnwCursor::default();
    if ffi::init_local(&mut cursor, ucontext) < 0 {
        err_log("StacktraceCollector: failed to initialize unwinding cursor\n");
        return;
    }

    let mut to_skip = skip_count;
    while to_skip > 0 && ffi::step(&mut cursor) > 0 {
        to_skip -= 1;
    }

    while stack.depth() < MAX_STACK_DEPTH && ffi::step(&mut cursor) > 0 {
        let mut ip: u64 = 0;
        if ffi::get_reg(&cursor, ffi::REG_IP, &mut ip) == 0 {
            stack.add_frame(0, ip);
        } else {
            err_log("StacktraceCollector: failed to read instruction pointer\n");
        }
    }
}

/// Captures the current thread's stack into `stack`, discarding the first
/// `skip_count` frames.  Not async-signal-safe; meant for ordinary code that
/// wants its own trace.
pub fn capture_current(stack: &mut ThreadStack, skip_count: usize) {
    let mut skipped = 0;
    backtrace::trace(|frame| {
        if skipped < skip_count {
            skipped += 1;
            return true;
        }
        stack.add_frame(0, frame.ip() as usize as u64)
    });
}
