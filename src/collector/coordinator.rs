// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synchronous multi-thread stack collection.
//!
//! The coordinator enumerates live threads, queues the internal realtime
//! signal at each one with a pointer payload, and waits on a self-pipe for
//! one acknowledgement byte per signalled thread, bounded by a one-shot
//! timerfd.  Identical traces are grouped before returning.
//!
//! ## Payload lifetime
//!
//! Each target thread gets a [`TraceSlot`] allocated with `Box::into_raw`;
//! the raw pointer rides in the signal's `sigval` and the handler writes
//! through it.  Slots are reclaimed with `Box::from_raw` only once every ack
//! has been read; the ack read happens-before the coordinator's read of that
//! slot's stack.  If the deadline fires first, the slots are intentionally
//! leaked: a straggler handler may still dereference its pointer at any
//! point, and freed memory there would be a use-after-free in signal context.

use crate::collector::threads::list_threads;
use crate::shared::configuration::CollectorConfiguration;
use crate::stack_info::{CollectionResult, ThreadStack};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::collections::BTreeSet;
use std::ffi::{c_int, c_void};
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use thiserror::Error;

/// Payload handed to one target thread: the stack buffer its handler fills
/// and the pipe end it acks on.  Only the target thread's handler writes the
/// stack; the coordinator reads it only after seeing that thread's ack.
#[repr(C)]
pub(crate) struct TraceSlot {
    ack_fd: RawFd,
    stack: ThreadStack,
}

impl TraceSlot {
    pub(crate) fn new(tid: libc::pid_t, ack_fd: RawFd) -> Self {
        Self {
            ack_fd,
            stack: ThreadStack::new(tid),
        }
    }

    pub(crate) fn stack(&self) -> &ThreadStack {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut ThreadStack {
        &mut self.stack
    }

    /// Writes the one-byte completion ack.  Async-signal-safe.
    pub(crate) fn submit(&self) -> bool {
        let ack: u8 = b'y'; // value is irrelevant, arrival is the signal
        // Safety: plain write on a borrowed descriptor.
        let written =
            unsafe { libc::write(self.ack_fd, &ack as *const u8 as *const c_void, 1) };
        written == 1
    }
}

#[derive(Debug, Eq, PartialEq, Error)]
pub enum CollectError {
    #[error("Failed to list threads: {0}")]
    ListThreads(i32),
    #[error("Failed to create ack pipe: {0}")]
    CreateAckPipe(nix::Error),
    #[error("Failed to create collection timer: {0}")]
    CreateTimer(nix::Error),
    #[error("Failed to arm collection timer: {0}")]
    ArmTimer(nix::Error),
    #[error("Failed to get all {expected} stacktraces within timeout. Got only {acked}")]
    DeadlineExceeded { expected: usize, acked: usize },
}

/// Layout of the fields `rt_tgsigqueueinfo` reads out of the `_rt` member of
/// the kernel's siginfo union.  On LP64 the union starts at offset 16, which
/// the explicit pad reproduces.
#[repr(C)]
struct RawRtSigInfo {
    si_signo: c_int,
    si_errno: c_int,
    si_code: c_int,
    _pad: c_int,
    si_pid: libc::pid_t,
    si_uid: libc::uid_t,
    si_value: libc::sigval,
}

/// Queues `signum` at exactly thread `(pid, tid)` with a pointer payload.
///
/// `sigqueue()` lets the kernel pick any thread of the process, so the
/// per-thread `rt_tgsigqueueinfo` syscall is used instead, with a siginfo
/// assembled the way `pthread_sigqueue()` assembles one.  Fails with `ESRCH`
/// when the thread died after enumeration.
fn queue_trace_signal(
    pid: libc::pid_t,
    tid: libc::pid_t,
    uid: libc::uid_t,
    signum: c_int,
    payload: *mut TraceSlot,
) -> io::Result<()> {
    // Safety: zeroed siginfo_t is a valid starting point; the overlay struct
    // matches the kernel layout for SI_QUEUE on 64-bit targets.
    let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
    let raw = &mut info as *mut libc::siginfo_t as *mut RawRtSigInfo;
    unsafe {
        (*raw).si_signo = signum;
        (*raw).si_code = libc::SI_QUEUE;
        (*raw).si_pid = pid;
        (*raw).si_uid = uid;
        (*raw).si_value = libc::sigval {
            sival_ptr: payload as *mut c_void,
        };
    }
    // Safety: info outlives the call; the kernel copies it.
    let ret = unsafe { libc::syscall(libc::SYS_rt_tgsigqueueinfo, pid, tid, signum, &info) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn set_nonblocking(fd: RawFd) {
    // Safety: fcntl on an owned descriptor.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

type ThreadSource = Box<dyn Fn() -> io::Result<Vec<libc::pid_t>> + Send + Sync>;

/// Collects one synchronous stack trace per live thread of this process.
///
/// [`crate::install_internal_handler`] must have been called first, or the
/// delivered signals will terminate the process (realtime signals default to
/// `Term`).
pub struct StackTraceCollector {
    config: CollectorConfiguration,
    thread_source: ThreadSource,
}

impl StackTraceCollector {
    pub fn new(config: CollectorConfiguration) -> Self {
        Self {
            config,
            thread_source: Box::new(list_threads),
        }
    }

    /// Replaces the thread enumeration source.  The default reads
    /// `/proc/self/task`; tests substitute synthetic tid sets.
    pub fn with_thread_source(
        mut self,
        source: impl Fn() -> io::Result<Vec<libc::pid_t>> + Send + Sync + 'static,
    ) -> Self {
        self.thread_source = Box::new(source);
        self
    }

    /// Runs one collection: signal every live thread, wait for acks, group
    /// identical traces.
    ///
    /// Threads that die between enumeration and signalling are skipped
    /// silently.  If not every signalled thread acks before the deadline, the
    /// call returns [`CollectError::DeadlineExceeded`] with no results, and
    /// the payload slots stay allocated for the life of the process (see the
    /// module docs).
    pub fn collect(&self) -> Result<Vec<CollectionResult>, CollectError> {
        let init_tids: BTreeSet<libc::pid_t> = (self.thread_source)()
            .map_err(|e| CollectError::ListThreads(e.raw_os_error().unwrap_or(0)))?
            .into_iter()
            .collect();

        let (ack_rx, ack_tx) = nix::unistd::pipe().map_err(CollectError::CreateAckPipe)?;

        // Safety: getpid/getuid have no preconditions.
        let pid = unsafe { libc::getpid() };
        let uid = unsafe { libc::getuid() };

        let mut slots: Vec<*mut TraceSlot> = Vec::with_capacity(init_tids.len());
        for &tid in &init_tids {
            let slot = Box::into_raw(Box::new(TraceSlot::new(tid, ack_tx.as_raw_fd())));
            match queue_trace_signal(pid, tid, uid, crate::internal_signum(), slot) {
                Ok(()) => slots.push(slot),
                Err(e) => {
                    // The thread died after enumeration; nothing was queued,
                    // so the slot can be reclaimed right away.
                    eprintln!("Unable to signal thread {tid}: {e}");
                    // Safety: this pointer came from Box::into_raw above and
                    // was never published.
                    drop(unsafe { Box::from_raw(slot) });
                }
            }
        }
        let expected = slots.len();

        let timer = TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_CLOEXEC)
            .map_err(CollectError::CreateTimer)?;
        timer
            .set(
                Expiration::OneShot(TimeSpec::from_duration(self.config.deadline())),
                TimerSetTimeFlags::empty(),
            )
            .map_err(CollectError::ArmTimer)?;

        let mut acked = 0usize;
        while acked < expected {
            // A readable pipe that blocks anyway on read has been observed in
            // exceptional cases; the read below must not hang the process.
            set_nonblocking(ack_rx.as_raw_fd());

            let mut fds = [
                libc::pollfd {
                    fd: ack_rx.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: timer.as_fd().as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // Safety: fds outlives the call.
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ready == -1 {
                match io::Error::last_os_error().raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    errno => {
                        eprintln!("poll on ack pipe failed ({errno:?}), will try again");
                        continue;
                    }
                }
            }
            if ready == 0 {
                // Unreachable with an infinite poll timeout.
                eprintln!("No file descriptors ready, will try again");
                continue;
            }
            if fds[1].revents & libc::POLLIN != 0 {
                eprintln!(
                    "Failed to get all {expected} stacktrace acks within timeout. Got only {acked}"
                );
                // The slot pointers in `slots` are dropped without reclaiming
                // the allocations: a straggler handler may fire after this
                // return and write through its pointer.
                return Err(CollectError::DeadlineExceeded { expected, acked });
            }
            if fds[0].revents & libc::POLLIN != 0 {
                let mut byte = 0u8;
                // Safety: one-byte read into a stack buffer.
                let n = unsafe {
                    libc::read(ack_rx.as_raw_fd(), &mut byte as *mut u8 as *mut c_void, 1)
                };
                match n {
                    1 => acked += 1,
                    0 => eprintln!("Ack pipe closed unexpectedly"),
                    _ => {
                        let e = io::Error::last_os_error();
                        if e.raw_os_error() != Some(libc::EAGAIN) {
                            eprintln!("Failed to read from ack pipe: {e}");
                        }
                    }
                }
            }
        }

        // Every handler has acked; the pipe reads above order those writes
        // before these reads, so the stacks are safe to copy out.
        let stacks = slots.iter().map(|&slot| unsafe { *(*slot).stack() });
        let results = group_by_trace(stacks);

        for slot in slots {
            // Safety: all acks are in, no handler still holds this pointer.
            drop(unsafe { Box::from_raw(slot) });
        }
        Ok(results)
    }
}

/// Partitions stacks into equivalence classes of identical traces, in
/// first-seen order, with tids sorted inside each group.
fn group_by_trace(stacks: impl Iterator<Item = ThreadStack>) -> Vec<CollectionResult> {
    let mut results: Vec<CollectionResult> = Vec::new();
    for stack in stacks {
        match results.iter_mut().find(|r| r.trace.same_trace(&stack)) {
            Some(group) => group.tids.push(stack.tid),
            None => results.push(CollectionResult {
                trace: stack,
                tids: vec![stack.tid],
            }),
        }
    }
    for group in &mut results {
        group.tids.sort_unstable();
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with(tid: libc::pid_t, addresses: &[u64]) -> ThreadStack {
        let mut stack = ThreadStack::new(tid);
        for &address in addresses {
            stack.add_frame(0, address);
        }
        stack
    }

    #[test]
    fn grouping_collapses_identical_traces() {
        let stacks = vec![
            stack_with(30, &[0x1000, 0x2000]),
            stack_with(10, &[0x1000, 0x2000]),
            stack_with(20, &[0x3000]),
        ];
        let results = group_by_trace(stacks.into_iter());

        assert_eq!(results.len(), 2);
        // First-seen order, tids sorted within the group.
        assert_eq!(results[0].tids, vec![10, 30]);
        assert_eq!(results[0].trace.depth(), 2);
        assert_eq!(results[1].tids, vec![20]);
    }

    #[test]
    fn grouping_assigns_every_tid_exactly_once() {
        let stacks = vec![
            stack_with(1, &[0x1]),
            stack_with(2, &[0x2]),
            stack_with(3, &[0x1]),
            stack_with(4, &[0x3]),
        ];
        let results = group_by_trace(stacks.into_iter());

        let mut all: Vec<_> = results.iter().flat_map(|r| r.tids.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3, 4]);
    }

    #[test]
    fn deadline_error_message_is_quantified() {
        let err = CollectError::DeadlineExceeded {
            expected: 2,
            acked: 1,
        };
        assert_eq!(
            err.to_string(),
            "Failed to get all 2 stacktraces within timeout. Got only 1"
        );
    }

    #[test]
    fn signalling_a_dead_thread_fails_with_esrch() {
        // tid values near pid_t max are essentially never live.
        let pid = unsafe { libc::getpid() };
        let uid = unsafe { libc::getuid() };
        let err = queue_trace_signal(pid, i32::MAX - 1, uid, crate::internal_signum(), std::ptr::null_mut())
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }
}
