// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This crate captures synchronous stack traces for every live thread of the
//! running process, from inside that process, groups identical traces, and
//! renders them as human-readable text.
//!
//! Architecturally it consists of three parts:
//! 1. An in-thread trace handler, registered for the first realtime signal.
//!    The coordinator queues that signal at each target thread with a pointer
//!    payload; the handler runs on the interrupted thread's own stack, under
//!    the async-signal-safety rules of
//!    <https://man7.org/linux/man-pages/man7/signal-safety.7.html>, unwinds
//!    from the delivered machine context into the payload's frame buffer, and
//!    acknowledges over a pipe with a single byte.
//! 2. A coordinator ([`StackTraceCollector`]) that enumerates the process's
//!    threads, signals each one, and performs a bounded wait for the
//!    acknowledgements, tolerating threads that die in between.  Identical
//!    traces collapse into one [`CollectionResult`] listing every thread that
//!    shares them.
//! 3. A self-service dump path: an external agent (an operator running
//!    `kill`, a watchdog) raises the second realtime signal, and a dedicated
//!    service thread runs the collection and prints the framed result to
//!    stderr.  The signal handler itself only forwards the request over a
//!    pipe, because collection allocates, locks, and blocks, all of which are
//!    off-limits in signal context.
//!
//! ```no_run
//! use stacktracker::{CollectorConfiguration, StackTraceCollector};
//!
//! stacktracker::install_internal_handler()?;
//! let collector = StackTraceCollector::new(CollectorConfiguration::default());
//! for group in collector.collect()? {
//!     println!("{:?} share a stack of depth {}", group.tids, group.trace.depth());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod collector;
mod shared;
mod stack_info;

pub use collector::{
    capture_current, external_signum, gettid, install_external_handler, install_internal_handler,
    internal_signum, list_threads, CollectError, StackTraceCollector,
};
pub use shared::configuration::CollectorConfiguration;
pub use shared::constants::MAX_STACK_DEPTH;
pub use stack_info::{
    pretty_print_stack, render_results, render_to_string, symbolize, CollectionResult, Frame,
    ThreadStack,
};
