// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants shared between the collection path and the external dump path.

/// Maximum number of frames recorded for a single thread.  Deeper stacks are
/// truncated; the buffer behind this bound lives inline in [`crate::ThreadStack`]
/// so a signal handler can fill it without allocating.
pub const MAX_STACK_DEPTH: usize = 100;

/// Default per-collection deadline, in seconds.
pub const DEFAULT_DEADLINE_SECONDS: u64 = 5;

/// Banner printed above a dump emitted by the external-signal service thread.
pub const STACK_DUMP_BEGIN_BANNER: &str = "=============================================";

/// Banner printed below a dump emitted by the external-signal service thread.
pub const STACK_DUMP_END_BANNER: &str = "============================================";
