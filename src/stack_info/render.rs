// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::stack_info::stacktrace::{CollectionResult, ThreadStack};

// Two characters per byte of pointer, plus two for the leading "0x".
const POINTER_FIELD_WIDTH: usize = 2 + 2 * std::mem::size_of::<*const ()>();

/// Renders one trace, one line per frame.  The innermost frame carries the
/// `PC:` prefix, the rest are indented to line up under it.
pub fn pretty_print_stack(stack: &ThreadStack, writer: &mut dyn FnMut(&str)) {
    let width = POINTER_FIELD_WIDTH;
    stack.visit_with_symbol(&mut |i, frame, symbol| {
        let prefix = if i == 0 { "PC: " } else { "    " };
        let address = format!("{:#x}", frame.address);
        let line = if frame.size <= 0 {
            format!("{prefix}@ {address:>width$}  (unknown)  {symbol}\n")
        } else {
            let size = frame.size;
            format!("{prefix}@ {address:>width$}  {size:>9}  {symbol}\n")
        };
        writer(&line);
    });
}

/// Renders a list of groups in the order the coordinator produced them.
/// Each group gets a `Threads:` line, a `Stack trace:` line, its frame lines,
/// and a trailing blank line.
pub fn render_results(results: &[CollectionResult], writer: &mut dyn FnMut(&str)) {
    for group in results {
        if group.tids.is_empty() {
            writer("No Threads\n");
            continue;
        }
        let tids = group
            .tids
            .iter()
            .map(|tid| tid.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writer(&format!("Threads: {tids}\n"));
        writer("Stack trace:\n");
        pretty_print_stack(&group.trace, writer);
        writer("\n");
    }
}

pub fn render_to_string(results: &[CollectionResult]) -> String {
    let mut out = String::new();
    render_results(results, &mut |s| out.push_str(s));
    out
}
