// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::c_void;

/// Rendered in place of a symbol name when resolution fails.
pub const UNKNOWN_SYMBOL: &str = "(unknown)";

fn resolve_symbol(address: u64) -> Option<String> {
    let mut name = None;
    backtrace::resolve(address as usize as *mut c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name
}

/// Best-effort synchronous address-to-symbol resolution.
///
/// A captured instruction pointer is usually the return address, one byte past
/// the call instruction of the frame below, so when the address itself does
/// not resolve we retry at `address - 1` before giving up.
pub fn symbolize(address: u64) -> Option<String> {
    resolve_symbol(address).or_else(|| resolve_symbol(address.wrapping_sub(1)))
}
