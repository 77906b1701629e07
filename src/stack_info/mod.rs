// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod render;
mod stacktrace;
mod symbolizer;

pub use render::{pretty_print_stack, render_results, render_to_string};
pub use stacktrace::{CollectionResult, Frame, ThreadStack};
pub use symbolizer::{symbolize, UNKNOWN_SYMBOL};
