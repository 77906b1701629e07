// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::DEFAULT_DEADLINE_SECONDS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Collection happens while target threads are stopped inside a signal
/// handler, so the coordinator bounds its wait for acknowledgements.  A thread
/// that never acks (blocked signal, died mid-delivery with the ack lost) would
/// otherwise hang the caller forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfiguration {
    deadline_seconds: u64,
}

impl CollectorConfiguration {
    pub fn new(deadline_seconds: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            deadline_seconds >= 1,
            "Collection deadline must be at least one second"
        );
        Ok(Self { deadline_seconds })
    }

    pub fn deadline_seconds(&self) -> u64 {
        self.deadline_seconds
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }
}

impl Default for CollectorConfiguration {
    fn default() -> Self {
        Self {
            deadline_seconds: DEFAULT_DEADLINE_SECONDS,
        }
    }
}
