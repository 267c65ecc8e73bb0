// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::MutexExt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A time gate for repetitive log lines.
///
/// The gate opens at most once per `period`, however many callers hit it in between.
#[derive(Debug)]
pub struct LogGate {
    period: Duration,
    last_open: Mutex<Option<Instant>>,
}

impl LogGate {
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            last_open: Mutex::new(None),
        }
    }

    /// Returns true if the caller may log at `now`, and arms the gate for another period.
    pub fn try_open(&self, now: Instant) -> bool {
        let mut last_open = self.last_open.lock_or_panic();
        match *last_open {
            Some(last) if now.saturating_duration_since(last) < self.period => false,
            _ => {
                *last_open = Some(now);
                true
            }
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
