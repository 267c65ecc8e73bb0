// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time in the agent is kept as whole microseconds since the unix epoch. Durations use the same
//! unit, which keeps metric arithmetic exact until values are converted for the wire.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the unix epoch, or a duration in microseconds.
pub type Micros = u64;

pub const US_PER_MS: u64 = 1_000;
pub const US_PER_SEC: u64 = 1_000_000;

pub fn now_us() -> Micros {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[inline]
pub fn as_secs_f64(us: Micros) -> f64 {
    us as f64 / US_PER_SEC as f64
}

#[inline]
pub fn as_millis_f64(us: Micros) -> f64 {
    us as f64 / US_PER_MS as f64
}

/// Converts a millisecond value to microseconds, rejecting NaN, infinities and negatives.
pub fn millis_f64_to_us(ms: f64) -> Option<Micros> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some((ms * US_PER_MS as f64) as Micros)
}
