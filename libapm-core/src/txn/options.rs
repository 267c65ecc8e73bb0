// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::trace::DEFAULT_MAX_TRACE_SEGMENTS;
use libapm_common::time::{Micros, US_PER_MS};

pub const DEFAULT_SPAN_EVENTS_MAX: usize = 1000;
pub const DEFAULT_CUSTOM_EVENTS_MAX: usize = 10_000;
pub const DEFAULT_SLOWSQL_THRESHOLD: Micros = 500 * US_PER_MS;
pub const DEFAULT_SAMPLING_RATIO: f64 = 0.1;

/// Per transaction switches, fixed when the transaction begins.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnOptions {
    pub analytics_events_enabled: bool,
    pub error_events_enabled: bool,
    pub custom_events_enabled: bool,
    pub custom_events_max: usize,
    pub tt_enabled: bool,
    /// Derive the trace threshold from apdex: a trace is kept once the transaction is failing.
    pub tt_is_apdex_f: bool,
    pub tt_threshold: Micros,
    pub max_trace_segments: usize,
    pub slowsql_enabled: bool,
    pub slowsql_threshold: Micros,
    pub distributed_tracing_enabled: bool,
    pub span_events_enabled: bool,
    pub span_events_max: usize,
    /// Fraction of transactions marked as sampled.
    pub sampling_ratio: f64,
    pub high_security: bool,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self {
            analytics_events_enabled: true,
            error_events_enabled: true,
            custom_events_enabled: true,
            custom_events_max: DEFAULT_CUSTOM_EVENTS_MAX,
            tt_enabled: true,
            tt_is_apdex_f: true,
            tt_threshold: 0,
            max_trace_segments: DEFAULT_MAX_TRACE_SEGMENTS,
            slowsql_enabled: true,
            slowsql_threshold: DEFAULT_SLOWSQL_THRESHOLD,
            distributed_tracing_enabled: false,
            span_events_enabled: true,
            span_events_max: DEFAULT_SPAN_EVENTS_MAX,
            sampling_ratio: DEFAULT_SAMPLING_RATIO,
            high_security: false,
        }
    }
}
