// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encoding of a finished transaction into the txndata message sent to the daemon.
//!
//! Large children come first so they end up at the back of the buffer, next to each other: the
//! trace, then the event vectors, slow queries, errors and metrics, and finally the small
//! strings and the transaction table itself.

use crate::flatbuffer::{Builder, UOffset};
use crate::schema::{error, event, message, metric, slowsql, trace, txn, DataType};
use libapm_common::time::{Micros, US_PER_SEC};
use libapm_core::events::{AnalyticsEvent, Reservoir};
use libapm_core::{MetricData, MetricTable, Transaction};
use tracing::debug;

const UNKNOWN_URI: &str = "<unknown>";

fn seconds(us: Micros) -> f64 {
    us as f64 / US_PER_SEC as f64
}

fn prepend_event(fb: &mut Builder, json: &str) -> UOffset {
    let data = fb.create_string(json);
    fb.object_begin(event::NUM_FIELDS);
    fb.object_prepend_uoffset(event::DATA, data);
    fb.object_end()
}

fn prepend_events<'a>(
    fb: &mut Builder,
    events: impl Iterator<Item = &'a AnalyticsEvent>,
) -> UOffset {
    let offsets: Vec<UOffset> = events.map(|e| prepend_event(fb, e.json())).collect();
    if offsets.is_empty() {
        return 0;
    }
    fb.create_offset_vector(&offsets)
}

fn prepend_reservoir(fb: &mut Builder, reservoir: &Reservoir<AnalyticsEvent>) -> UOffset {
    prepend_events(fb, reservoir.iter())
}

fn prepend_trace(fb: &mut Builder, txn: &Transaction) -> UOffset {
    let Some(output) = txn.trace() else {
        return 0;
    };
    let data = fb.create_string(&output.json);
    let guid = fb.create_string(&output.guid);
    fb.object_begin(trace::NUM_FIELDS);
    fb.object_prepend_uoffset(trace::DATA, data);
    fb.object_prepend_uoffset(trace::GUID, guid);
    fb.object_prepend_bool(trace::FORCE_PERSIST, output.force_persist, false);
    fb.object_prepend_f64(trace::DURATION, output.duration_ms, 0.0);
    fb.object_prepend_f64(trace::TIMESTAMP, output.timestamp_ms, 0.0);
    fb.object_end()
}

fn prepend_slow_sqls(fb: &mut Builder, txn: &Transaction) -> UOffset {
    let mut offsets = Vec::with_capacity(txn.slow_sqls().saved());
    for slow in txn.slow_sqls().iter() {
        let params = fb.create_string(&slow.params_json);
        let query = fb.create_string(&slow.query);
        let metric = fb.create_string(&slow.metric);
        fb.object_begin(slowsql::NUM_FIELDS);
        fb.object_prepend_uoffset(slowsql::PARAMS, params);
        fb.object_prepend_uoffset(slowsql::QUERY, query);
        fb.object_prepend_uoffset(slowsql::METRIC, metric);
        fb.object_prepend_u64(slowsql::MAX_MICROS, slow.max, 0);
        fb.object_prepend_u64(slowsql::MIN_MICROS, slow.min, 0);
        fb.object_prepend_u64(slowsql::TOTAL_MICROS, slow.total, 0);
        fb.object_prepend_i32(slowsql::COUNT, slow.count, 0);
        fb.object_prepend_u32(slowsql::ID, slow.id, 0);
        offsets.push(fb.object_end());
    }
    if offsets.is_empty() {
        return 0;
    }
    fb.create_offset_vector(&offsets)
}

/// The single error a transaction keeps, as a one element vector.
fn prepend_errors(fb: &mut Builder, txn: &Transaction) -> UOffset {
    let (Some(err), Some(json)) = (txn.error(), txn.error_json()) else {
        return 0;
    };
    let data = fb.create_string(json);
    fb.object_begin(error::NUM_FIELDS);
    fb.object_prepend_uoffset(error::DATA, data);
    fb.object_prepend_i32(error::PRIORITY, err.priority, 0);
    let offset = fb.object_end();
    fb.create_offset_vector(&[offset])
}

/// Writes the 56 byte metric data struct and returns its offset: six f64 values, then the scoped
/// and forced flags and six bytes of padding.
fn prepend_metric_data(fb: &mut Builder, data: &MetricData, scoped: bool, forced: bool) -> UOffset {
    fb.prep(8, 56);
    fb.pad(6);
    fb.place_u8(forced as u8);
    fb.place_u8(scoped as u8);
    let values = match *data {
        MetricData::Plain {
            count,
            total,
            exclusive,
            min,
            max,
            sum_squares,
        } => [
            count as f64,
            seconds(total),
            seconds(exclusive),
            seconds(min),
            seconds(max),
            sum_squares / (US_PER_SEC as f64 * US_PER_SEC as f64),
        ],
        MetricData::Apdex {
            satisfying,
            tolerating,
            failing,
            min,
            max,
        } => [
            satisfying as f64,
            tolerating as f64,
            failing as f64,
            seconds(min),
            seconds(max),
            0.0,
        ],
    };
    for value in values.iter().rev() {
        fb.place_f64(*value);
    }
    fb.offset()
}

/// Encodes every metric of `tables`, in order, into one vector.
fn prepend_metrics(fb: &mut Builder, tables: &[(bool, &MetricTable)]) -> UOffset {
    let mut offsets = Vec::new();
    for (scoped, table) in tables {
        for (name, m) in table.iter() {
            let name = fb.create_string(name);
            fb.object_begin(metric::NUM_FIELDS);
            fb.object_prepend_uoffset(metric::NAME, name);
            let data = prepend_metric_data(fb, m.data(), *scoped, m.is_forced());
            fb.object_prepend_struct(metric::DATA, data);
            offsets.push(fb.object_end());
        }
    }
    if offsets.is_empty() {
        return 0;
    }
    fb.create_offset_vector(&offsets)
}

fn prepend_transaction(fb: &mut Builder, t: &Transaction) -> UOffset {
    let trace = prepend_trace(fb, t);
    let span_events = prepend_reservoir(fb, t.span_events());
    let error_events = prepend_events(fb, t.error_event().into_iter());
    let custom_events = prepend_reservoir(fb, t.custom_events());
    let slow_sqls = prepend_slow_sqls(fb, t);
    let errors = prepend_errors(fb, t);
    let metrics = prepend_metrics(
        fb,
        &[(false, t.unscoped_metrics()), (true, t.scoped_metrics())],
    );
    let txn_event = match t.txn_event() {
        Some(e) => prepend_event(fb, e.json()),
        None => 0,
    };
    let synthetics = match t.synthetics_resource_id() {
        Some(id) => fb.create_string(id),
        None => 0,
    };
    let uri = fb.create_string(t.request_uri().unwrap_or(UNKNOWN_URI));
    let name = fb.create_string(t.name().unwrap_or_default());

    fb.object_begin(txn::NUM_FIELDS);
    fb.object_prepend_f64(txn::SAMPLING_PRIORITY, t.priority(), 0.0);
    fb.object_prepend_uoffset(txn::ERROR_EVENTS, error_events);
    fb.object_prepend_uoffset(txn::TRACE, trace);
    fb.object_prepend_uoffset(txn::CUSTOM_EVENTS, custom_events);
    fb.object_prepend_uoffset(txn::SLOW_SQLS, slow_sqls);
    fb.object_prepend_uoffset(txn::ERRORS, errors);
    fb.object_prepend_uoffset(txn::METRICS, metrics);
    fb.object_prepend_uoffset(txn::TXN_EVENT, txn_event);
    fb.object_prepend_i32(txn::PID, t.pid(), 0);
    fb.object_prepend_uoffset(txn::SYNTHETICS_RESOURCE_ID, synthetics);
    fb.object_prepend_uoffset(txn::URI, uri);
    fb.object_prepend_uoffset(txn::NAME, name);
    fb.object_prepend_uoffset(txn::SPAN_EVENTS, span_events);
    fb.object_end()
}

/// Encodes an ended transaction.
pub fn encode_txndata(t: &Transaction) -> Vec<u8> {
    let mut fb = Builder::default();
    let data = prepend_transaction(&mut fb, t);
    let run_id = fb.create_string(t.agent_run_id());

    fb.object_begin(message::NUM_FIELDS);
    fb.object_prepend_uoffset(message::DATA, data);
    fb.object_prepend_u8(message::DATA_TYPE, DataType::Txn as u8, DataType::None as u8);
    fb.object_prepend_uoffset(message::AGENT_RUN_ID, run_id);
    let msg = fb.object_end();
    let buf = fb.finish(msg);

    debug!(
        name = t.name().unwrap_or("unknown"),
        run_id = t.agent_run_id(),
        duration_us = t.duration(),
        priority = t.priority(),
        size = buf.len(),
        "encoded txndata"
    );
    buf
}
