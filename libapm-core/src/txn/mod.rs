// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single monitored request or background job.
//!
//! A [`Transaction`] owns its segment tree, its scoped and unscoped metric tables, the single
//! highest priority error and the events it produced. Once [`Transaction::end`] returns true the
//! transaction only exposes read accessors, which the wire encoder uses to build the txndata
//! message.

mod events;
mod naming;
mod options;
mod segments;

pub use naming::{OverwritePolicy, PathType};
pub use options::{
    TxnOptions, DEFAULT_CUSTOM_EVENTS_MAX, DEFAULT_SAMPLING_RATIO, DEFAULT_SLOWSQL_THRESHOLD,
    DEFAULT_SPAN_EVENTS_MAX,
};

use crate::app::{AppRules, AppState, Application};
use crate::attributes::{AttributeValue, Attributes, Destination};
use crate::error::{TxnError, HIGH_SECURITY_MESSAGE};
use crate::events::{AnalyticsEvent, Reservoir};
use crate::metrics::MetricTable;
use crate::segment::{SegmentTree, ROOT};
use crate::slowsql::SlowSqls;
use libapm_common::time::{self, Micros};
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::debug;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

static CUSTOM_EVENT_TYPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9:_ ]+$").ok());

const BACKGROUND_CHANGE_PREVENTED: &str = "Supportability/background_status_change_prevented";
const QUEUE_TIME_METRIC: &str = "WebFrontend/QueueTime";

pub(crate) fn new_guid() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

#[derive(Debug, Clone, Copy, Default)]
struct TxnStatus {
    recording: bool,
    ignore: bool,
    ended: bool,
}

/// The transaction trace attached to a txndata message.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutput {
    /// Transaction start in milliseconds since the epoch.
    pub timestamp_ms: f64,
    pub duration_ms: f64,
    pub guid: String,
    pub force_persist: bool,
    pub json: String,
}

#[derive(Debug)]
pub struct Transaction {
    id: u64,
    guid: String,
    trace_id: String,
    agent_run_id: String,
    options: TxnOptions,
    rules: Arc<AppRules>,
    connect_reply: Option<Arc<Value>>,
    apdex_t: Micros,
    tt_threshold: Micros,
    priority: f64,
    sampled: bool,
    pid: i32,

    status: TxnStatus,
    background: bool,
    path: Option<String>,
    path_type: PathType,
    name: Option<String>,
    request_uri: Option<String>,
    synthetics_resource_id: Option<String>,

    tree: SegmentTree,
    scoped: MetricTable,
    unscoped: MetricTable,
    attributes: Attributes,
    error: Option<TxnError>,
    slow_sqls: SlowSqls,
    custom_events: Reservoir<AnalyticsEvent>,
    span_events: Reservoir<AnalyticsEvent>,

    txn_event: Option<AnalyticsEvent>,
    error_event: Option<AnalyticsEvent>,
    error_json: Option<String>,
    trace: Option<TraceOutput>,
}

impl Transaction {
    /// Starts a transaction for `app`, which must be connected.
    pub fn begin(app: &Application, options: TxnOptions, background: bool) -> Option<Self> {
        if app.state != AppState::Ok {
            debug!(appname = %app.info.appname, state = ?app.state, "application not connected");
            return None;
        }
        let Some(agent_run_id) = app.agent_run_id.clone() else {
            debug!(appname = %app.info.appname, "application has no run id");
            return None;
        };

        let apdex_t = app.apdex_t();
        let tt_threshold = if options.tt_is_apdex_f {
            apdex_t.saturating_mul(4)
        } else {
            options.tt_threshold
        };

        let mut rng = rand::thread_rng();
        let sampled = rng.gen::<f64>() < options.sampling_ratio;
        let mut priority = rng.gen::<f64>();
        if sampled {
            priority += 1.0;
        }

        let guid = new_guid();
        let trace_id = format!("{:032x}", rng.gen::<u128>());
        let start = time::now_us();
        debug!(%guid, background, "transaction started");

        Some(Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            guid,
            trace_id,
            agent_run_id,
            slow_sqls: SlowSqls::default(),
            custom_events: Reservoir::new(options.custom_events_max),
            span_events: Reservoir::new(options.span_events_max),
            options,
            rules: Arc::clone(&app.rules),
            connect_reply: app.connect_reply.clone(),
            apdex_t,
            tt_threshold,
            priority,
            sampled,
            pid: std::process::id() as i32,
            status: TxnStatus {
                recording: true,
                ..Default::default()
            },
            background,
            path: None,
            path_type: PathType::Unknown,
            name: None,
            request_uri: None,
            synthetics_resource_id: None,
            tree: SegmentTree::new(start),
            scoped: MetricTable::new(),
            unscoped: MetricTable::new(),
            attributes: Attributes::default(),
            error: None,
            txn_event: None,
            error_event: None,
            error_json: None,
            trace: None,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.status.recording
    }

    pub fn is_ignored(&self) -> bool {
        self.status.ignore
    }

    pub fn is_ended(&self) -> bool {
        self.status.ended
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Marks the transaction as a background job. Refused once the name is frozen, since the
    /// name prefix depends on it.
    pub fn set_background(&mut self, background: bool) -> bool {
        if !self.status.recording {
            return false;
        }
        if self.name.is_some() {
            debug!(background, "background status change after name freeze");
            self.unscoped.force_add(BACKGROUND_CHANGE_PREVENTED);
            return false;
        }
        self.background = background;
        true
    }

    pub fn set_web(&mut self) -> bool {
        self.set_background(false)
    }

    /// Overrides the timing of the whole transaction. `start` is absolute.
    pub fn set_timing(&mut self, start: Micros, duration: Micros) -> bool {
        if !self.status.recording {
            return false;
        }
        self.tree.set_timing(ROOT, start, duration)
    }

    /// Stores the request URI without its query string and fragment.
    pub fn set_request_uri(&mut self, uri: &str) -> bool {
        if !self.status.recording {
            return false;
        }
        let end = uri.find(['?', '#']).unwrap_or(uri.len());
        let uri = &uri[..end];
        self.attributes.add_agent(
            "request.uri",
            uri,
            Destination::TXN_TRACE | Destination::ERROR,
        );
        self.request_uri = Some(uri.to_string());
        true
    }

    pub fn set_synthetics_resource_id(&mut self, id: &str) -> bool {
        if !self.status.recording {
            return false;
        }
        self.synthetics_resource_id = Some(id.to_string());
        true
    }

    /// Records time spent queued in front of the application.
    pub fn set_queue_duration(&mut self, duration: Micros) -> bool {
        if !self.status.recording || self.background {
            return false;
        }
        self.unscoped.add(QUEUE_TIME_METRIC, duration, duration);
        true
    }

    /// Records an error. The existing error is replaced only by one of equal or higher priority.
    pub fn record_error(
        &mut self,
        priority: i32,
        message: &str,
        class: &str,
        stacktrace_json: &str,
    ) -> bool {
        if !self.status.recording {
            return false;
        }
        if self.error.as_ref().is_some_and(|e| priority < e.priority) {
            debug!(priority, "lower priority error dropped");
            return false;
        }
        let message = if self.options.high_security {
            HIGH_SECURITY_MESSAGE
        } else {
            message
        };
        let span_id = self.current_span_guid();
        self.error = Some(TxnError {
            priority,
            when: time::now_us(),
            message: message.to_string(),
            class: class.to_string(),
            stacktrace_json: stacktrace_json.to_string(),
            span_id,
        });
        true
    }

    /// Adds an unscoped metric with a duration given in milliseconds.
    pub fn add_custom_metric(&mut self, name: &str, milliseconds: f64) -> bool {
        if !self.status.recording {
            return false;
        }
        let Some(duration) = time::millis_f64_to_us(milliseconds) else {
            debug!(name, milliseconds, "custom metric value rejected");
            return false;
        };
        self.unscoped.add(name, duration, duration);
        true
    }

    /// Adds a user attribute visible in every destination.
    pub fn add_attribute(&mut self, key: &str, value: impl Into<AttributeValue>) -> bool {
        if !self.status.recording {
            return false;
        }
        if self.options.high_security {
            debug!(key, "user attributes are disabled by high security");
            return false;
        }
        self.attributes.add_user(key, value, Destination::ALL)
    }

    pub fn record_custom_event(
        &mut self,
        event_type: &str,
        attributes: &[(&str, AttributeValue)],
    ) -> bool {
        if !self.status.recording || !self.options.custom_events_enabled {
            return false;
        }
        if self.options.high_security {
            debug!(event_type, "custom events are disabled by high security");
            return false;
        }
        let valid_type = CUSTOM_EVENT_TYPE
            .as_ref()
            .is_some_and(|re| re.is_match(event_type));
        if !valid_type {
            debug!(event_type, "invalid custom event type");
            return false;
        }

        let mut intrinsics = Map::new();
        intrinsics.insert("type".into(), Value::from(event_type));
        intrinsics.insert(
            "timestamp".into(),
            crate::json::double(time::as_secs_f64(time::now_us())),
        );
        let user: Map<String, Value> = attributes
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_json()))
            .collect();
        self.custom_events
            .add(AnalyticsEvent::new(intrinsics, user, Map::new()));
        true
    }

    /// Ends the transaction: closes the root segment, freezes the name and computes the
    /// end-of-transaction metrics and events. Returns whether the transaction should be sent.
    pub fn end(&mut self) -> bool {
        if self.status.ended || !self.status.recording {
            return false;
        }
        self.tree.end(ROOT, time::now_us());
        self.status.ended = true;

        if !self.freeze_name() {
            return false;
        }
        self.record_end_metrics();
        self.finish_span_events();
        self.build_events();
        self.status.recording = false;
        true
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn agent_run_id(&self) -> &str {
        &self.agent_run_id
    }

    /// The frozen name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    pub fn synthetics_resource_id(&self) -> Option<&str> {
        self.synthetics_resource_id.as_deref()
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn start(&self) -> Micros {
        self.tree.root().start
    }

    /// Duration of the transaction, zero until it has ended.
    pub fn duration(&self) -> Micros {
        self.tree.root().duration
    }

    pub fn apdex_t(&self) -> Micros {
        self.apdex_t
    }

    pub fn tt_threshold(&self) -> Micros {
        self.tt_threshold
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn options(&self) -> &TxnOptions {
        &self.options
    }

    pub fn scoped_metrics(&self) -> &MetricTable {
        &self.scoped
    }

    pub fn unscoped_metrics(&self) -> &MetricTable {
        &self.unscoped
    }

    pub fn error(&self) -> Option<&TxnError> {
        self.error.as_ref()
    }

    /// Error data record, available once the transaction has ended.
    pub fn error_json(&self) -> Option<&str> {
        self.error_json.as_deref()
    }

    pub fn slow_sqls(&self) -> &SlowSqls {
        &self.slow_sqls
    }

    pub fn custom_events(&self) -> &Reservoir<AnalyticsEvent> {
        &self.custom_events
    }

    pub fn span_events(&self) -> &Reservoir<AnalyticsEvent> {
        &self.span_events
    }

    pub fn txn_event(&self) -> Option<&AnalyticsEvent> {
        self.txn_event.as_ref()
    }

    pub fn error_event(&self) -> Option<&AnalyticsEvent> {
        self.error_event.as_ref()
    }

    pub fn trace(&self) -> Option<&TraceOutput> {
        self.trace.as_ref()
    }
}
