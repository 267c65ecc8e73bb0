// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Segment operations of a transaction and the metrics, slow queries and span events produced
//! when a segment ends.

use super::{new_guid, Transaction};
use crate::attributes::Destination;
use crate::events::AnalyticsEvent;
use crate::segment::{DatastoreAttrs, Ended, ExternalAttrs, SegmentHandle, SegmentKind, ROOT};
use crate::slowsql::obfuscate_sql;
use libapm_common::time::{self, Micros, US_PER_MS};
use serde_json::{Map, Value};
use tracing::debug;

const DEFAULT_CATEGORY: &str = "Custom";
const DEFAULT_SEGMENT_NAME: &str = "Unnamed Segment";
const DEFAULT_PRODUCT: &str = "Other";
const DEFAULT_OPERATION: &str = "other";
const UNKNOWN_INSTANCE: &str = "unknown";
const UNKNOWN_HOST: &str = "<unknown>";

/// Host part of an external call URI, including any port.
fn external_host(uri: &str) -> &str {
    let rest = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority);
    if host.is_empty() {
        UNKNOWN_HOST
    } else {
        host
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Transaction {
    fn owns(&self, segment: SegmentHandle) -> bool {
        if segment.txn_id != self.id {
            debug!(txn = self.id, segment_txn = segment.txn_id, "segment belongs to another transaction");
            return false;
        }
        segment.index < self.tree.len()
    }

    /// Index of a non-root segment of this transaction that may still be changed.
    fn segment_index(&self, segment: SegmentHandle) -> Option<usize> {
        if !self.status.recording || !self.owns(segment) {
            return None;
        }
        if segment.is_root() {
            debug!("operation not allowed on the root segment");
            return None;
        }
        Some(segment.index)
    }

    /// Number of segments currently running.
    pub fn depth(&self) -> u32 {
        self.tree.depth()
    }

    /// Starts a segment, under `parent` if given or else under the running segment.
    pub fn segment_start(&mut self, parent: Option<SegmentHandle>) -> Option<SegmentHandle> {
        if !self.status.recording {
            return None;
        }
        let parent = match parent {
            Some(parent) if !self.owns(parent) => return None,
            Some(parent) => Some(parent.index),
            None => None,
        };
        let index = self.tree.start(parent, time::now_us());
        Some(SegmentHandle {
            txn_id: self.id,
            index,
        })
    }

    pub fn segment_set_parent(&mut self, segment: SegmentHandle, parent: SegmentHandle) -> bool {
        let Some(index) = self.segment_index(segment) else {
            return false;
        };
        if !self.owns(parent) {
            return false;
        }
        let moved = self.tree.set_parent(index, parent.index);
        if !moved {
            debug!(segment = index, parent = parent.index, "segment parent change refused");
        }
        moved
    }

    /// Sets explicit timing, with `start_offset` relative to the transaction start.
    pub fn segment_set_timing(
        &mut self,
        segment: SegmentHandle,
        start_offset: Micros,
        duration: Micros,
    ) -> bool {
        let Some(index) = self.segment_index(segment) else {
            return false;
        };
        let start = self.tree.root().start.saturating_add(start_offset);
        self.tree.set_timing(index, start, duration)
    }

    /// Names a custom segment `<category>/<name>`. Neither part may contain a slash.
    pub fn segment_set_name(
        &mut self,
        segment: SegmentHandle,
        category: Option<&str>,
        name: Option<&str>,
    ) -> bool {
        let Some(index) = self.segment_index(segment) else {
            return false;
        };
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let name = name.unwrap_or(DEFAULT_SEGMENT_NAME);
        if category.contains('/') || name.contains('/') {
            debug!(category, name, "segment name parts must not contain '/'");
            return false;
        }
        let Some(node) = self.tree.get_mut(index).filter(|n| !n.ended) else {
            return false;
        };
        node.name = Some(format!("{category}/{name}"));
        true
    }

    pub fn segment_set_datastore(&mut self, segment: SegmentHandle, attrs: DatastoreAttrs) -> bool {
        self.set_kind(segment, SegmentKind::Datastore(attrs))
    }

    pub fn segment_set_external(&mut self, segment: SegmentHandle, attrs: ExternalAttrs) -> bool {
        self.set_kind(segment, SegmentKind::External(attrs))
    }

    fn set_kind(&mut self, segment: SegmentHandle, kind: SegmentKind) -> bool {
        let Some(index) = self.segment_index(segment) else {
            return false;
        };
        match self.tree.get_mut(index).filter(|n| !n.ended) {
            Some(node) => {
                node.kind = kind;
                true
            }
            None => false,
        }
    }

    /// Ends a segment and records its metrics. Ending a segment twice is a no-op.
    pub fn segment_end(&mut self, segment: SegmentHandle) -> bool {
        let Some(index) = self.segment_index(segment) else {
            return false;
        };
        let Some(ended) = self.tree.end(index, time::now_us()) else {
            debug!(segment = index, "segment already ended");
            return false;
        };
        let Some(kind) = self.tree.get(index).map(|n| n.kind.clone()) else {
            return false;
        };

        let name = match &kind {
            SegmentKind::Generic => self
                .tree
                .get(index)
                .and_then(|n| n.name.clone())
                .unwrap_or_else(|| format!("{DEFAULT_CATEGORY}/{DEFAULT_SEGMENT_NAME}")),
            SegmentKind::Datastore(ds) => self.end_datastore(index, ds, ended),
            SegmentKind::External(ext) => self.end_external(ext, ended),
        };
        self.scoped.add(&name, ended.duration, ended.exclusive);
        if let Some(node) = self.tree.get_mut(index) {
            node.name = Some(name);
        }

        if self.span_events_active() {
            self.record_span_event(index);
        }
        true
    }

    fn all_suffix(&self) -> &'static str {
        if self.background {
            "allOther"
        } else {
            "allWeb"
        }
    }

    fn end_datastore(&mut self, index: usize, ds: &DatastoreAttrs, ended: Ended) -> String {
        let product = non_empty(&ds.product).unwrap_or(DEFAULT_PRODUCT);
        let operation = non_empty(&ds.operation).unwrap_or(DEFAULT_OPERATION);
        let operation_metric = format!("Datastore/operation/{product}/{operation}");
        let scoped = match non_empty(&ds.collection) {
            Some(collection) => format!("Datastore/statement/{product}/{collection}/{operation}"),
            None => operation_metric.clone(),
        };

        let (d, x) = (ended.duration, ended.exclusive);
        let all_suffix = self.all_suffix();
        self.unscoped.add("Datastore/all", d, x);
        self.unscoped.add(&format!("Datastore/{all_suffix}"), d, x);
        self.unscoped.add(&format!("Datastore/{product}/all"), d, x);
        self.unscoped
            .add(&format!("Datastore/{product}/{all_suffix}"), d, x);
        self.unscoped.add(&operation_metric, d, x);
        if ds.host.is_some() || ds.port_path_or_id.is_some() {
            let host = non_empty(&ds.host).unwrap_or(UNKNOWN_INSTANCE);
            let port = non_empty(&ds.port_path_or_id).unwrap_or(UNKNOWN_INSTANCE);
            self.unscoped
                .add(&format!("Datastore/instance/{product}/{host}/{port}"), d, x);
        }

        if let Some(query) = non_empty(&ds.query) {
            let query = if self.options.high_security {
                let obfuscated = obfuscate_sql(query);
                if let Some(SegmentKind::Datastore(stored)) =
                    self.tree.get_mut(index).map(|n| &mut n.kind)
                {
                    stored.query = Some(obfuscated.clone());
                }
                obfuscated
            } else {
                query.to_string()
            };

            if self.options.slowsql_enabled && d >= self.options.slowsql_threshold {
                let mut params = Map::new();
                if let Some(host) = non_empty(&ds.host) {
                    params.insert("host".into(), Value::from(host));
                }
                if let Some(port) = non_empty(&ds.port_path_or_id) {
                    params.insert("port_path_or_id".into(), Value::from(port));
                }
                if let Some(db) = non_empty(&ds.database_name) {
                    params.insert("database_name".into(), Value::from(db));
                }
                let params = crate::json::to_string(&Value::Object(params));
                self.slow_sqls.add(d, &scoped, &query, &params);
            }
        }
        scoped
    }

    fn end_external(&mut self, ext: &ExternalAttrs, ended: Ended) -> String {
        let host = external_host(&ext.uri);
        let host_metric = format!("External/{host}/all");
        let (d, x) = (ended.duration, ended.exclusive);
        let all_suffix = self.all_suffix();
        self.unscoped.add("External/all", d, x);
        self.unscoped.add(&format!("External/{all_suffix}"), d, x);
        self.unscoped.add(&host_metric, d, x);
        host_metric
    }

    pub(super) fn span_events_active(&self) -> bool {
        self.options.distributed_tracing_enabled
            && self.options.span_events_enabled
            && self.sampled
    }

    fn span_guid(&mut self, index: usize) -> Option<String> {
        let node = self.tree.get_mut(index)?;
        Some(node.guid.get_or_insert_with(new_guid).clone())
    }

    /// Span id of the running segment, used to link errors to spans.
    pub(super) fn current_span_guid(&mut self) -> Option<String> {
        if !self.span_events_active() {
            return None;
        }
        let current = self.tree.current().unwrap_or(ROOT);
        self.span_guid(current)
    }

    fn record_span_event(&mut self, index: usize) {
        let Some(guid) = self.span_guid(index) else {
            return;
        };
        let parent_guid = match self.tree.get(index).and_then(|n| n.parent) {
            Some(parent) => self.span_guid(parent),
            None => None,
        };
        let Some(node) = self.tree.get(index) else {
            return;
        };

        let mut intrinsics = Map::new();
        intrinsics.insert("type".into(), Value::from("Span"));
        intrinsics.insert("traceId".into(), Value::from(self.trace_id.as_str()));
        intrinsics.insert("transactionId".into(), Value::from(self.guid.as_str()));
        intrinsics.insert("sampled".into(), Value::from(self.sampled));
        intrinsics.insert("priority".into(), crate::json::double(self.priority));
        let name = match (index, &self.name) {
            (ROOT, Some(txn_name)) => txn_name.clone(),
            _ => node.name.clone().unwrap_or_default(),
        };
        intrinsics.insert("name".into(), Value::from(name));
        intrinsics.insert("guid".into(), Value::from(guid));
        intrinsics.insert("timestamp".into(), Value::from(node.start / US_PER_MS));
        intrinsics.insert(
            "duration".into(),
            crate::json::double(time::as_secs_f64(node.duration)),
        );
        match parent_guid {
            Some(parent) => intrinsics.insert("parentId".into(), Value::from(parent)),
            None => intrinsics.insert("nr.entryPoint".into(), Value::from(true)),
        };

        let mut agent = Map::new();
        let mut user = Map::new();
        match &node.kind {
            SegmentKind::Generic => {
                intrinsics.insert("category".into(), Value::from("generic"));
            }
            SegmentKind::Datastore(ds) => {
                let product = non_empty(&ds.product).unwrap_or(DEFAULT_PRODUCT);
                intrinsics.insert("category".into(), Value::from("datastore"));
                intrinsics.insert("span.kind".into(), Value::from("client"));
                intrinsics.insert("component".into(), Value::from(product));
                if let Some(query) = non_empty(&ds.query) {
                    agent.insert("db.statement".into(), Value::from(query));
                }
                if let Some(db) = non_empty(&ds.database_name) {
                    agent.insert("db.instance".into(), Value::from(db));
                }
                let host = non_empty(&ds.host).unwrap_or(UNKNOWN_INSTANCE);
                let port = non_empty(&ds.port_path_or_id).unwrap_or(UNKNOWN_INSTANCE);
                agent.insert("peer.hostname".into(), Value::from(host));
                agent.insert("peer.address".into(), Value::from(format!("{host}:{port}")));
            }
            SegmentKind::External(ext) => {
                intrinsics.insert("category".into(), Value::from("http"));
                intrinsics.insert("span.kind".into(), Value::from("client"));
                if let Some(library) = non_empty(&ext.library) {
                    intrinsics.insert("component".into(), Value::from(library));
                }
                agent.insert("http.url".into(), Value::from(ext.uri.as_str()));
                if let Some(method) = non_empty(&ext.method) {
                    agent.insert("http.method".into(), Value::from(method));
                }
            }
        }
        if index == ROOT {
            user = self.attributes.user_to_json(Destination::SPAN);
            agent = self.attributes.agent_to_json(Destination::SPAN);
        }

        self.span_events
            .add(AnalyticsEvent::new(intrinsics, user, agent));
    }

    /// Emits the root span once the transaction is named.
    pub(super) fn finish_span_events(&mut self) {
        if self.span_events_active() {
            self.record_span_event(ROOT);
        }
    }
}
