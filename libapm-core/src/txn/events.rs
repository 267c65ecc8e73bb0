// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-of-transaction metrics and the events, error record and trace built from them.

use super::naming::name_suffix;
use super::{TraceOutput, Transaction, QUEUE_TIME_METRIC};
use crate::apdex::ApdexZone;
use crate::attributes::Destination;
use crate::events::AnalyticsEvent;
use crate::json::double;
use crate::trace::{self, TraceContext};
use libapm_common::time::{as_millis_f64, as_secs_f64};
use serde_json::{Map, Value};

impl Transaction {
    fn apdex_zone(&self) -> ApdexZone {
        if self.error.is_some() {
            ApdexZone::Failing
        } else {
            ApdexZone::classify(self.apdex_t, self.duration())
        }
    }

    pub(super) fn record_end_metrics(&mut self) {
        let Some(name) = self.name.clone() else {
            return;
        };
        let suffix = name_suffix(&name);
        let duration = self.duration();
        let exclusive = duration.saturating_sub(self.tree.root_kids_duration());
        let total_time = duration;

        if self.background {
            self.unscoped.add(&name, duration, exclusive);
            self.unscoped.add(
                &format!("OtherTransactionTotalTime/{suffix}"),
                total_time,
                total_time,
            );
            self.unscoped.add("OtherTransaction/all", duration, exclusive);
            self.unscoped
                .add("OtherTransactionTotalTime", total_time, total_time);
        } else {
            self.unscoped.add("HttpDispatcher", duration, duration);
            self.unscoped.add(&name, duration, exclusive);
            self.unscoped.add(
                &format!("WebTransactionTotalTime/{suffix}"),
                total_time,
                total_time,
            );
            self.unscoped.add("WebTransaction", duration, exclusive);
            self.unscoped
                .add("WebTransactionTotalTime", total_time, total_time);

            let zone = self.apdex_zone();
            self.unscoped.add_apdex_zone("Apdex", zone, self.apdex_t);
            self.unscoped
                .add_apdex_zone(&format!("Apdex/{suffix}"), zone, self.apdex_t);
        }

        if self.error.is_some() {
            let rollup = if self.background {
                "Errors/allOther"
            } else {
                "Errors/allWeb"
            };
            self.unscoped.force_add("Errors/all");
            self.unscoped.force_add(rollup);
            self.unscoped.force_add(&format!("Errors/{name}"));
        }
    }

    /// Intrinsics read back from the unscoped metrics, shared by transaction and error events.
    fn metric_intrinsics(&self, intrinsics: &mut Map<String, Value>, with_external_count: bool) {
        if let Some(queue) = self.unscoped.find(QUEUE_TIME_METRIC) {
            intrinsics.insert("queueDuration".into(), double(as_secs_f64(queue.total())));
        }
        if let Some(external) = self.unscoped.find("External/all") {
            intrinsics.insert(
                "externalDuration".into(),
                double(as_secs_f64(external.total())),
            );
            if with_external_count {
                intrinsics.insert("externalCallCount".into(), Value::from(external.count()));
            }
        }
        if let Some(db) = self.unscoped.find("Datastore/all") {
            intrinsics.insert("databaseDuration".into(), double(as_secs_f64(db.total())));
            intrinsics.insert("databaseCallCount".into(), Value::from(db.count()));
        }
    }

    fn distributed_trace_intrinsics(&self, intrinsics: &mut Map<String, Value>) {
        if !self.options.distributed_tracing_enabled {
            return;
        }
        intrinsics.insert("guid".into(), Value::from(self.guid.as_str()));
        intrinsics.insert("sampled".into(), Value::from(self.sampled));
        intrinsics.insert("priority".into(), double(self.priority));
        intrinsics.insert("traceId".into(), Value::from(self.trace_id.as_str()));
    }

    fn txn_event_intrinsics(&self, name: &str) -> Map<String, Value> {
        let duration = as_secs_f64(self.duration());
        let mut intrinsics = Map::new();
        intrinsics.insert("type".into(), Value::from("Transaction"));
        intrinsics.insert("name".into(), Value::from(name));
        intrinsics.insert("timestamp".into(), double(as_secs_f64(self.start())));
        intrinsics.insert("duration".into(), double(duration));
        intrinsics.insert("totalTime".into(), double(duration));
        intrinsics.insert("nr.guid".into(), Value::from(self.guid.as_str()));
        if !self.background {
            intrinsics.insert(
                "nr.apdexPerfZone".into(),
                Value::from(self.apdex_zone().label()),
            );
        }
        self.metric_intrinsics(&mut intrinsics, false);
        self.distributed_trace_intrinsics(&mut intrinsics);
        intrinsics.insert("error".into(), Value::from(self.error.is_some()));
        intrinsics
    }

    pub(super) fn build_events(&mut self) {
        let Some(name) = self.name.clone() else {
            return;
        };

        if self.options.analytics_events_enabled {
            self.txn_event = Some(AnalyticsEvent::new(
                self.txn_event_intrinsics(&name),
                self.attributes.user_to_json(Destination::TXN_EVENT),
                self.attributes.agent_to_json(Destination::TXN_EVENT),
            ));
        }

        if let Some(error) = &self.error {
            let mut trace_intrinsics = Map::new();
            self.distributed_trace_intrinsics(&mut trace_intrinsics);
            self.error_json = Some(error.to_daemon_json(
                &name,
                self.attributes.agent_to_json(Destination::ERROR),
                self.attributes.user_to_json(Destination::ERROR),
                trace_intrinsics,
                self.request_uri.as_deref(),
            ));

            if self.options.error_events_enabled {
                let mut intrinsics = Map::new();
                intrinsics.insert("type".into(), Value::from("TransactionError"));
                intrinsics.insert("timestamp".into(), double(as_secs_f64(error.when)));
                intrinsics.insert("error.class".into(), Value::from(error.class.as_str()));
                intrinsics.insert("error.message".into(), Value::from(error.message.as_str()));
                intrinsics.insert("transactionName".into(), Value::from(name.as_str()));
                intrinsics.insert("duration".into(), double(as_secs_f64(self.duration())));
                self.metric_intrinsics(&mut intrinsics, true);
                intrinsics.insert("nr.transactionGuid".into(), Value::from(self.guid.as_str()));
                self.distributed_trace_intrinsics(&mut intrinsics);
                if let Some(span_id) = &error.span_id {
                    intrinsics.insert("spanId".into(), Value::from(span_id.as_str()));
                }
                self.error_event = Some(AnalyticsEvent::new(
                    intrinsics,
                    self.attributes.user_to_json(Destination::ERROR),
                    self.attributes.agent_to_json(Destination::ERROR),
                ));
            }
        }

        if self.options.tt_enabled && self.duration() >= self.tt_threshold {
            let mut intrinsics = Map::new();
            intrinsics.insert("totalTime".into(), double(as_secs_f64(self.duration())));
            self.distributed_trace_intrinsics(&mut intrinsics);
            let json = trace::render(
                &self.tree,
                TraceContext {
                    txn_name: &name,
                    txn_start: self.start(),
                    duration: self.duration(),
                    max_segments: self.options.max_trace_segments,
                    agent_attributes: self.attributes.agent_to_json(Destination::TXN_TRACE),
                    user_attributes: self.attributes.user_to_json(Destination::TXN_TRACE),
                    intrinsics,
                },
            );
            self.trace = Some(TraceOutput {
                timestamp_ms: as_millis_f64(self.start()),
                duration_ms: as_millis_f64(self.duration()),
                guid: self.guid.clone(),
                force_persist: false,
                json,
            });
        }
    }
}
