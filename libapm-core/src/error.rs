// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libapm_common::time::{Micros, US_PER_MS};
use serde_json::{Map, Value};

/// Message substituted for error messages when high security is enabled.
pub const HIGH_SECURITY_MESSAGE: &str =
    "Message removed by high security setting";

/// The error captured by a transaction. Only the highest priority error is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnError {
    pub priority: i32,
    pub when: Micros,
    pub message: String,
    pub class: String,
    /// Stack trace as a JSON array of frames.
    pub stacktrace_json: String,
    /// Guid of the segment that was executing when the error was recorded.
    pub span_id: Option<String>,
}

impl TxnError {
    /// Renders the error data record: `[when_ms, txn_name, message, class, params]`.
    pub fn to_daemon_json(
        &self,
        txn_name: &str,
        agent_attributes: Map<String, Value>,
        user_attributes: Map<String, Value>,
        intrinsics: Map<String, Value>,
        request_uri: Option<&str>,
    ) -> String {
        let stack_trace = serde_json::from_str::<Value>(&self.stacktrace_json)
            .unwrap_or_else(|_| Value::Array(vec![Value::from(self.stacktrace_json.as_str())]));

        let mut params = Map::new();
        params.insert("stack_trace".into(), stack_trace);
        params.insert("agentAttributes".into(), Value::Object(agent_attributes));
        params.insert("userAttributes".into(), Value::Object(user_attributes));
        params.insert("intrinsics".into(), Value::Object(intrinsics));
        if let Some(uri) = request_uri {
            params.insert("request_uri".into(), Value::from(uri));
        }

        crate::json::to_string(&Value::Array(vec![
            Value::from(self.when / US_PER_MS),
            Value::from(txn_name),
            Value::from(self.message.as_str()),
            Value::from(self.class.as_str()),
            Value::Object(params),
        ]))
    }
}
