// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction naming: path priorities and the freeze step that turns a path into the final
//! metric name.

use super::Transaction;
use crate::rules::RuleOutcome;
use libapm_common::time::{Micros, US_PER_SEC};
use serde_json::Value;
use tracing::debug;

/// Source of a transaction path, from least to most specific. A path can only be replaced by one
/// of the same or a higher kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PathType {
    #[default]
    Unknown,
    Uri,
    Action,
    Function,
    Custom,
}

impl PathType {
    fn prefix(self, background: bool) -> &'static str {
        match (background, self) {
            (false, PathType::Unknown | PathType::Uri) => "WebTransaction/Uri/",
            (false, PathType::Action) => "WebTransaction/Action/",
            (false, PathType::Function) => "WebTransaction/Function/",
            (false, PathType::Custom) => "WebTransaction/Custom/",
            (true, PathType::Unknown | PathType::Uri) => "OtherTransaction/Uri/",
            (true, PathType::Action) => "OtherTransaction/Action/",
            (true, PathType::Function) => "OtherTransaction/Function/",
            (true, PathType::Custom) => "OtherTransaction/Custom/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    OkToOverwrite,
    NotOkToOverwrite,
}

/// Name without its first component: `WebTransaction/Uri/a` gives `Uri/a`.
pub(crate) fn name_suffix(name: &str) -> &str {
    name.split_once('/').map(|(_, rest)| rest).unwrap_or(name)
}

impl Transaction {
    /// Proposes a path for the transaction name.
    pub fn set_path(&mut self, path: &str, kind: PathType, policy: OverwritePolicy) -> bool {
        if !self.status.recording || path.is_empty() {
            return false;
        }
        if self.name.is_some() {
            debug!(path, "transaction name already frozen");
            return false;
        }
        if kind < self.path_type {
            return false;
        }
        if kind == self.path_type && policy == OverwritePolicy::NotOkToOverwrite {
            return false;
        }
        self.path = Some(path.to_string());
        self.path_type = kind;
        true
    }

    pub fn path_type(&self) -> PathType {
        self.path_type
    }

    /// Freezes the transaction name. Returns false if a naming rule marked the transaction as
    /// ignored, in which case recording stops.
    pub fn freeze_name(&mut self) -> bool {
        if self.name.is_some() {
            return !self.status.ignore;
        }

        let background = self.background;
        let prefix = self.path_type.prefix(background);
        let mut path = match (&self.path, self.path_type) {
            (Some(path), kind) if kind != PathType::Unknown => path.clone(),
            _ => String::from("<unknown>"),
        };

        if !background && matches!(self.path_type, PathType::Uri | PathType::Custom) {
            match self.rules.url_rules.apply(&path) {
                RuleOutcome::Ignore => return self.ignore_by_rule(&path),
                RuleOutcome::Name(renamed) => path = renamed,
            }
        }
        let path = path.strip_prefix('/').unwrap_or(&path);

        let full = format!("{prefix}{path}");
        let full = match self.rules.txn_rules.apply(&full) {
            RuleOutcome::Ignore => return self.ignore_by_rule(&full),
            RuleOutcome::Name(renamed) => renamed,
        };
        let full = self.rules.segment_terms.apply(&full);

        if let Some(apdex_t) = self.key_transaction_apdex(&full) {
            self.apdex_t = apdex_t;
            if self.options.tt_is_apdex_f {
                self.tt_threshold = apdex_t.saturating_mul(4);
            }
        }

        debug!(name = %full, "transaction name frozen");
        self.name = Some(full);
        true
    }

    fn ignore_by_rule(&mut self, name: &str) -> bool {
        debug!(name, "transaction ignored by naming rule");
        self.status.ignore = true;
        self.status.recording = false;
        self.name = Some(name.to_string());
        false
    }

    fn key_transaction_apdex(&self, name: &str) -> Option<Micros> {
        self.connect_reply
            .as_deref()?
            .get("web_transactions_apdex")?
            .get(name)
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| (t * US_PER_SEC as f64) as Micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::tests::{connected_app, connected_app_with_reply};
    use crate::txn::TxnOptions;

    fn txn(background: bool) -> Transaction {
        Transaction::begin(&connected_app(), TxnOptions::default(), background).unwrap()
    }

    #[test]
    fn test_path_priority() {
        let mut txn = txn(false);
        assert!(txn.set_path("/a", PathType::Uri, OverwritePolicy::OkToOverwrite));
        assert!(txn.set_path("ctrl/act", PathType::Action, OverwritePolicy::NotOkToOverwrite));
        assert!(!txn.set_path("/b", PathType::Uri, OverwritePolicy::OkToOverwrite));
        assert!(!txn.set_path("other", PathType::Action, OverwritePolicy::NotOkToOverwrite));
        assert!(txn.set_path("other", PathType::Action, OverwritePolicy::OkToOverwrite));
        assert!(txn.freeze_name());
        assert_eq!(txn.name(), Some("WebTransaction/Action/other"));
        assert!(!txn.set_path("late", PathType::Custom, OverwritePolicy::OkToOverwrite));
    }

    #[test]
    fn test_prefixes() {
        let mut txn = self::txn(false);
        txn.freeze_name();
        assert_eq!(txn.name(), Some("WebTransaction/Uri/<unknown>"));

        let mut txn = self::txn(true);
        txn.freeze_name();
        assert_eq!(txn.name(), Some("OtherTransaction/Uri/<unknown>"));

        let mut txn = self::txn(true);
        txn.set_path("job", PathType::Function, OverwritePolicy::OkToOverwrite);
        txn.freeze_name();
        assert_eq!(txn.name(), Some("OtherTransaction/Function/job"));
    }

    #[test]
    fn test_rules_are_applied_in_order() {
        let reply = r#"{
            "agent_run_id": "run",
            "url_rules": [{"match_expression": "^/users/[0-9]+$", "replacement": "/users/*"}],
            "transaction_name_rules": [{"match_expression": "WebTransaction/Uri/users", "replacement": "WebTransaction/Uri/people"}],
            "transaction_segment_terms": [{"prefix": "WebTransaction/Uri", "terms": ["people"]}]
        }"#;
        let app = connected_app_with_reply(reply);
        let mut txn = Transaction::begin(&app, TxnOptions::default(), false).unwrap();
        txn.set_path("/users/42", PathType::Uri, OverwritePolicy::OkToOverwrite);
        assert!(txn.freeze_name());
        assert_eq!(txn.name(), Some("WebTransaction/Uri/people/*"));
    }

    #[test]
    fn test_ignore_rule_stops_recording() {
        let reply = r#"{
            "agent_run_id": "run",
            "url_rules": [{"match_expression": "^/health", "ignore": true}]
        }"#;
        let app = connected_app_with_reply(reply);
        let mut txn = Transaction::begin(&app, TxnOptions::default(), false).unwrap();
        txn.set_path("/health", PathType::Uri, OverwritePolicy::OkToOverwrite);
        assert!(!txn.freeze_name());
        assert!(txn.is_ignored());
        assert!(!txn.add_custom_metric("Custom/x", 1.0));
        assert!(!txn.end());
    }

    #[test]
    fn test_key_transaction_apdex() {
        let reply = r#"{
            "agent_run_id": "run",
            "apdex_t": 0.5,
            "web_transactions_apdex": {"WebTransaction/Custom/checkout": 0.1}
        }"#;
        let app = connected_app_with_reply(reply);
        let mut txn = Transaction::begin(&app, TxnOptions::default(), false).unwrap();
        assert_eq!(txn.apdex_t(), 500_000);
        txn.set_path("checkout", PathType::Custom, OverwritePolicy::OkToOverwrite);
        txn.freeze_name();
        assert_eq!(txn.apdex_t(), 100_000);
        assert_eq!(txn.tt_threshold(), 400_000);
    }

    #[test]
    fn test_name_suffix() {
        assert_eq!(name_suffix("WebTransaction/Uri/a/b"), "Uri/a/b");
        assert_eq!(name_suffix("plain"), "plain");
    }
}
