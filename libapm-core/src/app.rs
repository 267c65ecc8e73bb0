// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rules::{Rules, SegmentTerms};
use anyhow::{anyhow, Context};
use libapm_common::time::{Micros, US_PER_SEC};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Expected length of a license key.
pub const LICENSE_SIZE: usize = 40;

const DEFAULT_APDEX_T: Micros = US_PER_SEC / 2;

/// Identity and metadata of a monitored application, as sent to the daemon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppInfo {
    pub license: String,
    pub appname: String,
    pub lang: String,
    pub version: String,
    pub high_security: bool,
    pub redirect_collector: String,
    /// Host environment as ordered key/value pairs.
    pub environment: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub settings: Option<Value>,
    pub display_host: Option<String>,
}

impl AppInfo {
    /// Whether every field the daemon requires to connect the application is present.
    pub fn is_valid(&self) -> bool {
        !self.license.is_empty()
            && !self.appname.is_empty()
            && !self.lang.is_empty()
            && !self.version.is_empty()
            && !self.redirect_collector.is_empty()
            && !self.environment.is_empty()
    }
}

/// Obfuscated license suitable for log lines: the first and last two characters.
pub fn printable_license(license: &str) -> String {
    let chars: Vec<char> = license.chars().collect();
    if chars.len() < 4 {
        return String::from("...");
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Unknown,
    /// Terminal. Lookups of an invalid application fail fast until the process restarts.
    Invalid,
    Ok,
}

/// Status carried by an appinfo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Unknown,
    Disconnected,
    InvalidLicense,
    Connected,
    StillValid,
}

impl AppStatus {
    pub fn from_i8(raw: i8) -> Option<Self> {
        match raw {
            0 => Some(AppStatus::Unknown),
            1 => Some(AppStatus::Disconnected),
            2 => Some(AppStatus::InvalidLicense),
            3 => Some(AppStatus::Connected),
            4 => Some(AppStatus::StillValid),
            _ => None,
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            AppStatus::Unknown => 0,
            AppStatus::Disconnected => 1,
            AppStatus::InvalidLicense => 2,
            AppStatus::Connected => 3,
            AppStatus::StillValid => 4,
        }
    }
}

/// Naming rules received on connect. Shared with every transaction started while they are current.
#[derive(Debug, Clone, Default)]
pub struct AppRules {
    pub url_rules: Rules,
    pub txn_rules: Rules,
    pub segment_terms: SegmentTerms,
}

/// A registered application and its connection state.
#[derive(Debug)]
pub struct Application {
    pub info: AppInfo,
    pub state: AppState,
    pub agent_run_id: Option<String>,
    pub connect_reply: Option<Arc<Value>>,
    pub rules: Arc<AppRules>,
    pub last_query: Option<Instant>,
    pub failure_count: u32,
    plicense: String,
}

impl Application {
    pub fn new(info: AppInfo) -> Self {
        let plicense = printable_license(&info.license);
        Self {
            info,
            state: AppState::Unknown,
            agent_run_id: None,
            connect_reply: None,
            rules: Arc::default(),
            last_query: None,
            failure_count: 0,
            plicense,
        }
    }

    pub fn printable_license(&self) -> &str {
        &self.plicense
    }

    /// Apdex threshold from the connect reply, half a second if absent.
    pub fn apdex_t(&self) -> Micros {
        self.connect_reply
            .as_deref()
            .and_then(|reply| reply.get("apdex_t"))
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| (t * US_PER_SEC as f64) as Micros)
            .unwrap_or(DEFAULT_APDEX_T)
    }

    /// Applies a reply from the daemon.
    ///
    /// On failure the application is left exactly as it was.
    pub fn apply_reply(
        &mut self,
        status: AppStatus,
        connect_reply: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        match status {
            AppStatus::Unknown => {
                self.state = AppState::Unknown;
                debug!(appname = %self.info.appname, license = %self.plicense, "application status unknown");
            }
            AppStatus::Disconnected => {
                self.state = AppState::Invalid;
                info!(appname = %self.info.appname, license = %self.plicense, "application disconnected");
            }
            AppStatus::InvalidLicense => {
                self.state = AppState::Invalid;
                warn!(appname = %self.info.appname, license = %self.plicense, "application has an invalid license");
            }
            AppStatus::StillValid => {
                self.state = AppState::Ok;
            }
            AppStatus::Connected => {
                let raw = connect_reply.ok_or_else(|| anyhow!("connected reply without payload"))?;
                let reply: Value =
                    serde_json::from_slice(raw).context("invalid connect reply json")?;
                let agent_run_id = reply
                    .get("agent_run_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| anyhow!("connect reply has no agent_run_id"))?
                    .to_string();

                let rules = AppRules {
                    url_rules: reply.get("url_rules").map(Rules::from_json).unwrap_or_default(),
                    txn_rules: reply
                        .get("transaction_name_rules")
                        .map(Rules::from_json)
                        .unwrap_or_default(),
                    segment_terms: reply
                        .get("transaction_segment_terms")
                        .map(SegmentTerms::from_json)
                        .unwrap_or_default(),
                };

                info!(
                    appname = %self.info.appname,
                    license = %self.plicense,
                    run_id = %agent_run_id,
                    "application connected"
                );
                self.agent_run_id = Some(agent_run_id);
                self.rules = Arc::new(rules);
                self.connect_reply = Some(Arc::new(reply));
                self.state = AppState::Ok;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application::new(AppInfo {
            license: "0123456789012345678901234567890123456789".into(),
            appname: "App".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_printable_license() {
        assert_eq!(printable_license("0123456789012345678901234567890123456789"), "01...89");
        assert_eq!(printable_license("ab"), "...");
        assert_eq!(app().printable_license(), "01...89");
    }

    #[test]
    fn test_status_round_trip() {
        for raw in 0..5 {
            assert_eq!(AppStatus::from_i8(raw).unwrap().as_i8(), raw);
        }
        assert_eq!(AppStatus::from_i8(5), None);
        assert_eq!(AppStatus::from_i8(-1), None);
    }

    #[test]
    fn test_transitions() {
        let mut app = app();
        app.apply_reply(AppStatus::Unknown, None).unwrap();
        assert_eq!(app.state, AppState::Unknown);

        let reply = br#"{"agent_run_id":"run-1","apdex_t":0.25,"url_rules":[{"match_expression":"a","replacement":"b"}]}"#;
        app.apply_reply(AppStatus::Connected, Some(reply)).unwrap();
        assert_eq!(app.state, AppState::Ok);
        assert_eq!(app.agent_run_id.as_deref(), Some("run-1"));
        assert_eq!(app.rules.url_rules.len(), 1);
        assert_eq!(app.apdex_t(), 250_000);

        app.apply_reply(AppStatus::StillValid, None).unwrap();
        assert_eq!(app.state, AppState::Ok);
        assert_eq!(app.agent_run_id.as_deref(), Some("run-1"));

        app.apply_reply(AppStatus::Disconnected, None).unwrap();
        assert_eq!(app.state, AppState::Invalid);

        let mut app = self::app();
        app.apply_reply(AppStatus::InvalidLicense, None).unwrap();
        assert_eq!(app.state, AppState::Invalid);
    }

    #[test]
    fn test_bad_connect_reply_leaves_app_untouched() {
        let mut app = app();
        assert!(app.apply_reply(AppStatus::Connected, None).is_err());
        assert!(app.apply_reply(AppStatus::Connected, Some(b"{not json")).is_err());
        assert!(app.apply_reply(AppStatus::Connected, Some(b"{}")).is_err());
        assert_eq!(app.state, AppState::Unknown);
        assert!(app.agent_run_id.is_none());
        assert_eq!(app.apdex_t(), DEFAULT_APDEX_T);
    }

    #[test]
    fn test_app_info_validity() {
        let mut info = AppInfo {
            license: "l".into(),
            appname: "a".into(),
            lang: "rust".into(),
            version: "1.0".into(),
            redirect_collector: "collector.example.com".into(),
            environment: vec![("os".into(), "linux".into())],
            ..Default::default()
        };
        assert!(info.is_valid());
        info.environment.clear();
        assert!(!info.is_valid());
    }
}
