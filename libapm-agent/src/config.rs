// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::transport::Address;
use libapm_common::config::parse_env;
use libapm_core::TxnOptions;
use libapm_log::{LogEventLevel, LogMethod};
use std::sync::LazyLock;
use std::time::Duration;

const ENV_DAEMON_SOCKET: &str = "APM_AGENT_DAEMON_SOCKET";
const ENV_APPINFO_TIMEOUT_MS: &str = "APM_AGENT_APPINFO_TIMEOUT_MS";
const ENV_TXNDATA_TIMEOUT_MS: &str = "APM_AGENT_TXNDATA_TIMEOUT_MS";
const ENV_HIGH_SECURITY: &str = "APM_AGENT_HIGH_SECURITY";
const ENV_SPAN_EVENTS_MAX: &str = "APM_AGENT_SPAN_EVENTS_MAX";
const ENV_DISTRIBUTED_TRACING: &str = "APM_AGENT_DISTRIBUTED_TRACING";
const ENV_TT_THRESHOLD_MS: &str = "APM_AGENT_TT_THRESHOLD_MS";
const ENV_SLOWSQL_THRESHOLD_MS: &str = "APM_AGENT_SLOWSQL_THRESHOLD_MS";
const ENV_LOG_METHOD: &str = "APM_AGENT_LOG_METHOD";
const ENV_LOG_LEVEL: &str = "APM_AGENT_LOG_LEVEL";

pub const DEFAULT_DAEMON_SOCKET: &str = "/tmp/.apm-agent.sock";
pub const DEFAULT_APPINFO_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_TXNDATA_TIMEOUT: Duration = Duration::from_millis(500);

/// How the transaction trace threshold is chosen.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TraceThreshold {
    /// Four times the application's apdex threshold.
    #[default]
    ApdexFailing,
    Fixed(Duration),
}

impl std::fmt::Display for TraceThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceThreshold::ApdexFailing => write!(f, "apdex_f"),
            TraceThreshold::Fixed(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub daemon_address: Address,
    pub appinfo_timeout: Duration,
    pub txndata_timeout: Duration,
    pub high_security: bool,
    pub span_events_max: usize,
    pub distributed_tracing: bool,
    pub tt_threshold: TraceThreshold,
    pub slowsql_threshold: Duration,
    pub log_method: LogMethod,
    pub log_level: Option<LogEventLevel>,
}

impl Default for Config {
    fn default() -> Self {
        let options = TxnOptions::default();
        Self {
            daemon_address: Address::parse(DEFAULT_DAEMON_SOCKET),
            appinfo_timeout: DEFAULT_APPINFO_TIMEOUT,
            txndata_timeout: DEFAULT_TXNDATA_TIMEOUT,
            high_security: false,
            span_events_max: options.span_events_max,
            distributed_tracing: false,
            tt_threshold: TraceThreshold::default(),
            slowsql_threshold: Duration::from_micros(options.slowsql_threshold),
            log_method: LogMethod::default(),
            log_level: None,
        }
    }
}

static ENV_CONFIG: LazyLock<Config> = LazyLock::new(FromEnv::config);

impl Config {
    /// The configuration read from the environment on first use.
    pub fn get() -> &'static Self {
        &ENV_CONFIG
    }

    /// Per transaction switches derived from this configuration.
    pub fn txn_options(&self) -> TxnOptions {
        let (tt_is_apdex_f, tt_threshold) = match self.tt_threshold {
            TraceThreshold::ApdexFailing => (true, 0),
            TraceThreshold::Fixed(d) => (false, d.as_micros() as u64),
        };
        TxnOptions {
            high_security: self.high_security,
            span_events_max: self.span_events_max,
            distributed_tracing_enabled: self.distributed_tracing,
            tt_is_apdex_f,
            tt_threshold,
            slowsql_threshold: self.slowsql_threshold.as_micros() as u64,
            ..Default::default()
        }
    }
}

pub struct FromEnv {}

impl FromEnv {
    fn daemon_address() -> Address {
        parse_env::str_not_empty(ENV_DAEMON_SOCKET)
            .map(|s| Address::parse(&s))
            .unwrap_or_else(|| Address::parse(DEFAULT_DAEMON_SOCKET))
    }

    fn tt_threshold() -> TraceThreshold {
        parse_env::duration_ms(ENV_TT_THRESHOLD_MS)
            .map(TraceThreshold::Fixed)
            .unwrap_or_default()
    }

    pub fn log_method() -> LogMethod {
        parse_env::str_not_empty(ENV_LOG_METHOD)
            .map(|m| LogMethod::parse(&m))
            .unwrap_or_default()
    }

    fn log_level() -> Option<LogEventLevel> {
        parse_env::str_not_empty(ENV_LOG_LEVEL)?.parse().ok()
    }

    pub fn config() -> Config {
        let default = Config::default();
        Config {
            daemon_address: Self::daemon_address(),
            appinfo_timeout: parse_env::duration_ms(ENV_APPINFO_TIMEOUT_MS)
                .unwrap_or(default.appinfo_timeout),
            txndata_timeout: parse_env::duration_ms(ENV_TXNDATA_TIMEOUT_MS)
                .unwrap_or(default.txndata_timeout),
            high_security: parse_env::bool(ENV_HIGH_SECURITY).unwrap_or(default.high_security),
            span_events_max: parse_env::int(ENV_SPAN_EVENTS_MAX)
                .unwrap_or(default.span_events_max),
            distributed_tracing: parse_env::bool(ENV_DISTRIBUTED_TRACING)
                .unwrap_or(default.distributed_tracing),
            tt_threshold: Self::tt_threshold(),
            slowsql_threshold: parse_env::duration_ms(ENV_SLOWSQL_THRESHOLD_MS)
                .unwrap_or(default.slowsql_threshold),
            log_method: Self::log_method(),
            log_level: Self::log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.daemon_address,
            Address::Unix(DEFAULT_DAEMON_SOCKET.into())
        );
        assert_eq!(config.appinfo_timeout, Duration::from_millis(100));
        assert_eq!(config.txndata_timeout, Duration::from_millis(500));
        assert_eq!(config.slowsql_threshold, Duration::from_millis(500));
        assert_eq!(config.log_method, LogMethod::Disabled);
        assert_eq!(config.tt_threshold.to_string(), "apdex_f");
    }

    #[test]
    fn test_txn_options() {
        let config = Config {
            high_security: true,
            distributed_tracing: true,
            span_events_max: 10,
            tt_threshold: TraceThreshold::Fixed(Duration::from_millis(250)),
            slowsql_threshold: Duration::from_millis(100),
            ..Default::default()
        };
        let options = config.txn_options();
        assert!(options.high_security);
        assert!(options.distributed_tracing_enabled);
        assert_eq!(options.span_events_max, 10);
        assert!(!options.tt_is_apdex_f);
        assert_eq!(options.tt_threshold, 250_000);
        assert_eq!(options.slowsql_threshold, 100_000);
        assert_eq!(config.tt_threshold.to_string(), "250ms");
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(ENV_DAEMON_SOCKET, "9999");
        std::env::set_var(ENV_TXNDATA_TIMEOUT_MS, "750");
        std::env::set_var(ENV_LOG_METHOD, "file:///tmp/apm.log");
        std::env::set_var(ENV_LOG_LEVEL, "debug");
        let config = FromEnv::config();
        assert_eq!(config.daemon_address, Address::Tcp("127.0.0.1:9999".into()));
        assert_eq!(config.txndata_timeout, Duration::from_millis(750));
        assert_eq!(config.appinfo_timeout, DEFAULT_APPINFO_TIMEOUT);
        assert_eq!(config.log_method, LogMethod::File("/tmp/apm.log".into()));
        assert_eq!(config.log_level, Some(LogEventLevel::Debug));
        for var in [ENV_DAEMON_SOCKET, ENV_TXNDATA_TIMEOUT_MS, ENV_LOG_METHOD, ENV_LOG_LEVEL] {
            std::env::remove_var(var);
        }
    }
}
