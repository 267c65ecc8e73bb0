// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The set of applications known to this process and the decision of when to ask the daemon
//! about them.
//!
//! Locking order is always the registry first, then an application. A lookup hands the
//! application back still locked, after the registry lock has been released.

use libapm_common::rate_limiter::LogGate;
use libapm_common::MutexExt;
use libapm_core::{AppInfo, AppState, AppStatus, Application};
use parking_lot::{ArcMutexGuard, Mutex as AppMutex, RawMutex};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Most applications a single process reports for.
pub const APP_LIMIT: usize = 250;

/// Query interval of an application in the unknown state, multiplied by one plus the number of
/// failed queries.
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Query interval of a connected application, so that a daemon restart is noticed.
pub const REFRESH_PERIOD: Duration = Duration::from_secs(20);

const LOG_BACKOFF: Duration = Duration::from_secs(20);

/// A locked application. Dropping it releases the lock.
pub type AppGuard = ArcMutexGuard<RawMutex, Application>;

/// Something able to ask the daemon about an application and apply the answer.
pub trait AppQuerier {
    fn query_app(&self, app: &mut Application) -> anyhow::Result<AppStatus>;
}

/// Supplies the settings reported with an application that did not come with its own.
pub trait AppSettingsProvider: Send + Sync {
    fn settings(&self) -> Option<Value>;
}

/// How long to wait between two queries for `app`, `None` if it must not be queried again.
pub fn query_period(app: &Application) -> Option<Duration> {
    match app.state {
        AppState::Invalid => None,
        AppState::Unknown => Some(
            BASE_BACKOFF
                .saturating_mul(app.failure_count.saturating_add(1))
                .min(MAX_BACKOFF),
        ),
        AppState::Ok => Some(REFRESH_PERIOD),
    }
}

fn should_query(app: &Application, now: Instant) -> bool {
    match (query_period(app), app.last_query) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(period), Some(last)) => now.saturating_duration_since(last) > period,
    }
}

#[derive(Debug)]
enum Now {
    Std,
    #[cfg(test)]
    Mock(Instant),
}

impl Now {
    fn now(&self) -> Instant {
        match self {
            Self::Std => Instant::now(),
            #[cfg(test)]
            Self::Mock(now) => *now,
        }
    }
}

pub struct Registry {
    apps: Mutex<Vec<Arc<AppMutex<Application>>>>,
    settings: Option<Box<dyn AppSettingsProvider>>,
    limit_gate: LogGate,
    security_gate: LogGate,
    now: Now,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("apps", &self.len())
            .field("settings", &self.settings.is_some())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Registry {
    pub fn new(settings: Option<Box<dyn AppSettingsProvider>>) -> Self {
        Self {
            apps: Mutex::new(Vec::new()),
            settings,
            limit_gate: LogGate::new(LOG_BACKOFF),
            security_gate: LogGate::new(LOG_BACKOFF),
            now: Now::Std,
        }
    }

    pub fn len(&self) -> usize {
        self.apps.lock_or_panic().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the application matching `info` by license and name, adding it if unknown.
    ///
    /// Returns `None` if the registry is full or the high security setting differs from the
    /// registered application's.
    fn find_or_add(&self, info: &AppInfo, now: Instant) -> Option<AppGuard> {
        let mut apps = self.apps.lock_or_panic();
        let found = apps.iter().find_map(|app| {
            let guard = app.lock_arc();
            (guard.info.license == info.license && guard.info.appname == info.appname)
                .then_some(guard)
        });

        match found {
            Some(app) if app.info.high_security != info.high_security => {
                if self.security_gate.try_open(now) {
                    error!(
                        appname = %info.appname,
                        "unable to add application: an application with the same name but a \
                         different high security setting already exists"
                    );
                }
                None
            }
            Some(app) => Some(app),
            None if apps.len() >= APP_LIMIT => {
                if self.limit_gate.try_open(now) {
                    error!(
                        limit = APP_LIMIT,
                        appname = %info.appname,
                        "maximum number of applications reached, unable to add application"
                    );
                }
                None
            }
            None => {
                let app = Arc::new(AppMutex::new(Application::new(info.clone())));
                let guard = app.lock_arc();
                debug!(
                    appname = %info.appname,
                    license = guard.printable_license(),
                    "added application"
                );
                apps.push(app);
                Some(guard)
            }
        }
    }

    /// Looks `info` up, registering it on first sight, and queries the daemon when the
    /// application is due. The application is returned locked, and only when it is connected.
    pub fn find_or_add_app(&self, info: &AppInfo, querier: &dyn AppQuerier) -> Option<AppGuard> {
        if !info.is_valid() {
            debug!(appname = %info.appname, "incomplete application info");
            return None;
        }
        let now = self.now.now();
        let mut app = self.find_or_add(info, now)?;

        if app.info.settings.is_none() {
            if let Some(provider) = &self.settings {
                app.info.settings = provider.settings();
            }
        }

        if should_query(&app, now) {
            app.last_query = Some(now);
            if let Err(err) = querier.query_app(&mut app) {
                debug!(appname = %app.info.appname, err = %format!("{err:#}"), "appinfo query failed");
            }
            if app.state == AppState::Ok {
                app.failure_count = 0;
            } else {
                app.failure_count = app.failure_count.saturating_add(1);
            }
        }

        (app.state == AppState::Ok).then_some(app)
    }

    /// The connected application currently holding `run_id`, locked.
    pub fn verify_id(&self, run_id: &str) -> Option<AppGuard> {
        let apps = self.apps.lock_or_panic();
        apps.iter().find_map(|app| {
            let guard = app.lock_arc();
            (guard.state == AppState::Ok && guard.agent_run_id.as_deref() == Some(run_id))
                .then_some(guard)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Answers every query with `status`, counting the queries.
    struct FakeDaemon {
        status: Cell<AppStatus>,
        queries: Cell<u32>,
    }

    impl FakeDaemon {
        fn new(status: AppStatus) -> Self {
            Self {
                status: Cell::new(status),
                queries: Cell::new(0),
            }
        }
    }

    impl AppQuerier for FakeDaemon {
        fn query_app(&self, app: &mut Application) -> anyhow::Result<AppStatus> {
            self.queries.set(self.queries.get() + 1);
            let status = self.status.get();
            let reply = format!(r#"{{"agent_run_id":"run-{}"}}"#, app.info.appname);
            app.apply_reply(status, Some(reply.as_bytes()))?;
            Ok(status)
        }
    }

    struct StaticSettings;

    impl AppSettingsProvider for StaticSettings {
        fn settings(&self) -> Option<Value> {
            Some(serde_json::json!({"source": "provider"}))
        }
    }

    fn info(appname: &str) -> AppInfo {
        AppInfo {
            license: "0123456789012345678901234567890123456789".into(),
            appname: appname.into(),
            lang: "rust".into(),
            version: "0.1.0".into(),
            redirect_collector: "collector.example.com".into(),
            environment: vec![("os".into(), "linux".into())],
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_info_is_refused() {
        let registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);
        let mut incomplete = info("a");
        incomplete.environment.clear();
        assert!(registry.find_or_add_app(&incomplete, &daemon).is_none());
        assert!(registry.is_empty());
        assert_eq!(daemon.queries.get(), 0);
    }

    #[test]
    fn test_dedup() {
        let registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);

        let app = registry.find_or_add_app(&info("a"), &daemon).unwrap();
        assert_eq!(app.agent_run_id.as_deref(), Some("run-a"));
        drop(app);
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_some());
        assert!(registry.find_or_add_app(&info("b"), &daemon).is_some());
        assert_eq!(registry.len(), 2);
        // the second lookup of "a" is within the refresh period
        assert_eq!(daemon.queries.get(), 2);
    }

    #[test]
    fn test_high_security_mismatch() {
        let registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);
        drop(registry.find_or_add_app(&info("a"), &daemon).unwrap());

        let mut secure = info("a");
        secure.high_security = true;
        assert!(registry.find_or_add_app(&secure, &daemon).is_none());
        assert_eq!(registry.len(), 1);

        let existing = registry.verify_id("run-a").unwrap();
        assert!(!existing.info.high_security);
    }

    #[test]
    fn test_capacity() {
        let registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);
        for i in 0..APP_LIMIT {
            assert!(registry
                .find_or_add_app(&info(&format!("app-{i}")), &daemon)
                .is_some());
        }
        assert!(registry.find_or_add_app(&info("one-too-many"), &daemon).is_none());
        assert_eq!(registry.len(), APP_LIMIT);
        // known applications are still served
        assert!(registry.find_or_add_app(&info("app-0"), &daemon).is_some());
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let mut app = Application::new(info("a"));
        let mut previous = Duration::ZERO;
        for failures in 0..20 {
            app.failure_count = failures;
            let period = query_period(&app).unwrap();
            assert!(period >= previous);
            assert!(period <= MAX_BACKOFF);
            previous = period;
        }
        assert_eq!(previous, MAX_BACKOFF);

        app.failure_count = u32::MAX;
        assert_eq!(query_period(&app), Some(MAX_BACKOFF));

        app.state = AppState::Ok;
        assert_eq!(query_period(&app), Some(REFRESH_PERIOD));
        app.state = AppState::Invalid;
        assert_eq!(query_period(&app), None);
    }

    #[test]
    fn test_unknown_app_backs_off() {
        let mut registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Unknown);
        let start = Instant::now();

        registry.now = Now::Mock(start);
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_none());
        assert_eq!(daemon.queries.get(), 1);

        // one failure: wait more than two seconds
        registry.now = Now::Mock(start + Duration::from_secs(2));
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_none());
        assert_eq!(daemon.queries.get(), 1);

        registry.now = Now::Mock(start + Duration::from_millis(2_001));
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_none());
        assert_eq!(daemon.queries.get(), 2);

        daemon.status.set(AppStatus::Connected);
        registry.now = Now::Mock(start + Duration::from_secs(6));
        let app = registry.find_or_add_app(&info("a"), &daemon).unwrap();
        assert_eq!(app.failure_count, 0);
        assert_eq!(daemon.queries.get(), 3);
    }

    #[test]
    fn test_connected_app_refreshes() {
        let mut registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);
        let start = Instant::now();

        registry.now = Now::Mock(start);
        drop(registry.find_or_add_app(&info("a"), &daemon));
        registry.now = Now::Mock(start + REFRESH_PERIOD);
        drop(registry.find_or_add_app(&info("a"), &daemon));
        assert_eq!(daemon.queries.get(), 1);
        registry.now = Now::Mock(start + REFRESH_PERIOD + Duration::from_millis(1));
        drop(registry.find_or_add_app(&info("a"), &daemon));
        assert_eq!(daemon.queries.get(), 2);
    }

    #[test]
    fn test_invalid_app_is_never_queried() {
        let mut registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::InvalidLicense);
        let start = Instant::now();

        registry.now = Now::Mock(start);
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_none());
        registry.now = Now::Mock(start + Duration::from_secs(3600));
        assert!(registry.find_or_add_app(&info("a"), &daemon).is_none());
        assert_eq!(daemon.queries.get(), 1);
    }

    #[test]
    fn test_settings_provider() {
        let registry = Registry::new(Some(Box::new(StaticSettings)));
        let daemon = FakeDaemon::new(AppStatus::Connected);
        let app = registry.find_or_add_app(&info("a"), &daemon).unwrap();
        assert_eq!(
            app.info.settings,
            Some(serde_json::json!({"source": "provider"}))
        );
    }

    #[test]
    fn test_verify_id() {
        let registry = Registry::default();
        let daemon = FakeDaemon::new(AppStatus::Connected);
        drop(registry.find_or_add_app(&info("a"), &daemon));
        assert_eq!(registry.verify_id("run-a").unwrap().info.appname, "a");
        assert!(registry.verify_id("run-b").is_none());
    }

    #[test]
    fn test_guard_is_usable_from_another_thread() {
        let registry = Arc::new(Registry::default());
        let daemon = FakeDaemon::new(AppStatus::Connected);
        drop(registry.find_or_add_app(&info("a"), &daemon));

        let handle = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.verify_id("run-a").map(|app| app.info.appname.clone()))
        };
        assert_eq!(handle.join().unwrap().as_deref(), Some("a"));
    }
}
