// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! The in-process side of the APM agent.
//!
//! An [`Agent`] registers applications with the daemon, starts transactions for connected
//! applications and ships them to the daemon once they end. Instrumentation itself goes through
//! the methods of [`Transaction`].

pub mod client;
pub mod config;
pub mod registry;
pub mod transport;

pub use client::{ClientError, DaemonClient};
pub use config::Config;
pub use libapm_core::segment::{DatastoreAttrs, ExternalAttrs};
pub use libapm_core::{
    AppInfo, Application, OverwritePolicy, PathType, SegmentHandle, Transaction, TxnOptions,
};
pub use registry::{AppGuard, AppQuerier, AppSettingsProvider, Registry};

use anyhow::Context;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Agent {
    config: Config,
    registry: Registry,
    client: DaemonClient,
}

impl Agent {
    pub fn new(config: Config) -> Self {
        Self::with_settings_provider(config, None)
    }

    pub fn with_settings_provider(
        config: Config,
        settings: Option<Box<dyn AppSettingsProvider>>,
    ) -> Self {
        let client = DaemonClient::from_config(&config);
        Self {
            config,
            registry: Registry::new(settings),
            client,
        }
    }

    /// An agent configured from the environment, with logging set up accordingly.
    pub fn from_env() -> Self {
        let config = Config::get().clone();
        if let Err(err) = init_logging(&config) {
            eprintln!("unable to configure logging: {err:#}");
        }
        Self::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    /// The connected application described by `info`, locked. Registers the application and
    /// queries the daemon as needed; returns `None` until the daemon reports it connected.
    pub fn app(&self, info: &AppInfo) -> Option<AppGuard> {
        let mut info = info.clone();
        info.high_security |= self.config.high_security;
        self.registry.find_or_add_app(&info, &self.client)
    }

    /// Starts a transaction for `app` with the configured options.
    pub fn txn_begin(&self, app: &Application, web: bool) -> Option<Transaction> {
        let mut options = self.config.txn_options();
        options.high_security |= app.info.high_security;
        Transaction::begin(app, options, !web)
    }

    fn send(&self, txn: &Transaction) -> anyhow::Result<()> {
        self.client
            .send_txndata(txn)
            .with_context(|| format!("unable to send transaction {}", txn.guid()))
    }

    /// Ends `txn` and sends it to the daemon. Returns false if the transaction was ignored,
    /// already ended, or could not be sent.
    pub fn txn_end(&self, mut txn: Transaction) -> bool {
        if !txn.end() {
            debug!(guid = txn.guid(), ignored = txn.is_ignored(), "transaction not sent");
            return false;
        }
        match self.send(&txn) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to send transaction");
                false
            }
        }
    }
}

/// Points the global logger at the configured output and level.
pub fn init_logging(config: &Config) -> anyhow::Result<()> {
    libapm_log::configure(&config.log_method)?;
    if let Some(level) = config.log_level {
        libapm_log::set_log_level(level)?;
    }
    Ok(())
}
