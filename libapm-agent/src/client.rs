// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request/response exchanges with the daemon over a single shared connection.

use crate::config::Config;
use crate::registry::AppQuerier;
use crate::transport::{Address, Connection};
use libapm_common::MutexExt;
use libapm_core::{AppStatus, Application, Transaction};
use libapm_wire::frame::{self, FrameError, FRAME_HEADER_SIZE};
use libapm_wire::{decode_appinfo_reply, encode_appinfo_query, encode_txndata};
use libapm_wire::{DecodeError, EncodeError};
use std::io::{self, Read};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("daemon did not answer in time")]
    Timeout,
    #[error("unable to encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("unable to decode reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("reply frame too large: {0} bytes")]
    FrameTooLarge(u32),
    #[error("unexpected reply frame type {0}")]
    UnexpectedFrameType(u32),
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge(len) => ClientError::FrameTooLarge(len),
            FrameError::UnexpectedType(ty) => ClientError::UnexpectedFrameType(ty),
        }
    }
}

fn io_error(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
        _ => ClientError::Io(err),
    }
}

/// Time left before `deadline`, or a timeout if it has passed.
fn remaining(deadline: Instant) -> Result<Duration, ClientError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(ClientError::Timeout);
    }
    Ok(left)
}

fn exchange(
    conn: &mut Connection,
    payload: &[u8],
    deadline: Instant,
    expect_reply: bool,
) -> Result<Option<Vec<u8>>, ClientError> {
    conn.set_timeout(remaining(deadline)?)?;
    frame::write_frame(conn, payload).map_err(io_error)?;
    if !expect_reply {
        return Ok(None);
    }

    let mut header = [0u8; FRAME_HEADER_SIZE];
    conn.set_timeout(remaining(deadline)?)?;
    conn.read_exact(&mut header).map_err(io_error)?;
    let len = frame::read_frame_header(&header)?;

    let mut body = vec![0; len as usize];
    conn.set_timeout(remaining(deadline)?)?;
    conn.read_exact(&mut body).map_err(io_error)?;
    Ok(Some(body))
}

/// Client for the daemon. The connection is opened on first use and dropped after any failure,
/// so the next call reconnects. Calls are never retried.
#[derive(Debug)]
pub struct DaemonClient {
    address: Address,
    appinfo_timeout: Duration,
    txndata_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl DaemonClient {
    pub fn new(address: Address, appinfo_timeout: Duration, txndata_timeout: Duration) -> Self {
        Self {
            address,
            appinfo_timeout,
            txndata_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.daemon_address.clone(),
            config.appinfo_timeout,
            config.txndata_timeout,
        )
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Replaces the current connection with an already open one.
    pub fn attach(&self, conn: Connection) {
        *self.conn.lock_or_panic() = Some(conn);
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock_or_panic().is_some()
    }

    fn round_trip(
        &self,
        payload: &[u8],
        timeout: Duration,
        expect_reply: bool,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        frame::check_size(payload)?;
        let deadline = Instant::now() + timeout;

        let mut guard = self.conn.lock_or_panic();
        if guard.is_none() {
            let conn = Connection::connect(&self.address, timeout).map_err(|err| {
                debug!(address = %self.address, %err, "unable to connect to the daemon");
                io_error(err)
            })?;
            debug!(address = %self.address, "connected to the daemon");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ClientError::Io(io::ErrorKind::NotConnected.into()));
        };

        let result = exchange(conn, payload, deadline, expect_reply);
        if let Err(err) = &result {
            warn!(address = %self.address, %err, "daemon exchange failed, closing connection");
            *guard = None;
        }
        result
    }

    /// Asks the daemon about `app` and applies the answer.
    pub fn send_appinfo(&self, app: &mut Application) -> Result<AppStatus, ClientError> {
        let query = encode_appinfo_query(app.agent_run_id.as_deref(), &app.info);
        let reply = self
            .round_trip(&query, self.appinfo_timeout, true)?
            .ok_or(ClientError::Timeout)?;
        Ok(decode_appinfo_reply(&reply, app)?)
    }

    /// Sends an ended transaction. The daemon does not answer.
    pub fn send_txndata(&self, txn: &Transaction) -> Result<(), ClientError> {
        let data = encode_txndata(txn);
        self.round_trip(&data, self.txndata_timeout, false)?;
        debug!(name = txn.name().unwrap_or("unknown"), size = data.len(), "txndata sent");
        Ok(())
    }
}

impl AppQuerier for DaemonClient {
    fn query_app(&self, app: &mut Application) -> anyhow::Result<AppStatus> {
        Ok(self.send_appinfo(app)?)
    }
}
