// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg(unix)]

use libapm_agent::config::Config;
use libapm_agent::transport::{Address, Connection};
use libapm_agent::{Agent, AppInfo, ClientError, DaemonClient, OverwritePolicy, PathType};
use libapm_core::{AppState, AppStatus, Application};
use libapm_wire::flatbuffer::Table;
use libapm_wire::frame::{read_frame_header, write_frame, FRAME_HEADER_SIZE};
use libapm_wire::schema::{message, txn, DataType};
use libapm_wire::{decode_appinfo_query, encode_appinfo_reply};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use std::time::Duration;

const CONNECT_REPLY: &[u8] = br#"{"agent_run_id":"run-1","apdex_t":0.5}"#;

fn info() -> AppInfo {
    AppInfo {
        license: "0123456789012345678901234567890123456789".into(),
        appname: "Daemon Test".into(),
        lang: "rust".into(),
        version: "0.1.0".into(),
        redirect_collector: "collector.example.com".into(),
        environment: vec![("os".into(), "linux".into())],
        ..Default::default()
    }
}

fn read_message(stream: &mut UnixStream) -> Vec<u8> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header).unwrap();
    let len = read_frame_header(&header).unwrap();
    let mut body = vec![0; len as usize];
    stream.read_exact(&mut body).unwrap();
    body
}

/// Answers appinfo queries with a connected reply and returns every txndata payload it receives.
fn fake_daemon(mut stream: UnixStream) -> Vec<Vec<u8>> {
    let mut txns = Vec::new();
    let mut header = [0u8; FRAME_HEADER_SIZE];
    while stream.read_exact(&mut header).is_ok() {
        let len = read_frame_header(&header).unwrap();
        let mut body = vec![0; len as usize];
        stream.read_exact(&mut body).unwrap();
        let msg = Table::root(&body).unwrap();
        match msg.read_u8(message::DATA_TYPE, 0).unwrap() {
            ty if ty == DataType::App as u8 => {
                let (_, app) = decode_appinfo_query(&body).unwrap();
                assert_eq!(app.appname, "Daemon Test");
                let reply = encode_appinfo_reply(AppStatus::Connected, Some(CONNECT_REPLY));
                write_frame(&mut stream, &reply).unwrap();
            }
            ty if ty == DataType::Txn as u8 => txns.push(body),
            other => panic!("unexpected data type {other}"),
        }
    }
    txns
}

fn client() -> DaemonClient {
    DaemonClient::new(
        Address::parse("/nonexistent/apm.sock"),
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_appinfo_round_trip() {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let daemon = thread::spawn(move || fake_daemon(theirs));

    let client = client();
    client.attach(Connection::from(ours));
    let mut app = Application::new(info());
    assert_eq!(client.send_appinfo(&mut app).unwrap(), AppStatus::Connected);
    assert_eq!(app.state, AppState::Ok);
    assert_eq!(app.agent_run_id.as_deref(), Some("run-1"));
    assert!(client.is_connected());

    drop(client);
    assert!(daemon.join().unwrap().is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_appinfo_timeout_closes_connection() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let client = DaemonClient::new(
        Address::parse("/nonexistent/apm.sock"),
        Duration::from_millis(50),
        Duration::from_millis(50),
    );
    client.attach(Connection::from(ours));

    let mut app = Application::new(info());
    assert!(matches!(
        client.send_appinfo(&mut app),
        Err(ClientError::Timeout)
    ));
    assert_eq!(app.state, AppState::Unknown);
    assert!(!client.is_connected());

    // the query itself was written before the deadline passed
    let query = read_message(&mut theirs);
    assert_eq!(decode_appinfo_query(&query).unwrap().1, info());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_oversized_reply_is_rejected() {
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    let daemon = thread::spawn(move || {
        read_message(&mut theirs);
        // a header announcing more than the limit, then nothing
        theirs.write_all(&[0, 0, 0, 0x10, 2, 0, 0, 0]).unwrap();
        theirs
    });

    let client = client();
    client.attach(Connection::from(ours));
    let mut app = Application::new(info());
    assert!(matches!(
        client.send_appinfo(&mut app),
        Err(ClientError::FrameTooLarge(_))
    ));
    assert!(!client.is_connected());
    daemon.join().unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_agent_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apm.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let daemon = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        fake_daemon(stream)
    });

    let agent = Agent::new(Config {
        daemon_address: Address::parse(path.to_str().unwrap()),
        appinfo_timeout: Duration::from_secs(1),
        txndata_timeout: Duration::from_secs(1),
        ..Default::default()
    });

    let app = agent.app(&info()).unwrap();
    let mut t = agent.txn_begin(&app, true).unwrap();
    drop(app);
    t.set_path("checkout", PathType::Custom, OverwritePolicy::OkToOverwrite);
    let seg = t.segment_start(None).unwrap();
    t.segment_set_name(seg, Some("Custom"), Some("pay"));
    assert!(t.segment_end(seg));
    assert!(agent.txn_end(t));

    // the same application is served without another query
    assert!(agent.app(&info()).is_some());
    drop(agent);

    let txns = daemon.join().unwrap();
    assert_eq!(txns.len(), 1);
    let msg = Table::root(&txns[0]).unwrap();
    assert_eq!(msg.read_str(message::AGENT_RUN_ID).unwrap(), Some("run-1"));
    let data = msg.read_table(message::DATA).unwrap().unwrap();
    assert_eq!(
        data.read_str(txn::NAME).unwrap(),
        Some("WebTransaction/Custom/checkout")
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_agent_without_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::new(Config {
        daemon_address: Address::parse(dir.path().join("missing.sock").to_str().unwrap()),
        ..Default::default()
    });
    assert!(agent.app(&info()).is_none());
    assert_eq!(agent.registry().len(), 1);
    assert!(!agent.client().is_connected());
}
