// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The appinfo exchange: the agent asks the daemon about an application and the daemon answers
//! with its connection status and, once connected, the collector's connect reply.

use crate::error::DecodeError;
use crate::flatbuffer::{Builder, UOffset};
use crate::schema::{self, app, app_reply, message, DataType};
use libapm_core::{AppInfo, AppStatus, Application};
use serde_json::{json, Value};
use tracing::{debug, error};

/// A decoded appinfo reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppReply<'a> {
    pub status: AppStatus,
    pub connect_reply: Option<&'a [u8]>,
}

/// Environment as an array of `[key, value]` pairs.
fn environment_json(info: &AppInfo) -> String {
    json!(info.environment).to_string()
}

/// Labels in the shape the collector expects on connect.
fn labels_json(info: &AppInfo) -> String {
    let labels: Vec<Value> = info
        .labels
        .iter()
        .map(|(k, v)| json!({"label_type": k, "label_value": v}))
        .collect();
    Value::from(labels).to_string()
}

fn finish_message(
    mut fb: Builder,
    run_id: Option<&str>,
    data_type: DataType,
    data: UOffset,
) -> Vec<u8> {
    let run_id = match run_id {
        Some(id) if !id.is_empty() => fb.create_string(id),
        _ => 0,
    };
    fb.object_begin(message::NUM_FIELDS);
    fb.object_prepend_uoffset(message::DATA, data);
    fb.object_prepend_u8(message::DATA_TYPE, data_type as u8, DataType::None as u8);
    fb.object_prepend_uoffset(message::AGENT_RUN_ID, run_id);
    let msg = fb.object_end();
    fb.finish(msg)
}

/// Builds the query sent to the daemon for `info`. The run id of the current connection, if any,
/// lets the daemon answer "still valid" without reconnecting.
pub fn encode_appinfo_query(run_id: Option<&str>, info: &AppInfo) -> Vec<u8> {
    let mut fb = Builder::default();

    let display_host = match info.display_host.as_deref() {
        Some(host) => fb.create_string(host),
        None => 0,
    };
    let labels = if info.labels.is_empty() {
        0
    } else {
        fb.create_string(&labels_json(info))
    };
    let settings = match &info.settings {
        Some(settings) => fb.create_string(&settings.to_string()),
        None => 0,
    };
    let environment = fb.create_string(&environment_json(info));
    let collector = fb.create_string(&info.redirect_collector);
    let version = fb.create_string(&info.version);
    let lang = fb.create_string(&info.lang);
    let appname = fb.create_string(&info.appname);
    let license = fb.create_string(&info.license);

    fb.object_begin(app::NUM_FIELDS);
    fb.object_prepend_uoffset(app::DISPLAY_HOST, display_host);
    fb.object_prepend_uoffset(app::LABELS, labels);
    fb.object_prepend_uoffset(app::SETTINGS, settings);
    fb.object_prepend_uoffset(app::ENVIRONMENT, environment);
    fb.object_prepend_uoffset(app::REDIRECT_COLLECTOR, collector);
    fb.object_prepend_bool(app::HIGH_SECURITY, info.high_security, false);
    fb.object_prepend_uoffset(app::AGENT_VERSION, version);
    fb.object_prepend_uoffset(app::AGENT_LANGUAGE, lang);
    fb.object_prepend_uoffset(app::APPNAME, appname);
    fb.object_prepend_uoffset(app::LICENSE, license);
    let data = fb.object_end();

    finish_message(fb, run_id, DataType::App, data)
}

/// Reads the status and connect reply out of an appinfo reply without applying them.
pub fn parse_appinfo_reply(data: &[u8]) -> Result<AppReply<'_>, DecodeError> {
    let (_, reply) = schema::open(data, DataType::AppReply)?;
    let raw = reply.read_i8(app_reply::STATUS, AppStatus::Unknown.as_i8())?;
    let status = AppStatus::from_i8(raw).ok_or(DecodeError::UnknownStatus(raw))?;
    let connect_reply = reply.read_bytes(app_reply::CONNECT_REPLY)?;
    Ok(AppReply {
        status,
        connect_reply,
    })
}

/// Applies an appinfo reply to `app`. When the reply cannot be used, `app` is left untouched.
pub fn decode_appinfo_reply(data: &[u8], app: &mut Application) -> Result<AppStatus, DecodeError> {
    let reply = parse_appinfo_reply(data).inspect_err(|err| {
        error!(appname = %app.info.appname, %err, "invalid appinfo reply");
    })?;
    app.apply_reply(reply.status, reply.connect_reply)
        .map_err(|err| {
            error!(appname = %app.info.appname, %err, "unable to apply appinfo reply");
            DecodeError::InvalidJson(format!("{err:#}"))
        })?;
    debug!(appname = %app.info.appname, status = ?reply.status, "appinfo reply applied");
    Ok(reply.status)
}

fn parse_environment(raw: &str) -> Result<Vec<(String, String)>, DecodeError> {
    let pairs: Vec<(String, String)> =
        serde_json::from_str(raw).map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
    Ok(pairs)
}

fn parse_labels(raw: &str) -> Result<Vec<(String, String)>, DecodeError> {
    let labels: Vec<Value> =
        serde_json::from_str(raw).map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
    Ok(labels
        .iter()
        .filter_map(|label| {
            let key = label.get("label_type")?.as_str()?;
            let value = label.get("label_value")?.as_str()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect())
}

/// The daemon's view of a query: the run id the agent sent, if any, and the application.
pub fn decode_appinfo_query(data: &[u8]) -> Result<(Option<String>, AppInfo), DecodeError> {
    let (run_id, table) = schema::open(data, DataType::App)?;
    let string = |slot| -> Result<String, DecodeError> {
        Ok(table.read_str(slot)?.unwrap_or_default().to_string())
    };

    let info = AppInfo {
        license: string(app::LICENSE)?,
        appname: string(app::APPNAME)?,
        lang: string(app::AGENT_LANGUAGE)?,
        version: string(app::AGENT_VERSION)?,
        high_security: table.read_bool(app::HIGH_SECURITY, false)?,
        redirect_collector: string(app::REDIRECT_COLLECTOR)?,
        environment: match table.read_str(app::ENVIRONMENT)? {
            Some(raw) => parse_environment(raw)?,
            None => Vec::new(),
        },
        labels: match table.read_str(app::LABELS)? {
            Some(raw) => parse_labels(raw)?,
            None => Vec::new(),
        },
        settings: match table.read_str(app::SETTINGS)? {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|err| DecodeError::InvalidJson(err.to_string()))?,
            ),
            None => None,
        },
        display_host: table.read_str(app::DISPLAY_HOST)?.map(str::to_string),
    };
    Ok((run_id.map(str::to_string), info))
}

/// The daemon's answer to a query.
pub fn encode_appinfo_reply(status: AppStatus, connect_reply: Option<&[u8]>) -> Vec<u8> {
    let mut fb = Builder::default();
    let reply = match connect_reply {
        Some(bytes) => fb.create_bytes(bytes),
        None => 0,
    };
    fb.object_begin(app_reply::NUM_FIELDS);
    fb.object_prepend_uoffset(app_reply::CONNECT_REPLY, reply);
    fb.object_prepend_i8(app_reply::STATUS, status.as_i8(), AppStatus::Unknown.as_i8());
    let data = fb.object_end();
    finish_message(fb, None, DataType::AppReply, data)
}
