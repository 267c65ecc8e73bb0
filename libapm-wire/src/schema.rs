// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Table layouts of the agent protocol: the field slots of each table and the message envelope.

use crate::error::DecodeError;
use crate::flatbuffer::Table;

pub mod message {
    pub const AGENT_RUN_ID: usize = 0;
    pub const DATA_TYPE: usize = 1;
    pub const DATA: usize = 2;
    pub const NUM_FIELDS: usize = 3;
}

pub mod app {
    pub const LICENSE: usize = 0;
    pub const APPNAME: usize = 1;
    pub const AGENT_LANGUAGE: usize = 2;
    pub const AGENT_VERSION: usize = 3;
    pub const HIGH_SECURITY: usize = 4;
    pub const REDIRECT_COLLECTOR: usize = 5;
    pub const ENVIRONMENT: usize = 6;
    pub const SETTINGS: usize = 7;
    pub const LABELS: usize = 8;
    pub const DISPLAY_HOST: usize = 9;
    pub const NUM_FIELDS: usize = 10;
}

pub mod app_reply {
    pub const STATUS: usize = 0;
    pub const CONNECT_REPLY: usize = 1;
    pub const NUM_FIELDS: usize = 2;
}

pub mod txn {
    pub const NAME: usize = 0;
    pub const URI: usize = 1;
    pub const SYNTHETICS_RESOURCE_ID: usize = 2;
    pub const PID: usize = 3;
    pub const TXN_EVENT: usize = 4;
    pub const METRICS: usize = 5;
    pub const ERRORS: usize = 6;
    pub const SLOW_SQLS: usize = 7;
    pub const CUSTOM_EVENTS: usize = 8;
    pub const TRACE: usize = 9;
    pub const ERROR_EVENTS: usize = 10;
    pub const SAMPLING_PRIORITY: usize = 11;
    pub const SPAN_EVENTS: usize = 12;
    pub const NUM_FIELDS: usize = 13;
}

pub mod event {
    pub const DATA: usize = 0;
    pub const NUM_FIELDS: usize = 1;
}

pub mod error {
    pub const PRIORITY: usize = 0;
    pub const DATA: usize = 1;
    pub const NUM_FIELDS: usize = 2;
}

pub mod metric {
    pub const NAME: usize = 0;
    pub const DATA: usize = 1;
    pub const NUM_FIELDS: usize = 2;
}

pub mod slowsql {
    pub const ID: usize = 0;
    pub const COUNT: usize = 1;
    pub const TOTAL_MICROS: usize = 2;
    pub const MIN_MICROS: usize = 3;
    pub const MAX_MICROS: usize = 4;
    pub const METRIC: usize = 5;
    pub const QUERY: usize = 6;
    pub const PARAMS: usize = 7;
    pub const NUM_FIELDS: usize = 8;
}

pub mod trace {
    pub const TIMESTAMP: usize = 0;
    pub const DURATION: usize = 1;
    pub const GUID: usize = 2;
    pub const FORCE_PERSIST: usize = 3;
    pub const DATA: usize = 4;
    pub const NUM_FIELDS: usize = 5;
}

/// Size of the inline metric data struct.
pub const METRIC_DATA_SIZE: usize = 56;

/// Payload carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    None = 0,
    App = 1,
    AppReply = 2,
    Txn = 3,
    SpanBatch = 4,
}

impl DataType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(DataType::None),
            1 => Some(DataType::App),
            2 => Some(DataType::AppReply),
            3 => Some(DataType::Txn),
            4 => Some(DataType::SpanBatch),
            _ => None,
        }
    }
}

/// Opens a message, checks it carries `expected` and returns the run id with the payload table.
pub(crate) fn open(
    data: &[u8],
    expected: DataType,
) -> Result<(Option<&str>, Table<'_>), DecodeError> {
    let msg = Table::root(data)?;
    let found = msg.read_u8(message::DATA_TYPE, DataType::None as u8)?;
    if found != expected as u8 {
        return Err(DecodeError::WrongDataType {
            expected: expected as u8,
            found,
        });
    }
    let payload = msg
        .read_table(message::DATA)?
        .ok_or(DecodeError::MissingField("data"))?;
    Ok((msg.read_str(message::AGENT_RUN_ID)?, payload))
}
