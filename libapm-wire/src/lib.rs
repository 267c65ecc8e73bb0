// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Messages exchanged with the daemon, encoded as flatbuffers and sent in length prefixed
//! frames.

pub mod appinfo;
pub mod error;
pub mod flatbuffer;
pub mod frame;
pub mod schema;
pub mod txndata;

pub use appinfo::{
    decode_appinfo_query, decode_appinfo_reply, encode_appinfo_query, encode_appinfo_reply,
    parse_appinfo_reply, AppReply,
};
pub use error::{DecodeError, EncodeError};
pub use txndata::encode_txndata;
