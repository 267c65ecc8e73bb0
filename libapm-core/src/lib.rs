// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Data model of the agent: the application record, transactions with their segment tree, the
//! metric tables they accumulate into, and the events, errors and traces they produce.

pub mod apdex;
pub mod app;
pub mod attributes;
pub mod error;
pub mod events;
pub mod json;
pub mod metrics;
pub mod rules;
pub mod segment;
pub mod slowsql;
pub mod trace;
pub mod txn;

pub use app::{AppInfo, AppState, AppStatus, Application};
pub use metrics::{MetricData, MetricTable};
pub use segment::{SegmentHandle, SegmentKind};
pub use txn::{OverwritePolicy, PathType, Transaction, TxnOptions};
