// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A minimal FlatBuffers implementation: a back to front [`Builder`] and a bounds checked
//! [`Table`] reader. Only the pieces the agent protocol uses are supported.

mod builder;
mod table;

pub use builder::{Builder, UOffset};
pub use table::{Table, TableVector};

/// Smallest buffer that can hold a root offset and a table.
pub const MIN_FLATBUFFER_SIZE: usize = 8;
