// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while reading a message received from the other side of the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// An offset or length points outside the buffer.
    OutOfBounds,
    /// The buffer is too short or its root offset leaves no room for a table.
    InvalidRoot,
    /// The message carries a payload of another type than the one requested.
    WrongDataType { expected: u8, found: u8 },
    /// A required field is absent.
    MissingField(&'static str),
    /// A string field is not valid utf8.
    InvalidUtf8,
    /// A JSON carrying field could not be parsed or applied.
    InvalidJson(String),
    /// The reply status is outside the known range.
    UnknownStatus(i8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::OutOfBounds => write!(f, "Offset out of bounds"),
            DecodeError::InvalidRoot => write!(f, "Invalid root offset"),
            DecodeError::WrongDataType { expected, found } => {
                write!(f, "Unexpected data type: expected {expected}, found {found}")
            }
            DecodeError::MissingField(field) => write!(f, "Missing field: {field}"),
            DecodeError::InvalidUtf8 => write!(f, "Failed to read utf8 value"),
            DecodeError::InvalidJson(msg) => write!(f, "Invalid json: {msg}"),
            DecodeError::UnknownStatus(status) => write!(f, "Unknown reply status: {status}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors raised while preparing a message for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The encoded message exceeds the largest frame the daemon accepts.
    TooLarge(usize),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::TooLarge(size) => write!(f, "Message too large: {size} bytes"),
        }
    }
}

impl std::error::Error for EncodeError {}
