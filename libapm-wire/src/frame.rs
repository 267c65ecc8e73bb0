// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Framing of messages on the daemon socket: an 8 byte header holding the payload length and the
//! message type, both little endian u32, followed by the payload.

use crate::error::EncodeError;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Write};

pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload accepted in either direction.
pub const MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

/// Message type of flatbuffer payloads.
pub const BINARY_FRAME: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooLarge(u32),
    UnexpectedType(u32),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge(len) => write!(f, "Frame too large: {len} bytes"),
            FrameError::UnexpectedType(ty) => write!(f, "Unexpected frame type {ty}"),
        }
    }
}

impl std::error::Error for FrameError {}

pub fn check_size(payload: &[u8]) -> Result<(), EncodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EncodeError::TooLarge(payload.len()));
    }
    Ok(())
}

/// Writes a header and `payload` as a single buffer, so a frame is never interleaved with
/// another writer's.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.write_u32::<LittleEndian>(payload.len() as u32)?;
    frame.write_u32::<LittleEndian>(BINARY_FRAME)?;
    frame.extend_from_slice(payload);
    writer.write_all(&frame)
}

/// Validates a header and returns the length of the payload that follows it.
pub fn read_frame_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<u32, FrameError> {
    let len = LittleEndian::read_u32(&header[0..4]);
    let ty = LittleEndian::read_u32(&header[4..8]);
    if ty != BINARY_FRAME {
        return Err(FrameError::UnexpectedType(ty));
    }
    if len as usize > MAX_PAYLOAD_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}
