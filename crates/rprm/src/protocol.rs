// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Resource manager wire format parser/builder.
//
// Every integer is little-endian at a fixed offset with no padding.
// All parsing is safe: malformed input returns Err, never panics.

use crate::connection::InstanceId;
use crate::constraint::{ConstraintMask, ConstraintSet};
use crate::error::{ResmgrError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ACTION_CONNECT: u32 = 0;
pub const ACTION_DISCONNECT: u32 = 1;
pub const ACTION_REQUEST: u32 = 2;
pub const ACTION_RELEASE: u32 = 3;
pub const ACTION_SET_CONSTRAINTS: u32 = 4;
pub const ACTION_CLEAR_CONSTRAINTS: u32 = 5;
pub const ACTION_REQ_DATA: u32 = 6;

/// Action code echoed when the buffer is too short to carry one.
pub const ACTION_INVALID: u32 = 0xFFFF_FFFF;

/// REQ_DATA kind: maximum frequency of the resource.
pub const DATA_MAX_FREQUENCY: u32 = 0;

/// Size of the leading action code.
pub const ACTION_SIZE: usize = 4;

/// Resource name field of a REQUEST, NUL-padded.
pub const NAME_FIELD_LEN: usize = 16;

/// Size of the shared-memory message buffer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

pub const RELEASE_PAYLOAD_SIZE: usize = 4;
pub const CONSTRAINTS_PAYLOAD_SIZE: usize = 32;
pub const REQ_DATA_PAYLOAD_SIZE: usize = 8;

/// `{ action, status }`
pub const ACK_HEADER_SIZE: usize = 8;

/// `{ action, status, resource_id, base_address }`
pub const REQUEST_ACK_HEADER_SIZE: usize = 16;

// ---------------------------------------------------------------------------
// Action enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Action {
    Connect = ACTION_CONNECT,
    Disconnect = ACTION_DISCONNECT,
    Request = ACTION_REQUEST,
    Release = ACTION_RELEASE,
    SetConstraints = ACTION_SET_CONSTRAINTS,
    ClearConstraints = ACTION_CLEAR_CONSTRAINTS,
    RequestData = ACTION_REQ_DATA,
}

impl Action {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            ACTION_CONNECT => Ok(Self::Connect),
            ACTION_DISCONNECT => Ok(Self::Disconnect),
            ACTION_REQUEST => Ok(Self::Request),
            ACTION_RELEASE => Ok(Self::Release),
            ACTION_SET_CONSTRAINTS => Ok(Self::SetConstraints),
            ACTION_CLEAR_CONSTRAINTS => Ok(Self::ClearConstraints),
            ACTION_REQ_DATA => Ok(Self::RequestData),
            _ => Err(ResmgrError::UnknownAction(v)),
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Request => "REQUEST",
            Self::Release => "RELEASE",
            Self::SetConstraints => "SET_CONSTRAINTS",
            Self::ClearConstraints => "CLEAR_CONSTRAINTS",
            Self::RequestData => "REQ_DATA",
        }
    }
}

// ---------------------------------------------------------------------------
// Messages (remote -> host)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Connect,
    Disconnect,
    Request {
        name: String,
        /// Type-specific tail, passed to the back-end untouched.
        args: Vec<u8>,
    },
    Release {
        resource_id: InstanceId,
    },
    SetConstraints {
        resource_id: InstanceId,
        constraints: ConstraintSet,
    },
    /// Values in `constraints` travel on the wire but only the mask is used.
    ClearConstraints {
        resource_id: InstanceId,
        constraints: ConstraintSet,
    },
    RequestData {
        resource_id: InstanceId,
        kind: u32,
    },
}

impl Message {
    pub fn action(&self) -> Action {
        match self {
            Self::Connect => Action::Connect,
            Self::Disconnect => Action::Disconnect,
            Self::Request { .. } => Action::Request,
            Self::Release { .. } => Action::Release,
            Self::SetConstraints { .. } => Action::SetConstraints,
            Self::ClearConstraints { .. } => Action::ClearConstraints,
            Self::RequestData { .. } => Action::RequestData,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers (little-endian)
// ---------------------------------------------------------------------------

fn field<const N: usize>(buf: &[u8], off: usize) -> Result<[u8; N]> {
    buf.get(off..off + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            ResmgrError::MalformedMessage(format!(
                "need {} bytes at offset {}, have {}",
                N,
                off,
                buf.len()
            ))
        })
}

pub fn read_u32_le(buf: &[u8], off: usize) -> Result<u32> {
    field::<4>(buf, off).map(u32::from_le_bytes)
}

pub fn read_i32_le(buf: &[u8], off: usize) -> Result<i32> {
    field::<4>(buf, off).map(i32::from_le_bytes)
}

pub fn read_u64_le(buf: &[u8], off: usize) -> Result<u64> {
    field::<8>(buf, off).map(u64::from_le_bytes)
}

pub fn read_i64_le(buf: &[u8], off: usize) -> Result<i64> {
    field::<8>(buf, off).map(i64::from_le_bytes)
}

fn expect_len(action: Action, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(ResmgrError::MalformedMessage(format!(
            "{} payload is {} bytes, expected {}",
            action.name(),
            payload.len(),
            expected
        )));
    }
    Ok(())
}

/// Encode a resource name into the fixed 16-byte field.
///
/// A 16-byte name fills the field without a terminator.
pub fn encode_resource_name(name: &str) -> Result<[u8; NAME_FIELD_LEN]> {
    if name.len() > NAME_FIELD_LEN || name.contains('\0') {
        return Err(ResmgrError::InvalidName(name.to_string()));
    }
    let mut out = [0u8; NAME_FIELD_LEN];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(out)
}

/// Decode the name field: bytes up to the first NUL, or all 16.
pub fn decode_resource_name(field: &[u8]) -> Result<String> {
    let field = field.get(..NAME_FIELD_LEN).ok_or_else(|| {
        ResmgrError::MalformedMessage(format!("name field is {} bytes", field.len()))
    })?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| ResmgrError::MalformedMessage("resource name is not UTF-8".into()))
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

/// Action code of a buffer, if it is long enough to carry one.
pub fn peek_action(buf: &[u8]) -> Option<u32> {
    read_u32_le(buf, 0).ok()
}

fn parse_constraints(payload: &[u8]) -> Result<(InstanceId, ConstraintSet)> {
    let resource_id = read_u32_le(payload, 0)?;
    let mask = ConstraintMask::from_bits(read_u32_le(payload, 4)?)?;
    Ok((
        resource_id,
        ConstraintSet {
            mask,
            frequency: read_i64_le(payload, 8)?,
            bandwidth: read_i64_le(payload, 16)?,
            latency: read_i64_le(payload, 24)?,
        },
    ))
}

/// Decode and validate one message.
pub fn parse_message(buf: &[u8], max_size: usize) -> Result<Message> {
    if buf.len() > max_size {
        return Err(ResmgrError::MalformedMessage(format!(
            "message is {} bytes, limit {}",
            buf.len(),
            max_size
        )));
    }
    let action = Action::from_u32(read_u32_le(buf, 0)?)?;
    let payload = &buf[ACTION_SIZE..];

    let msg = match action {
        Action::Connect => {
            expect_len(action, payload, 0)?;
            Message::Connect
        }
        Action::Disconnect => {
            expect_len(action, payload, 0)?;
            Message::Disconnect
        }
        Action::Request => {
            if payload.len() < NAME_FIELD_LEN {
                return Err(ResmgrError::MalformedMessage(format!(
                    "REQUEST payload is {} bytes, expected at least {}",
                    payload.len(),
                    NAME_FIELD_LEN
                )));
            }
            Message::Request {
                name: decode_resource_name(payload)?,
                args: payload[NAME_FIELD_LEN..].to_vec(),
            }
        }
        Action::Release => {
            expect_len(action, payload, RELEASE_PAYLOAD_SIZE)?;
            Message::Release {
                resource_id: read_u32_le(payload, 0)?,
            }
        }
        Action::SetConstraints => {
            expect_len(action, payload, CONSTRAINTS_PAYLOAD_SIZE)?;
            let (resource_id, constraints) = parse_constraints(payload)?;
            Message::SetConstraints {
                resource_id,
                constraints,
            }
        }
        Action::ClearConstraints => {
            expect_len(action, payload, CONSTRAINTS_PAYLOAD_SIZE)?;
            let (resource_id, constraints) = parse_constraints(payload)?;
            Message::ClearConstraints {
                resource_id,
                constraints,
            }
        }
        Action::RequestData => {
            expect_len(action, payload, REQ_DATA_PAYLOAD_SIZE)?;
            Message::RequestData {
                resource_id: read_u32_le(payload, 0)?,
                kind: read_u32_le(payload, 4)?,
            }
        }
    };
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Message serialization
// ---------------------------------------------------------------------------

fn write_constraints(buf: &mut Vec<u8>, resource_id: InstanceId, c: &ConstraintSet) {
    buf.extend_from_slice(&resource_id.to_le_bytes());
    buf.extend_from_slice(&c.mask.bits().to_le_bytes());
    buf.extend_from_slice(&c.frequency.to_le_bytes());
    buf.extend_from_slice(&c.bandwidth.to_le_bytes());
    buf.extend_from_slice(&c.latency.to_le_bytes());
}

/// Encode a message. Fails only for a name that does not fit its field.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(ACTION_SIZE + CONSTRAINTS_PAYLOAD_SIZE);
    buf.extend_from_slice(&msg.action().as_u32().to_le_bytes());
    match msg {
        Message::Connect | Message::Disconnect => {}
        Message::Request { name, args } => {
            buf.extend_from_slice(&encode_resource_name(name)?);
            buf.extend_from_slice(args);
        }
        Message::Release { resource_id } => {
            buf.extend_from_slice(&resource_id.to_le_bytes());
        }
        Message::SetConstraints {
            resource_id,
            constraints,
        }
        | Message::ClearConstraints {
            resource_id,
            constraints,
        } => write_constraints(&mut buf, *resource_id, constraints),
        Message::RequestData { resource_id, kind } => {
            buf.extend_from_slice(&resource_id.to_le_bytes());
            buf.extend_from_slice(&kind.to_le_bytes());
        }
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Acknowledgments (host -> remote)
// ---------------------------------------------------------------------------

/// Generic ack: `{ action, status, extra }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub action: u32,
    pub status: i32,
    pub payload: Vec<u8>,
}

/// REQUEST ack: `{ action, status, resource_id, base_address, extra }`.
///
/// `resource_id` and `base_address` are zero on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAck {
    pub status: i32,
    pub resource_id: InstanceId,
    pub base_address: u32,
    pub payload: Vec<u8>,
}

impl RequestAck {
    pub fn failed(status: i32) -> Self {
        Self {
            status,
            resource_id: 0,
            base_address: 0,
            payload: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack(Ack),
    Request(RequestAck),
}

impl Reply {
    pub fn ack(action: u32, status: i32) -> Self {
        Self::Ack(Ack {
            action,
            status,
            payload: Vec::new(),
        })
    }

    pub fn ack_with(action: u32, status: i32, payload: Vec<u8>) -> Self {
        Self::Ack(Ack {
            action,
            status,
            payload,
        })
    }

    pub fn action(&self) -> u32 {
        match self {
            Self::Ack(a) => a.action,
            Self::Request(_) => ACTION_REQUEST,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            Self::Ack(a) => a.status,
            Self::Request(r) => r.status,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Ack(a) => &a.payload,
            Self::Request(r) => &r.payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_ACK_HEADER_SIZE + self.payload().len());
        buf.extend_from_slice(&self.action().to_le_bytes());
        buf.extend_from_slice(&self.status().to_le_bytes());
        if let Self::Request(r) = self {
            buf.extend_from_slice(&r.resource_id.to_le_bytes());
            buf.extend_from_slice(&r.base_address.to_le_bytes());
        }
        buf.extend_from_slice(self.payload());
        buf
    }
}

/// Decode an acknowledgment.
///
/// The layout is chosen by the leading action code: REQUEST acks carry
/// the id and base, everything else the generic header.
pub fn parse_reply(buf: &[u8]) -> Result<Reply> {
    let action = read_u32_le(buf, 0)?;
    let status = read_i32_le(buf, 4)?;
    if action == ACTION_REQUEST {
        let resource_id = read_u32_le(buf, 8)?;
        let base_address = read_u32_le(buf, 12)?;
        return Ok(Reply::Request(RequestAck {
            status,
            resource_id,
            base_address,
            payload: buf[REQUEST_ACK_HEADER_SIZE..].to_vec(),
        }));
    }
    Ok(Reply::ack_with(
        action,
        status,
        buf[ACK_HEADER_SIZE..].to_vec(),
    ))
}
