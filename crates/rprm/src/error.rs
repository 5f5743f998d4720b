// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types and their wire status codes.

use thiserror::Error;

// Linux errno values used as acknowledgment status codes.
pub const EIO: i32 = 5;
pub const ENOENT: i32 = 2;
pub const EBADF: i32 = 9;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const ERANGE: i32 = 34;
pub const ENOSYS: i32 = 38;
pub const EOPNOTSUPP: i32 = 95;
pub const EISCONN: i32 = 106;
pub const ENOTCONN: i32 = 107;

/// Error reported by a resource back-end.
///
/// `code` is forwarded to the remote client verbatim as the ack status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("back-end error {code}: {reason}")]
pub struct BackendError {
    pub code: i32,
    pub reason: String,
}

impl BackendError {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The back-end does not implement this operation.
    pub fn unsupported(op: &str) -> Self {
        Self::new(-EOPNOTSUPP, format!("{} not supported", op))
    }
}

/// Errors produced by the resource manager core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResmgrError {
    /// Bad length, truncated buffer or invalid field.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Action code not part of the protocol.
    #[error("unknown action code {0}")]
    UnknownAction(u32),

    /// No such connection (never opened, or already closed).
    #[error("unknown connection {0}")]
    UnknownConnection(u32),

    /// The channel already has a bound connection.
    #[error("channel already bound to connection {0}")]
    AlreadyConnected(u32),

    /// No such resource instance on the connection.
    #[error("unknown resource {resource} on connection {connection}")]
    UnknownResource { connection: u32, resource: u32 },

    /// No resource type with that name is registered.
    #[error("resource type not found: {0}")]
    NotFound(String),

    /// A resource type with that name is already registered.
    #[error("resource type already registered: {0}")]
    DuplicateName(String),

    /// Resource type name is empty, too long or contains NUL.
    #[error("invalid resource type name: {0:?}")]
    InvalidName(String),

    /// The resource type still has live references.
    #[error("resource type in use: {name} ({refs} references)")]
    InUse { name: String, refs: usize },

    /// A configured limit was reached.
    #[error("limit reached: {0}")]
    ResourceExhausted(String),

    /// The back-end declined the operation.
    #[error(transparent)]
    BackendRejected(#[from] BackendError),

    /// Informational query kind not implemented.
    #[error("unsupported request kind {0}")]
    UnsupportedRequest(u32),
}

impl ResmgrError {
    /// Wire status code for this error. Never zero.
    pub fn status(&self) -> i32 {
        match self {
            Self::MalformedMessage(_) | Self::InvalidName(_) => -EINVAL,
            Self::UnknownAction(_) => -ENOSYS,
            Self::UnknownConnection(_) => -ENOTCONN,
            Self::AlreadyConnected(_) => -EISCONN,
            Self::UnknownResource { .. } => -EBADF,
            Self::NotFound(_) => -ENOENT,
            Self::DuplicateName(_) => -EEXIST,
            Self::InUse { .. } => -EBUSY,
            Self::ResourceExhausted(_) => -ENOSPC,
            Self::UnsupportedRequest(_) => -EOPNOTSUPP,
            Self::BackendRejected(e) => {
                if e.code == 0 {
                    -EIO
                } else {
                    e.code
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ResmgrError>;
