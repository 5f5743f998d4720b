// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Back-end operation set.
//
// A resource type is implemented by a back-end driver exposing the
// `ResourceOps` capability set. The core never looks inside a back-end
// handle: it stores it, hands it back, and moves it into `release`.

pub mod sim;

use crate::connection::ConnectionId;
use crate::constraint::ConstraintKind;
use crate::error::BackendError;

pub use sim::{BackendSpec, SimClock, SimRegulator};

/// Opaque token identifying one acquisition inside a back-end.
///
/// Deliberately neither `Clone` nor `Copy`: whoever holds it owns the
/// acquisition, and `release` consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BackendHandle(u64);

impl BackendHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value, meaningful only to the back-end that created it.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Result of a successful `request`.
#[derive(Debug)]
pub struct Grant {
    pub handle: BackendHandle,
    /// Device address of the resource as seen by the remote processor.
    pub base: u32,
    /// Extra bytes appended verbatim to the REQUEST acknowledgment.
    pub response: Vec<u8>,
}

impl Grant {
    pub fn new(handle: BackendHandle, base: u32) -> Self {
        Self {
            handle,
            base,
            response: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: Vec<u8>) -> Self {
        self.response = response;
        self
    }
}

/// Capability set of a resource type.
///
/// `request` and `release` are mandatory; everything else defaults to
/// `-EOPNOTSUPP`. Calls are synchronous and expected to be bounded.
/// Back-ends that model a physical resource shared by several handles
/// own the arbitration between requesters.
pub trait ResourceOps: Send + Sync {
    /// Acquire a resource. `args` is the type-specific tail of the
    /// REQUEST message.
    fn request(&self, args: &[u8]) -> Result<Grant, BackendError>;

    /// Release an acquisition. The handle is gone afterwards whatever
    /// the outcome.
    fn release(&self, handle: BackendHandle) -> Result<(), BackendError>;

    /// Human-readable description of the acquisition.
    fn get_info(&self, _handle: &BackendHandle) -> Result<String, BackendError> {
        Err(BackendError::unsupported("get_info"))
    }

    fn scale(
        &self,
        _requester: ConnectionId,
        _handle: &BackendHandle,
        _frequency: i64,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("scale"))
    }

    fn set_latency(
        &self,
        _requester: ConnectionId,
        _handle: &BackendHandle,
        _latency: i64,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("set_latency"))
    }

    fn set_bandwidth(
        &self,
        _requester: ConnectionId,
        _handle: &BackendHandle,
        _bandwidth: i64,
    ) -> Result<(), BackendError> {
        Err(BackendError::unsupported("set_bandwidth"))
    }

    fn max_frequency(&self, _handle: &BackendHandle) -> Result<u64, BackendError> {
        Err(BackendError::unsupported("max_frequency"))
    }

    /// Value meaning "no constraint" for `kind`, used by CLEAR_CONSTRAINTS.
    fn unconstrained(&self, kind: ConstraintKind) -> i64 {
        kind.default_unconstrained()
    }
}
