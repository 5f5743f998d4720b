// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote processor resource manager.
//!
//! Brokers host resources (clocks, power domains, peripherals) on behalf of
//! firmware running on a remote processor. The remote side acquires a named
//! resource, gets back an id and a base address, adjusts its operating
//! constraints, and releases it. Back-ends registered by the host implement
//! each resource type.
//!
//! # Architecture
//!
//! ```text
//! Remote firmware              ResourceManager (this crate)         Back-end
//!        |                                |                            |
//!        |--- CONNECT ------------------>|                            |
//!        |--- REQUEST("gpio-clk") ------>|--- request(args) --------->|
//!        |<-- ack(id, base) -------------|<-- Grant ------------------|
//!        |--- SET_CONSTRAINTS(SCALE) --->|--- scale(conn, freq) ----->|
//!        |--- RELEASE(id) -------------->|--- release(handle) ------->|
//!        |--- DISCONNECT --------------->|--- release(remaining) ---->|
//! ```
//!
//! Every message gets exactly one acknowledgment, errors included.
//!
//! # Wire actions
//!
//! | Action | Code | Payload |
//! |--------|------|---------|
//! | CONNECT | 0 | none |
//! | DISCONNECT | 1 | none |
//! | REQUEST | 2 | name[16] + args |
//! | RELEASE | 3 | id |
//! | SET_CONSTRAINTS | 4 | id, mask, frequency, bandwidth, latency |
//! | CLEAR_CONSTRAINTS | 5 | id, mask, (ignored values) |
//! | REQ_DATA | 6 | id, kind |

pub mod backend;
pub mod client;
pub mod config;
pub mod connection;
pub mod constraint;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-exports for convenience.
pub use backend::{BackendHandle, BackendSpec, Grant, ResourceOps, SimClock, SimRegulator};
pub use client::{Client, ClientError};
pub use config::{ConfigError, ManagerConfig};
pub use connection::{ConnectionId, InstanceId, TeardownReport};
pub use constraint::{ConstraintKind, ConstraintMask, ConstraintSet};
pub use engine::{ConnectionSnapshot, InstanceSnapshot, RequestGrant, ResourceManager};
pub use error::{BackendError, ResmgrError, Result};
pub use protocol::{Action, Message, Reply};
pub use registry::{Registry, ResourceType, TypeRef};
pub use transport::{
    serve_channel, Channel, ChannelSession, LoopbackChannel, TcpChannel, TransportError,
};
