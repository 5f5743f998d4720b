// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote-side client stub.
//!
//! Encodes requests, waits for the matching acknowledgment and turns a
//! non-zero status into [`ClientError::Status`].

use thiserror::Error;

use crate::connection::{ConnectionId, InstanceId};
use crate::constraint::{ConstraintMask, ConstraintSet};
use crate::engine::RequestGrant;
use crate::error::ResmgrError;
use crate::protocol::{self, Message, Reply, DATA_MAX_FREQUENCY};
use crate::transport::{Channel, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ResmgrError),

    /// The host answered with a non-zero status.
    #[error("{action} failed with status {status}")]
    Status { action: &'static str, status: i32 },

    #[error("channel closed while waiting for {0} ack")]
    NoReply(&'static str),

    #[error("unexpected reply to {action}: action code {got}")]
    Mismatch { action: &'static str, got: u32 },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Synchronous client over any [`Channel`].
#[derive(Debug)]
pub struct Client<C: Channel> {
    channel: C,
    connection: Option<ConnectionId>,
}

impl<C: Channel> Client<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            connection: None,
        }
    }

    /// Connection id reported by the host, once connected.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Send raw bytes and return the decoded acknowledgment as-is.
    pub fn call_raw(&mut self, bytes: &[u8]) -> ClientResult<Reply> {
        self.channel.send(bytes)?;
        let reply = self
            .channel
            .recv()?
            .ok_or(ClientError::NoReply("raw"))?;
        Ok(protocol::parse_reply(&reply)?)
    }

    fn call(&mut self, msg: &Message) -> ClientResult<Reply> {
        let action = msg.action();
        self.channel.send(&protocol::serialize_message(msg)?)?;
        let bytes = self
            .channel
            .recv()?
            .ok_or(ClientError::NoReply(action.name()))?;
        let reply = protocol::parse_reply(&bytes)?;
        if reply.action() != action.as_u32() {
            return Err(ClientError::Mismatch {
                action: action.name(),
                got: reply.action(),
            });
        }
        if reply.status() != 0 {
            return Err(ClientError::Status {
                action: action.name(),
                status: reply.status(),
            });
        }
        Ok(reply)
    }

    pub fn connect(&mut self) -> ClientResult<ConnectionId> {
        let reply = self.call(&Message::Connect)?;
        let id = protocol::read_u32_le(reply.payload(), 0)?;
        self.connection = Some(id);
        Ok(id)
    }

    pub fn disconnect(&mut self) -> ClientResult<()> {
        self.call(&Message::Disconnect)?;
        self.connection = None;
        Ok(())
    }

    pub fn request(&mut self, name: &str, args: &[u8]) -> ClientResult<RequestGrant> {
        let reply = self.call(&Message::Request {
            name: name.to_string(),
            args: args.to_vec(),
        })?;
        match reply {
            Reply::Request(ack) => Ok(RequestGrant {
                id: ack.resource_id,
                base: ack.base_address,
                response: ack.payload,
            }),
            Reply::Ack(ack) => Err(ClientError::Mismatch {
                action: "REQUEST",
                got: ack.action,
            }),
        }
    }

    pub fn release(&mut self, resource_id: InstanceId) -> ClientResult<()> {
        self.call(&Message::Release { resource_id })?;
        Ok(())
    }

    pub fn set_constraints(
        &mut self,
        resource_id: InstanceId,
        constraints: ConstraintSet,
    ) -> ClientResult<()> {
        self.call(&Message::SetConstraints {
            resource_id,
            constraints,
        })?;
        Ok(())
    }

    pub fn clear_constraints(
        &mut self,
        resource_id: InstanceId,
        mask: ConstraintMask,
    ) -> ClientResult<()> {
        self.call(&Message::ClearConstraints {
            resource_id,
            constraints: ConstraintSet {
                mask,
                ..Default::default()
            },
        })?;
        Ok(())
    }

    pub fn max_frequency(&mut self, resource_id: InstanceId) -> ClientResult<u64> {
        let reply = self.call(&Message::RequestData {
            resource_id,
            kind: DATA_MAX_FREQUENCY,
        })?;
        Ok(protocol::read_u64_le(reply.payload(), 0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimClock;
    use crate::config::ManagerConfig;
    use crate::engine::ResourceManager;
    use crate::registry::ResourceType;
    use crate::transport::{serve_channel, LoopbackChannel};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    fn spawn_host() -> (Client<LoopbackChannel>, JoinHandle<()>) {
        let rm = ResourceManager::new(ManagerConfig::default()).unwrap();
        rm.register_resource_type(ResourceType::new(
            "clk",
            "test",
            SimClock::new(0x4000_0000, 800),
        ))
        .unwrap();
        let rm = Arc::new(rm);
        let (mut host, remote) = LoopbackChannel::pair();
        let handle = std::thread::spawn(move || {
            serve_channel(rm, &mut host).unwrap();
        });
        (Client::new(remote), handle)
    }

    #[test]
    fn test_client_session() {
        let (mut client, host) = spawn_host();
        assert_eq!(client.connect().unwrap(), 1);

        let grant = client.request("clk", &[]).unwrap();
        assert_eq!(grant.id, 1);
        assert_eq!(grant.base, 0x4000_0000);
        assert_eq!(client.max_frequency(grant.id).unwrap(), 800);

        client
            .set_constraints(grant.id, ConstraintSet::new().with_scale(400))
            .unwrap();
        client
            .clear_constraints(grant.id, ConstraintMask::SCALE)
            .unwrap();
        client.release(grant.id).unwrap();
        client.disconnect().unwrap();
        assert!(client.connection().is_none());

        drop(client);
        host.join().unwrap();
    }

    #[test]
    fn test_client_status_error() {
        let (mut client, host) = spawn_host();
        client.connect().unwrap();

        match client.request("missing", &[]) {
            Err(ClientError::Status { action, status }) => {
                assert_eq!(action, "REQUEST");
                assert_eq!(status, -2);
            }
            other => panic!("expected status error, got {:?}", other),
        }
        match client.set_constraints(1, ConstraintSet::new().with_scale(5_000)) {
            Err(ClientError::Status { status, .. }) => assert_eq!(status, -9),
            other => panic!("expected status error, got {:?}", other),
        }

        drop(client);
        host.join().unwrap();
    }
}
