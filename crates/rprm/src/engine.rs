// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Resource manager core.
//
// Owns the registry and the connection table, implements the resource
// operations, and turns one wire message into exactly one acknowledgment.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConfigError, ManagerConfig};
use crate::connection::{
    ConnectionId, ConnectionTable, InstanceId, ResourceInstance, TeardownReport, Unrecorded,
};
use crate::constraint::{self, ConstraintMask, ConstraintSet};
use crate::error::{ResmgrError, Result};
use crate::protocol::{
    self, Message, Reply, RequestAck, ACTION_CLEAR_CONSTRAINTS, ACTION_CONNECT,
    ACTION_DISCONNECT, ACTION_INVALID, ACTION_RELEASE, ACTION_REQUEST, ACTION_REQ_DATA,
    ACTION_SET_CONSTRAINTS, DATA_MAX_FREQUENCY, REQUEST_ACK_HEADER_SIZE,
};
use crate::registry::{Registry, ResourceType};

/// Successful REQUEST outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestGrant {
    pub id: InstanceId,
    pub base: u32,
    /// Back-end bytes appended to the acknowledgment.
    pub response: Vec<u8>,
}

/// One live instance as seen by [`ResourceManager::snapshot`].
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub resource: String,
    pub owner: String,
    pub base: u32,
    pub constraints: ConstraintSet,
    /// Back-end description, `None` when the back-end has none.
    pub info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub age: Duration,
    pub instances: Vec<InstanceSnapshot>,
}

/// The resource manager. `Send + Sync`, shared behind `Arc` by transports.
#[derive(Debug)]
pub struct ResourceManager {
    config: ManagerConfig,
    registry: Registry,
    connections: ConnectionTable,
}

impl ResourceManager {
    /// Create a manager with an empty registry.
    pub fn new(config: ManagerConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let connections = ConnectionTable::new(
            config.max_connections,
            config.max_instances_per_connection,
        );
        Ok(Self {
            config,
            registry: Registry::new(),
            connections,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    // -----------------------------------------------------------------------
    // Back-end registration
    // -----------------------------------------------------------------------

    pub fn register_resource_type(&self, ty: ResourceType) -> Result<()> {
        self.registry.register(ty)
    }

    pub fn unregister_resource_type(&self, name: &str) -> Result<()> {
        self.registry.unregister(name)
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    pub fn open_connection(&self) -> Result<ConnectionId> {
        let id = self.connections.open_connection()?;
        info!("Connection {} opened", id);
        Ok(id)
    }

    /// Close a connection, releasing every instance it still holds.
    pub fn close_connection(&self, id: ConnectionId) -> Result<TeardownReport> {
        let report = self
            .connections
            .close_connection(id, |conn, instance| self.release_instance(conn, instance))?;
        for (instance, e) in &report.failures {
            warn!(
                "Connection {}: release of resource {} failed: {}",
                id, instance, e
            );
        }
        info!(
            "Connection {} closed, {} resources released, {} failures",
            id,
            report.released.len(),
            report.failures.len()
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Resource lifecycle
    // -----------------------------------------------------------------------

    /// Acquire a resource of type `name` for connection `conn`.
    pub fn request(&self, conn: ConnectionId, name: &str, args: &[u8]) -> Result<RequestGrant> {
        let connection = self.connections.get(conn)?;
        let resource = self.registry.lookup(name)?;

        let mut connection = connection.lock();
        connection.ensure_open()?;

        let grant = resource.ops().request(args)?;
        let response = grant.response.clone();
        let base = grant.base;

        let recorded = if REQUEST_ACK_HEADER_SIZE + response.len() > self.config.max_message_size
        {
            Err(Unrecorded {
                error: ResmgrError::ResourceExhausted(format!(
                    "'{}' response of {} bytes does not fit the channel",
                    name,
                    response.len()
                )),
                resource,
                grant,
            })
        } else {
            connection.allocate_instance(resource, grant)
        };

        match recorded {
            Ok(id) => {
                debug!(
                    "Connection {}: '{}' granted as resource {} base=0x{:08x}",
                    conn, name, id, base
                );
                Ok(RequestGrant { id, base, response })
            }
            Err(Unrecorded {
                error,
                resource,
                grant,
            }) => {
                if let Err(e) = resource.ops().release(grant.handle) {
                    warn!(
                        "Connection {}: releasing unrecorded '{}' grant failed: {}",
                        conn, name, e
                    );
                }
                Err(error)
            }
        }
    }

    /// Release one instance.
    pub fn release(&self, conn: ConnectionId, id: InstanceId) -> Result<()> {
        let connection = self.connections.get(conn)?;
        let mut connection = connection.lock();
        connection.ensure_open()?;
        let instance = connection.remove_instance(id)?;
        self.release_instance(conn, instance)
    }

    /// Common release path: drop active constraints, then hand the handle
    /// back. The instance slot is already gone when this runs.
    fn release_instance(&self, conn: ConnectionId, instance: ResourceInstance) -> Result<()> {
        let id = instance.id();
        let (resource, handle, mut constraints) = instance.into_parts();
        let ops = resource.ops();

        for kind in constraints.mask.kinds() {
            if let Err(e) = constraint::clear(ops, conn, &handle, &mut constraints, kind.mask()) {
                warn!(
                    "Connection {}: clearing {} on resource {} failed: {}",
                    conn,
                    kind.name(),
                    id,
                    e
                );
            }
        }

        let outcome = ops.release(handle).map_err(ResmgrError::from);
        debug!(
            "Connection {}: resource {} ('{}') released, ok={}",
            conn,
            id,
            resource.name(),
            outcome.is_ok()
        );
        outcome
    }

    // -----------------------------------------------------------------------
    // Constraints and queries
    // -----------------------------------------------------------------------

    pub fn set_constraints(
        &self,
        conn: ConnectionId,
        id: InstanceId,
        request: &ConstraintSet,
    ) -> Result<()> {
        let connection = self.connections.get(conn)?;
        let mut connection = connection.lock();
        connection.ensure_open()?;
        let (ops, handle, stored) = connection.resolve_mut(id)?.parts_mut();
        constraint::apply(ops, conn, handle, stored, request)
    }

    pub fn clear_constraints(
        &self,
        conn: ConnectionId,
        id: InstanceId,
        mask: ConstraintMask,
    ) -> Result<()> {
        let connection = self.connections.get(conn)?;
        let mut connection = connection.lock();
        connection.ensure_open()?;
        let (ops, handle, stored) = connection.resolve_mut(id)?.parts_mut();
        constraint::clear(ops, conn, handle, stored, mask)
    }

    /// Informational query. Only [`DATA_MAX_FREQUENCY`] is defined.
    pub fn request_data(&self, conn: ConnectionId, id: InstanceId, kind: u32) -> Result<u64> {
        let connection = self.connections.get(conn)?;
        let connection = connection.lock();
        connection.ensure_open()?;
        let instance = connection.resolve(id)?;
        match kind {
            DATA_MAX_FREQUENCY => instance
                .resource()
                .ops()
                .max_frequency(instance.handle())
                .map_err(ResmgrError::from),
            other => Err(ResmgrError::UnsupportedRequest(other)),
        }
    }

    // -----------------------------------------------------------------------
    // Wire entry point
    // -----------------------------------------------------------------------

    /// Process one inbound message and return the encoded acknowledgment.
    ///
    /// `bound` is the connection bound to the delivering channel; CONNECT
    /// sets it and DISCONNECT clears it.
    pub fn handle_message(&self, bound: &mut Option<ConnectionId>, bytes: &[u8]) -> Vec<u8> {
        let Some(action) = protocol::peek_action(bytes) else {
            warn!("Dropping {}-byte buffer without action code", bytes.len());
            let status = ResmgrError::MalformedMessage("short buffer".into()).status();
            return Reply::ack(ACTION_INVALID, status).encode();
        };

        let reply = match protocol::parse_message(bytes, self.config.max_message_size) {
            Ok(msg) => {
                debug!("Channel {:?}: {:?}", bound, msg);
                match self.dispatch(bound, msg) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("Channel {:?}: action {} failed: {}", bound, action, e);
                        failure_reply(action, &e)
                    }
                }
            }
            Err(e) => {
                warn!("Channel {:?}: rejected action {}: {}", bound, action, e);
                failure_reply(action, &e)
            }
        };
        reply.encode()
    }

    fn dispatch(&self, bound: &mut Option<ConnectionId>, msg: Message) -> Result<Reply> {
        let reply = match msg {
            Message::Connect => {
                if let Some(id) = *bound {
                    return Err(ResmgrError::AlreadyConnected(id));
                }
                let id = self.open_connection()?;
                *bound = Some(id);
                Reply::ack_with(ACTION_CONNECT, 0, id.to_le_bytes().to_vec())
            }
            Message::Disconnect => {
                let conn = bound_connection(bound)?;
                *bound = None;
                self.close_connection(conn)?;
                Reply::ack(ACTION_DISCONNECT, 0)
            }
            Message::Request { name, args } => {
                let grant = self.request(bound_connection(bound)?, &name, &args)?;
                Reply::Request(RequestAck {
                    status: 0,
                    resource_id: grant.id,
                    base_address: grant.base,
                    payload: grant.response,
                })
            }
            Message::Release { resource_id } => {
                self.release(bound_connection(bound)?, resource_id)?;
                Reply::ack(ACTION_RELEASE, 0)
            }
            Message::SetConstraints {
                resource_id,
                constraints,
            } => {
                self.set_constraints(bound_connection(bound)?, resource_id, &constraints)?;
                Reply::ack(ACTION_SET_CONSTRAINTS, 0)
            }
            Message::ClearConstraints {
                resource_id,
                constraints,
            } => {
                self.clear_constraints(bound_connection(bound)?, resource_id, constraints.mask)?;
                Reply::ack(ACTION_CLEAR_CONSTRAINTS, 0)
            }
            Message::RequestData { resource_id, kind } => {
                let value = self.request_data(bound_connection(bound)?, resource_id, kind)?;
                Reply::ack_with(ACTION_REQ_DATA, 0, value.to_le_bytes().to_vec())
            }
        };
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Introspection and shutdown
    // -----------------------------------------------------------------------

    /// Current state of every open connection, sorted by id.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let mut out = Vec::new();
        for id in self.connections.ids() {
            let Ok(connection) = self.connections.get(id) else {
                continue;
            };
            let connection = connection.lock();
            let instances = connection
                .instances()
                .map(|inst| InstanceSnapshot {
                    id: inst.id(),
                    resource: inst.resource().name().to_string(),
                    owner: inst.resource().owner().to_string(),
                    base: inst.base(),
                    constraints: *inst.constraints(),
                    info: inst.resource().ops().get_info(inst.handle()).ok(),
                })
                .collect();
            out.push(ConnectionSnapshot {
                id,
                age: connection.opened_at().elapsed(),
                instances,
            });
        }
        out
    }

    /// Close every connection, then empty the registry.
    pub fn shutdown(&self) -> Result<Vec<TeardownReport>> {
        let mut reports = Vec::new();
        for id in self.connections.ids() {
            match self.close_connection(id) {
                Ok(report) => reports.push(report),
                // Closed concurrently by its channel.
                Err(ResmgrError::UnknownConnection(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.registry.shutdown()?;
        info!("Resource manager shut down, {} connections closed", reports.len());
        Ok(reports)
    }
}

/// Connection bound to the channel. Ids start at 1, so 0 reports
/// "nothing bound".
fn bound_connection(bound: &Option<ConnectionId>) -> Result<ConnectionId> {
    bound.ok_or(ResmgrError::UnknownConnection(0))
}

/// Acknowledgment for a failed message. REQUEST failures keep the REQUEST
/// layout with zero id and base.
fn failure_reply(action: u32, error: &ResmgrError) -> Reply {
    if action == ACTION_REQUEST {
        Reply::Request(RequestAck::failed(error.status()))
    } else {
        Reply::ack(action, error.status())
    }
}
