// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and resource handle bookkeeping.
//!
//! Each connection owns a table of resource instances keyed by a numeric
//! id local to the connection. The connection table hands out connection
//! ids monotonically and never reuses them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::backend::{BackendHandle, Grant, ResourceOps};
use crate::constraint::ConstraintSet;
use crate::error::{ResmgrError, Result};
use crate::registry::TypeRef;

/// Connection identifier, unique for the lifetime of the manager.
pub type ConnectionId = u32;

/// Resource instance identifier, unique within its connection.
pub type InstanceId = u32;

/// One live acquisition of a resource by one connection.
#[derive(Debug)]
pub struct ResourceInstance {
    id: InstanceId,
    resource: TypeRef,
    handle: BackendHandle,
    base: u32,
    constraints: ConstraintSet,
}

impl ResourceInstance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn resource(&self) -> &TypeRef {
        &self.resource
    }

    pub fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Split into the pieces needed by the release path.
    pub fn into_parts(self) -> (TypeRef, BackendHandle, ConstraintSet) {
        (self.resource, self.handle, self.constraints)
    }

    /// Back-end handle and stored constraints, borrowed together.
    pub(crate) fn parts_mut(&mut self) -> (&dyn ResourceOps, &BackendHandle, &mut ConstraintSet) {
        (self.resource.ops(), &self.handle, &mut self.constraints)
    }
}

/// A grant the connection refused to record.
///
/// The caller must hand `grant.handle` back to the back-end.
#[derive(Debug)]
pub struct Unrecorded {
    pub error: ResmgrError,
    pub resource: TypeRef,
    pub grant: Grant,
}

/// A client session and the instances it owns.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    instances: BTreeMap<InstanceId, ResourceInstance>,
    next_instance: InstanceId,
    max_instances: usize,
    closed: bool,
    opened_at: Instant,
}

impl Connection {
    fn new(id: ConnectionId, max_instances: usize) -> Self {
        Self {
            id,
            instances: BTreeMap::new(),
            next_instance: 1,
            max_instances,
            closed: false,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Fails with `UnknownConnection` once teardown has started. A closed
    /// connection accepts nothing, even from callers that resolved it
    /// before the close.
    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ResmgrError::UnknownConnection(self.id));
        }
        Ok(())
    }

    /// Record a granted resource and return its new id.
    ///
    /// On failure the grant comes back untouched so it can be released.
    pub fn allocate_instance(
        &mut self,
        resource: TypeRef,
        grant: Grant,
    ) -> std::result::Result<InstanceId, Unrecorded> {
        let refused = if self.closed {
            Some(ResmgrError::UnknownConnection(self.id))
        } else if self.instances.len() >= self.max_instances {
            Some(ResmgrError::ResourceExhausted(format!(
                "connection {} holds {} resources",
                self.id, self.max_instances
            )))
        } else if self.next_instance == InstanceId::MAX {
            Some(ResmgrError::ResourceExhausted(format!(
                "connection {} ran out of resource ids",
                self.id
            )))
        } else {
            None
        };
        if let Some(error) = refused {
            return Err(Unrecorded {
                error,
                resource,
                grant,
            });
        }

        let id = self.next_instance;
        self.next_instance += 1;
        self.instances.insert(
            id,
            ResourceInstance {
                id,
                resource,
                handle: grant.handle,
                base: grant.base,
                constraints: ConstraintSet::new(),
            },
        );
        Ok(id)
    }

    /// Look up an instance by id.
    pub fn resolve(&self, id: InstanceId) -> Result<&ResourceInstance> {
        self.instances.get(&id).ok_or(ResmgrError::UnknownResource {
            connection: self.id,
            resource: id,
        })
    }

    pub fn resolve_mut(&mut self, id: InstanceId) -> Result<&mut ResourceInstance> {
        let connection = self.id;
        self.instances
            .get_mut(&id)
            .ok_or(ResmgrError::UnknownResource {
                connection,
                resource: id,
            })
    }

    /// Remove an instance from the table and hand it to the caller.
    pub fn remove_instance(&mut self, id: InstanceId) -> Result<ResourceInstance> {
        self.instances
            .remove(&id)
            .ok_or(ResmgrError::UnknownResource {
                connection: self.id,
                resource: id,
            })
    }

    pub fn instances(&self) -> impl Iterator<Item = &ResourceInstance> {
        self.instances.values()
    }

    /// Mark closed and take every remaining instance.
    fn drain(&mut self) -> Vec<ResourceInstance> {
        self.closed = true;
        std::mem::take(&mut self.instances).into_values().collect()
    }
}

/// Outcome of tearing a connection down.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub connection: ConnectionId,
    /// Instances whose release succeeded.
    pub released: Vec<InstanceId>,
    /// Instances whose release failed; the slot was freed regardless.
    pub failures: Vec<(InstanceId, ResmgrError)>,
}

impl TeardownReport {
    /// Number of release attempts made.
    pub fn attempts(&self) -> usize {
        self.released.len() + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// All open connections.
#[derive(Debug)]
pub struct ConnectionTable {
    connections: RwLock<HashMap<ConnectionId, Arc<Mutex<Connection>>>>,
    next_id: AtomicU32,
    max_connections: usize,
    max_instances: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize, max_instances: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            max_connections,
            max_instances,
        }
    }

    /// Open a connection with an empty instance table.
    pub fn open_connection(&self) -> Result<ConnectionId> {
        let mut connections = self.connections.write();
        if connections.len() >= self.max_connections {
            return Err(ResmgrError::ResourceExhausted(format!(
                "{} connections open",
                self.max_connections
            )));
        }
        // Stops at MAX: ids are never reused and 0 is never handed out.
        let id = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map_err(|_| ResmgrError::ResourceExhausted("connection ids exhausted".into()))?;
        connections.insert(id, Arc::new(Mutex::new(Connection::new(id, self.max_instances))));
        Ok(id)
    }

    /// Shared handle on an open connection.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<Mutex<Connection>>> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(ResmgrError::UnknownConnection(id))
    }

    /// Remove a connection and pass each remaining instance to `release`.
    ///
    /// Release failures are collected in the report; they never stop the
    /// teardown of the remaining instances.
    pub fn close_connection<F>(&self, id: ConnectionId, mut release: F) -> Result<TeardownReport>
    where
        F: FnMut(ConnectionId, ResourceInstance) -> Result<()>,
    {
        let conn = self
            .connections
            .write()
            .remove(&id)
            .ok_or(ResmgrError::UnknownConnection(id))?;

        let instances = conn.lock().drain();
        let mut report = TeardownReport {
            connection: id,
            ..Default::default()
        };
        for instance in instances {
            let instance_id = instance.id();
            match release(id, instance) {
                Ok(()) => report.released.push(instance_id),
                Err(e) => report.failures.push((instance_id, e)),
            }
        }
        Ok(report)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Open connection ids, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
