// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource type registry.
//!
//! Maps a resource type name to its descriptor. Lookups take a counted
//! reference ([`TypeRef`]) on the descriptor; a type cannot be unregistered
//! while any reference is alive. The reference is taken under the read lock
//! and checked under the write lock, so a lookup racing an unregister either
//! sees the type and pins it, or does not see it at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::backend::ResourceOps;
use crate::error::{ResmgrError, Result};

/// Longest accepted type name. The wire field is 16 bytes and the remote
/// side NUL-terminates it.
pub const MAX_NAME_LEN: usize = 15;

/// Check that `name` fits the 16-byte wire field.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(ResmgrError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A registered resource type: name, owner, and operation set.
pub struct ResourceType {
    name: String,
    owner: String,
    ops: Box<dyn ResourceOps>,
    refs: AtomicUsize,
}

impl ResourceType {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        ops: impl ResourceOps + 'static,
    ) -> Self {
        Self::from_boxed(name, owner, Box::new(ops))
    }

    pub fn from_boxed(
        name: impl Into<String>,
        owner: impl Into<String>,
        ops: Box<dyn ResourceOps>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            ops,
            refs: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module or driver that registered the type.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ops(&self) -> &dyn ResourceOps {
        self.ops.as_ref()
    }

    /// Number of live references (instances plus in-flight requests).
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("refs", &self.refs())
            .finish_non_exhaustive()
    }
}

/// Counted reference on a registered [`ResourceType`].
///
/// Dropping it releases the reference.
pub struct TypeRef {
    inner: Arc<ResourceType>,
}

impl TypeRef {
    fn acquire(inner: &Arc<ResourceType>) -> Self {
        inner.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(inner),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn owner(&self) -> &str {
        self.inner.owner()
    }

    pub fn ops(&self) -> &dyn ResourceOps {
        self.inner.ops()
    }
}

impl Clone for TypeRef {
    fn clone(&self) -> Self {
        Self::acquire(&self.inner)
    }
}

impl Drop for TypeRef {
    fn drop(&mut self) {
        self.inner.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeRef").field(&self.inner.name).finish()
    }
}

/// Name-indexed set of resource types.
#[derive(Debug, Default)]
pub struct Registry {
    types: RwLock<HashMap<String, Arc<ResourceType>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type.
    pub fn register(&self, ty: ResourceType) -> Result<()> {
        validate_name(ty.name())?;
        let mut types = self.types.write();
        if types.contains_key(ty.name()) {
            return Err(ResmgrError::DuplicateName(ty.name().to_string()));
        }
        info!("Registered resource type '{}' (owner {})", ty.name(), ty.owner());
        types.insert(ty.name().to_string(), Arc::new(ty));
        Ok(())
    }

    /// Remove a resource type that nobody references.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut types = self.types.write();
        let refs = types
            .get(name)
            .map(|ty| ty.refs())
            .ok_or_else(|| ResmgrError::NotFound(name.to_string()))?;
        if refs > 0 {
            return Err(ResmgrError::InUse {
                name: name.to_string(),
                refs,
            });
        }
        types.remove(name);
        info!("Unregistered resource type '{}'", name);
        Ok(())
    }

    /// Find a type and take a reference on it.
    pub fn lookup(&self, name: &str) -> Result<TypeRef> {
        let types = self.types.read();
        let ty = types
            .get(name)
            .ok_or_else(|| ResmgrError::NotFound(name.to_string()))?;
        Ok(TypeRef::acquire(ty))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Drop every type. Fails without removing anything if one of them is
    /// still referenced.
    pub fn shutdown(&self) -> Result<()> {
        let mut types = self.types.write();
        if let Some(ty) = types.values().find(|ty| ty.refs() > 0) {
            return Err(ResmgrError::InUse {
                name: ty.name().to_string(),
                refs: ty.refs(),
            });
        }
        debug!("Registry shutdown, dropping {} types", types.len());
        types.clear();
        Ok(())
    }
}
