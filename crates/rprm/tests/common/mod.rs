// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Shared fixtures for the rprm integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use rprm::{
    serve_channel, BackendError, BackendHandle, Client, ConnectionId, ConstraintMask, Grant,
    LoopbackChannel, ManagerConfig, ResourceManager, ResourceOps, ResourceType,
};

/// One back-end call as observed by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Request,
    Release(u64),
    Scale(ConnectionId, i64),
    Latency(ConnectionId, i64),
    Bandwidth(ConnectionId, i64),
    MaxFrequency(u64),
}

#[derive(Debug, Default)]
struct Inner {
    base: u32,
    next: AtomicU64,
    calls: Mutex<Vec<Call>>,
    live: Mutex<HashSet<u64>>,
    failing: Mutex<ConstraintMask>,
    fail_release: Mutex<bool>,
}

/// Back-end that records every call and tracks outstanding handles.
///
/// Clones share state, so a test can register one clone and inspect
/// another.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Inner>);

impl Recorder {
    pub fn new(base: u32) -> Self {
        Self(Arc::new(Inner {
            base,
            next: AtomicU64::new(1),
            ..Default::default()
        }))
    }

    /// Make the given constraint kinds fail with -ERANGE.
    pub fn fail_constraints(&self, mask: ConstraintMask) {
        *self.0.failing.lock() = mask;
    }

    /// Make `release` report -EIO (the handle is still dropped).
    pub fn fail_release(&self, fail: bool) {
        *self.0.fail_release.lock() = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.0.calls.lock().clear();
    }

    pub fn releases(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Release(_)))
            .count()
    }

    /// Handles granted and not yet released.
    pub fn live(&self) -> usize {
        self.0.live.lock().len()
    }

    fn record(&self, call: Call) {
        self.0.calls.lock().push(call);
    }

    fn constraint(&self, bit: ConstraintMask, call: Call) -> Result<(), BackendError> {
        self.record(call);
        if self.0.failing.lock().contains(bit) {
            return Err(BackendError::new(-34, "out of range"));
        }
        Ok(())
    }
}

impl ResourceOps for Recorder {
    fn request(&self, _args: &[u8]) -> Result<Grant, BackendError> {
        self.record(Call::Request);
        let raw = self.0.next.fetch_add(1, Ordering::Relaxed);
        self.0.live.lock().insert(raw);
        Ok(Grant::new(BackendHandle::new(raw), self.0.base))
    }

    fn release(&self, handle: BackendHandle) -> Result<(), BackendError> {
        self.record(Call::Release(handle.raw()));
        if !self.0.live.lock().remove(&handle.raw()) {
            return Err(BackendError::new(-22, "stale handle"));
        }
        if *self.0.fail_release.lock() {
            return Err(BackendError::new(-5, "release failed"));
        }
        Ok(())
    }

    fn get_info(&self, handle: &BackendHandle) -> Result<String, BackendError> {
        Ok(format!("recorder handle {}", handle.raw()))
    }

    fn scale(
        &self,
        requester: ConnectionId,
        _handle: &BackendHandle,
        frequency: i64,
    ) -> Result<(), BackendError> {
        self.constraint(ConstraintMask::SCALE, Call::Scale(requester, frequency))
    }

    fn set_latency(
        &self,
        requester: ConnectionId,
        _handle: &BackendHandle,
        latency: i64,
    ) -> Result<(), BackendError> {
        self.constraint(ConstraintMask::LATENCY, Call::Latency(requester, latency))
    }

    fn set_bandwidth(
        &self,
        requester: ConnectionId,
        _handle: &BackendHandle,
        bandwidth: i64,
    ) -> Result<(), BackendError> {
        self.constraint(
            ConstraintMask::BANDWIDTH,
            Call::Bandwidth(requester, bandwidth),
        )
    }

    fn max_frequency(&self, handle: &BackendHandle) -> Result<u64, BackendError> {
        self.record(Call::MaxFrequency(handle.raw()));
        Ok(400_000_000)
    }
}

/// Manager with a single recorder registered under `name`.
pub fn manager_with(name: &str, recorder: &Recorder) -> Arc<ResourceManager> {
    let rm = ResourceManager::new(ManagerConfig::default()).unwrap();
    rm.register_resource_type(ResourceType::new(name, "tests", recorder.clone()))
        .unwrap();
    Arc::new(rm)
}

/// Serve a loopback channel on a thread and return the remote-side client.
pub fn attach(
    rm: &Arc<ResourceManager>,
) -> (Client<LoopbackChannel>, JoinHandle<()>) {
    let (mut host, remote) = LoopbackChannel::pair();
    let rm = Arc::clone(rm);
    let handle = std::thread::spawn(move || {
        serve_channel(rm, &mut host).unwrap();
    });
    (Client::new(remote), handle)
}
