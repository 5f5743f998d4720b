// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Constraint tracking and forwarding.
//!
//! A resource instance carries a [`ConstraintSet`]: which of scale, latency
//! and bandwidth are currently requested, and the value for each. The core
//! does not arbitrate between clients. Values are forwarded to the back-end
//! together with the requesting connection id, and the stored set mirrors
//! exactly what the back-end accepted.

use std::fmt;
use std::ops::BitOr;

use crate::backend::{BackendHandle, ResourceOps};
use crate::connection::ConnectionId;
use crate::error::{ResmgrError, Result};

pub const MASK_SCALE: u32 = 0x1;
pub const MASK_LATENCY: u32 = 0x2;
pub const MASK_BANDWIDTH: u32 = 0x4;

/// Bitmask of constraint kinds.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ConstraintMask(u32);

impl ConstraintMask {
    pub const SCALE: Self = Self(MASK_SCALE);
    pub const LATENCY: Self = Self(MASK_LATENCY);
    pub const BANDWIDTH: Self = Self(MASK_BANDWIDTH);
    pub const ALL: Self = Self(MASK_SCALE | MASK_LATENCY | MASK_BANDWIDTH);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a mask from wire bits. Bits outside [`ConstraintMask::ALL`]
    /// are rejected.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::ALL.0 != 0 {
            return Err(ResmgrError::MalformedMessage(format!(
                "unknown constraint bits 0x{:x}",
                bits & !Self::ALL.0
            )));
        }
        Ok(Self(bits))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Kinds present in this mask, in application order.
    pub fn kinds(self) -> impl Iterator<Item = ConstraintKind> {
        ConstraintKind::ORDER
            .into_iter()
            .filter(move |k| self.contains(k.mask()))
    }
}

impl BitOr for ConstraintMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ConstraintMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        let names: Vec<&str> = self.kinds().map(ConstraintKind::name).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// One constraint dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Scale,
    Latency,
    Bandwidth,
}

impl ConstraintKind {
    /// Order in which a multi-bit request is applied.
    pub const ORDER: [ConstraintKind; 3] = [Self::Scale, Self::Latency, Self::Bandwidth];

    pub const fn mask(self) -> ConstraintMask {
        match self {
            Self::Scale => ConstraintMask::SCALE,
            Self::Latency => ConstraintMask::LATENCY,
            Self::Bandwidth => ConstraintMask::BANDWIDTH,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Scale => "scale",
            Self::Latency => "latency",
            Self::Bandwidth => "bandwidth",
        }
    }

    /// "No constraint" value used when a back-end does not override
    /// [`ResourceOps::unconstrained`].
    pub const fn default_unconstrained(self) -> i64 {
        match self {
            Self::Scale => 0,
            Self::Latency | Self::Bandwidth => -1,
        }
    }
}

/// Active constraints plus their values.
///
/// Fields whose bit is not in `mask` are meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstraintSet {
    pub mask: ConstraintMask,
    pub frequency: i64,
    pub bandwidth: i64,
    pub latency: i64,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale(mut self, frequency: i64) -> Self {
        self.set(ConstraintKind::Scale, frequency);
        self
    }

    pub fn with_latency(mut self, latency: i64) -> Self {
        self.set(ConstraintKind::Latency, latency);
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: i64) -> Self {
        self.set(ConstraintKind::Bandwidth, bandwidth);
        self
    }

    pub fn value(&self, kind: ConstraintKind) -> i64 {
        match kind {
            ConstraintKind::Scale => self.frequency,
            ConstraintKind::Latency => self.latency,
            ConstraintKind::Bandwidth => self.bandwidth,
        }
    }

    /// Activate `kind` with `value`.
    pub fn set(&mut self, kind: ConstraintKind, value: i64) {
        match kind {
            ConstraintKind::Scale => self.frequency = value,
            ConstraintKind::Latency => self.latency = value,
            ConstraintKind::Bandwidth => self.bandwidth = value,
        }
        self.mask.insert(kind.mask());
    }

    /// Deactivate `kind` and zero its value.
    pub fn unset(&mut self, kind: ConstraintKind) {
        self.set(kind, 0);
        self.mask.remove(kind.mask());
    }

    pub fn is_active(&self, kind: ConstraintKind) -> bool {
        self.mask.contains(kind.mask())
    }

    /// Active (kind, value) pairs in application order.
    pub fn active(&self) -> impl Iterator<Item = (ConstraintKind, i64)> + '_ {
        self.mask.kinds().map(move |k| (k, self.value(k)))
    }
}

fn forward(
    ops: &dyn ResourceOps,
    kind: ConstraintKind,
    requester: ConnectionId,
    handle: &BackendHandle,
    value: i64,
) -> Result<()> {
    let outcome = match kind {
        ConstraintKind::Scale => ops.scale(requester, handle, value),
        ConstraintKind::Latency => ops.set_latency(requester, handle, value),
        ConstraintKind::Bandwidth => ops.set_bandwidth(requester, handle, value),
    };
    outcome.map_err(ResmgrError::from)
}

/// Apply every field of `request` selected by its mask.
///
/// Fields are applied in [`ConstraintKind::ORDER`]. The first back-end
/// failure stops the call; fields already applied stay applied and are
/// recorded in `stored`.
pub fn apply(
    ops: &dyn ResourceOps,
    requester: ConnectionId,
    handle: &BackendHandle,
    stored: &mut ConstraintSet,
    request: &ConstraintSet,
) -> Result<()> {
    for (kind, value) in request.active() {
        forward(ops, kind, requester, handle, value)?;
        stored.set(kind, value);
    }
    Ok(())
}

/// Reset every kind selected by `mask` to the back-end's unconstrained
/// value. Same short-circuit rule as [`apply`].
pub fn clear(
    ops: &dyn ResourceOps,
    requester: ConnectionId,
    handle: &BackendHandle,
    stored: &mut ConstraintSet,
    mask: ConstraintMask,
) -> Result<()> {
    for kind in mask.kinds() {
        forward(ops, kind, requester, handle, ops.unconstrained(kind))?;
        stored.unset(kind);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Grant;
    use crate::error::BackendError;
    use parking_lot::Mutex;

    /// Records calls; fails any kind listed in `failing`.
    struct Probe {
        calls: Mutex<Vec<(ConstraintKind, i64)>>,
        failing: ConstraintMask,
    }

    impl Probe {
        fn new(failing: ConstraintMask) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing,
            }
        }

        fn record(&self, kind: ConstraintKind, value: i64) -> std::result::Result<(), BackendError> {
            self.calls.lock().push((kind, value));
            if self.failing.contains(kind.mask()) {
                Err(BackendError::new(-34, "rejected"))
            } else {
                Ok(())
            }
        }
    }

    impl ResourceOps for Probe {
        fn request(&self, _args: &[u8]) -> std::result::Result<Grant, BackendError> {
            Ok(Grant::new(BackendHandle::new(1), 0))
        }

        fn release(&self, _handle: BackendHandle) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        fn scale(&self, _: ConnectionId, _: &BackendHandle, v: i64) -> std::result::Result<(), BackendError> {
            self.record(ConstraintKind::Scale, v)
        }

        fn set_latency(&self, _: ConnectionId, _: &BackendHandle, v: i64) -> std::result::Result<(), BackendError> {
            self.record(ConstraintKind::Latency, v)
        }

        fn set_bandwidth(&self, _: ConnectionId, _: &BackendHandle, v: i64) -> std::result::Result<(), BackendError> {
            self.record(ConstraintKind::Bandwidth, v)
        }
    }

    #[test]
    fn test_mask_rejects_unknown_bits() {
        assert!(ConstraintMask::from_bits(0x7).is_ok());
        assert!(matches!(
            ConstraintMask::from_bits(0x8),
            Err(ResmgrError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_mask_kinds_in_order() {
        let mask = ConstraintMask::BANDWIDTH | ConstraintMask::SCALE;
        let kinds: Vec<_> = mask.kinds().collect();
        assert_eq!(kinds, vec![ConstraintKind::Scale, ConstraintKind::Bandwidth]);
        assert_eq!(format!("{:?}", mask), "scale|bandwidth");
    }

    #[test]
    fn test_apply_records_applied_fields() {
        let probe = Probe::new(ConstraintMask::empty());
        let handle = BackendHandle::new(1);
        let mut stored = ConstraintSet::new();
        let request = ConstraintSet::new().with_scale(200).with_bandwidth(800);

        apply(&probe, 1, &handle, &mut stored, &request).unwrap();

        assert_eq!(stored.mask, ConstraintMask::SCALE | ConstraintMask::BANDWIDTH);
        assert_eq!(stored.frequency, 200);
        assert_eq!(stored.bandwidth, 800);
        assert!(!stored.is_active(ConstraintKind::Latency));
    }

    #[test]
    fn test_apply_short_circuits_on_first_failure() {
        let probe = Probe::new(ConstraintMask::SCALE);
        let handle = BackendHandle::new(1);
        let mut stored = ConstraintSet::new();
        let request = ConstraintSet::new().with_scale(200).with_latency(10);

        let err = apply(&probe, 1, &handle, &mut stored, &request).unwrap_err();

        assert_eq!(err.status(), -34);
        assert!(stored.mask.is_empty());
        assert_eq!(*probe.calls.lock(), vec![(ConstraintKind::Scale, 200)]);
    }

    #[test]
    fn test_apply_keeps_fields_before_failure() {
        let probe = Probe::new(ConstraintMask::LATENCY);
        let handle = BackendHandle::new(1);
        let mut stored = ConstraintSet::new();
        let request = ConstraintSet::new()
            .with_scale(100)
            .with_latency(5)
            .with_bandwidth(9);

        assert!(apply(&probe, 1, &handle, &mut stored, &request).is_err());
        assert_eq!(stored.mask, ConstraintMask::SCALE);
        assert_eq!(probe.calls.lock().len(), 2);
    }

    #[test]
    fn test_clear_uses_unconstrained_values() {
        let probe = Probe::new(ConstraintMask::empty());
        let handle = BackendHandle::new(1);
        let mut stored = ConstraintSet::new().with_scale(200).with_latency(7);

        clear(&probe, 1, &handle, &mut stored, ConstraintMask::ALL).unwrap();

        assert!(stored.mask.is_empty());
        assert_eq!(
            *probe.calls.lock(),
            vec![
                (ConstraintKind::Scale, 0),
                (ConstraintKind::Latency, -1),
                (ConstraintKind::Bandwidth, -1),
            ]
        );
    }

    #[test]
    fn test_clear_short_circuits_and_keeps_uncleared_bits() {
        let probe = Probe::new(ConstraintMask::LATENCY);
        let handle = BackendHandle::new(1);
        let mut stored = ConstraintSet::new()
            .with_scale(200)
            .with_latency(7)
            .with_bandwidth(64);

        let err = clear(&probe, 1, &handle, &mut stored, ConstraintMask::ALL).unwrap_err();

        assert_eq!(err.status(), -34);
        assert_eq!(stored.mask, ConstraintMask::LATENCY | ConstraintMask::BANDWIDTH);
        assert_eq!(stored.latency, 7);
        assert_eq!(stored.bandwidth, 64);
        assert_eq!(
            *probe.calls.lock(),
            vec![(ConstraintKind::Scale, 0), (ConstraintKind::Latency, -1)]
        );
    }
}
