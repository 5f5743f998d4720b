// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Simulated back-ends.
//
// Host-side stand-ins for a clock driver and a regulator driver. They keep
// their state in memory and never touch hardware, which makes the daemon
// runnable on a workstation and gives the tests realistic back-end policy.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{BackendHandle, Grant, ResourceOps};
use crate::connection::ConnectionId;
use crate::error::{BackendError, EINVAL, ERANGE};

/// Back-end description as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSpec {
    Clock {
        base: u32,
        max_frequency: u64,
    },
    Regulator {
        base: u32,
        #[serde(default = "default_microvolts")]
        default_microvolts: u32,
    },
}

fn default_microvolts() -> u32 {
    1_800_000
}

impl BackendSpec {
    pub fn build(&self) -> Box<dyn ResourceOps> {
        match *self {
            Self::Clock {
                base,
                max_frequency,
            } => Box::new(SimClock::new(base, max_frequency)),
            Self::Regulator {
                base,
                default_microvolts,
            } => Box::new(SimRegulator::new(base, default_microvolts)),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle table shared by the simulated drivers
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SimTable<T> {
    entries: BTreeMap<u64, T>,
    next: u64,
}

impl<T> SimTable<T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: 1,
        }
    }

    fn insert(&mut self, value: T) -> BackendHandle {
        let raw = self.next;
        self.next += 1;
        self.entries.insert(raw, value);
        BackendHandle::new(raw)
    }

    fn get(&self, handle: &BackendHandle) -> Result<&T, BackendError> {
        self.entries.get(&handle.raw()).ok_or_else(|| stale(handle))
    }

    fn get_mut(&mut self, handle: &BackendHandle) -> Result<&mut T, BackendError> {
        self.entries.get_mut(&handle.raw()).ok_or_else(|| stale(handle))
    }

    fn remove(&mut self, handle: BackendHandle) -> Result<T, BackendError> {
        self.entries.remove(&handle.raw()).ok_or_else(|| stale(&handle))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}

fn stale(handle: &BackendHandle) -> BackendError {
    BackendError::new(-EINVAL, format!("stale handle {}", handle.raw()))
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClockUser {
    /// Requested rate in Hz, 0 when unconstrained.
    rate: u64,
    requester: Option<ConnectionId>,
}

/// A single physical clock shared by every handle.
///
/// The effective rate is the highest rate any user asks for.
#[derive(Debug)]
pub struct SimClock {
    base: u32,
    max_frequency: u64,
    users: Mutex<SimTable<ClockUser>>,
}

impl SimClock {
    pub fn new(base: u32, max_frequency: u64) -> Self {
        Self {
            base,
            max_frequency,
            users: Mutex::new(SimTable::new()),
        }
    }

    /// Effective clock rate in Hz.
    pub fn rate(&self) -> u64 {
        self.users.lock().values().map(|u| u.rate).max().unwrap_or(0)
    }

    pub fn users(&self) -> usize {
        self.users.lock().len()
    }
}

impl ResourceOps for SimClock {
    fn request(&self, _args: &[u8]) -> Result<Grant, BackendError> {
        let handle = self.users.lock().insert(ClockUser::default());
        Ok(Grant::new(handle, self.base))
    }

    fn release(&self, handle: BackendHandle) -> Result<(), BackendError> {
        self.users.lock().remove(handle).map(|_| ())
    }

    fn get_info(&self, handle: &BackendHandle) -> Result<String, BackendError> {
        let users = self.users.lock();
        let user = users.get(handle)?;
        Ok(format!(
            "clock base=0x{:08x} requested={} by={:?} rate={} max={} users={}",
            self.base,
            user.rate,
            user.requester,
            users.values().map(|u| u.rate).max().unwrap_or(0),
            self.max_frequency,
            users.len()
        ))
    }

    fn scale(
        &self,
        requester: ConnectionId,
        handle: &BackendHandle,
        frequency: i64,
    ) -> Result<(), BackendError> {
        let rate = u64::try_from(frequency)
            .map_err(|_| BackendError::new(-EINVAL, format!("negative rate {}", frequency)))?;
        if rate > self.max_frequency {
            return Err(BackendError::new(
                -ERANGE,
                format!("rate {} above maximum {}", rate, self.max_frequency),
            ));
        }
        let mut users = self.users.lock();
        let user = users.get_mut(handle)?;
        user.rate = rate;
        user.requester = (rate != 0).then_some(requester);
        Ok(())
    }

    fn max_frequency(&self, handle: &BackendHandle) -> Result<u64, BackendError> {
        self.users.lock().get(handle)?;
        Ok(self.max_frequency)
    }
}

// ---------------------------------------------------------------------------
// Regulator / power domain
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RegulatorUser {
    microvolts: u32,
    /// Wake-up latency bound in microseconds, -1 when unconstrained.
    latency: i64,
    /// Bandwidth in KiB/s, -1 when unconstrained.
    bandwidth: i64,
}

/// A power domain: latency bounds are merged by minimum, bandwidth by sum.
#[derive(Debug)]
pub struct SimRegulator {
    base: u32,
    default_microvolts: u32,
    users: Mutex<SimTable<RegulatorUser>>,
}

impl SimRegulator {
    pub fn new(base: u32, default_microvolts: u32) -> Self {
        Self {
            base,
            default_microvolts,
            users: Mutex::new(SimTable::new()),
        }
    }

    /// Tightest latency bound requested, if any.
    pub fn effective_latency(&self) -> Option<i64> {
        self.users
            .lock()
            .values()
            .filter(|u| u.latency >= 0)
            .map(|u| u.latency)
            .min()
    }

    /// Aggregate bandwidth requested by all users.
    pub fn total_bandwidth(&self) -> i64 {
        self.users
            .lock()
            .values()
            .filter(|u| u.bandwidth >= 0)
            .map(|u| u.bandwidth)
            .sum()
    }

    pub fn users(&self) -> usize {
        self.users.lock().len()
    }

    fn parse_microvolts(&self, args: &[u8]) -> Result<u32, BackendError> {
        let microvolts = match args.len() {
            0 => self.default_microvolts,
            4.. => u32::from_le_bytes([args[0], args[1], args[2], args[3]]),
            n => {
                return Err(BackendError::new(
                    -EINVAL,
                    format!("voltage argument needs 4 bytes, got {}", n),
                ))
            }
        };
        if microvolts == 0 {
            return Err(BackendError::new(-EINVAL, "zero voltage"));
        }
        Ok(microvolts)
    }
}

fn check_bound(what: &str, value: i64) -> Result<(), BackendError> {
    if value < -1 {
        return Err(BackendError::new(
            -EINVAL,
            format!("invalid {} {}", what, value),
        ));
    }
    Ok(())
}

impl ResourceOps for SimRegulator {
    fn request(&self, args: &[u8]) -> Result<Grant, BackendError> {
        let microvolts = self.parse_microvolts(args)?;
        let handle = self.users.lock().insert(RegulatorUser {
            microvolts,
            latency: -1,
            bandwidth: -1,
        });
        Ok(Grant::new(handle, self.base).with_response(microvolts.to_le_bytes().to_vec()))
    }

    fn release(&self, handle: BackendHandle) -> Result<(), BackendError> {
        self.users.lock().remove(handle).map(|_| ())
    }

    fn get_info(&self, handle: &BackendHandle) -> Result<String, BackendError> {
        let users = self.users.lock();
        let user = users.get(handle)?;
        Ok(format!(
            "regulator base=0x{:08x} microvolts={} latency={} bandwidth={} users={}",
            self.base,
            user.microvolts,
            user.latency,
            user.bandwidth,
            users.len()
        ))
    }

    fn set_latency(
        &self,
        _requester: ConnectionId,
        handle: &BackendHandle,
        latency: i64,
    ) -> Result<(), BackendError> {
        check_bound("latency", latency)?;
        self.users.lock().get_mut(handle)?.latency = latency;
        Ok(())
    }

    fn set_bandwidth(
        &self,
        _requester: ConnectionId,
        handle: &BackendHandle,
        bandwidth: i64,
    ) -> Result<(), BackendError> {
        check_bound("bandwidth", bandwidth)?;
        self.users.lock().get_mut(handle)?.bandwidth = bandwidth;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EOPNOTSUPP;

    #[test]
    fn test_clock_effective_rate_is_max() {
        let clk = SimClock::new(0x4000_0000, 1_000);
        let a = clk.request(&[]).unwrap();
        let b = clk.request(&[]).unwrap();
        assert_eq!(a.base, 0x4000_0000);

        clk.scale(1, &a.handle, 200).unwrap();
        clk.scale(2, &b.handle, 600).unwrap();
        assert_eq!(clk.rate(), 600);

        clk.release(b.handle).unwrap();
        assert_eq!(clk.rate(), 200);
        assert_eq!(clk.users(), 1);
    }

    #[test]
    fn test_clock_rejects_out_of_range() {
        let clk = SimClock::new(0, 1_000);
        let g = clk.request(&[]).unwrap();
        assert_eq!(clk.scale(1, &g.handle, 1_001).unwrap_err().code, -ERANGE);
        assert_eq!(clk.scale(1, &g.handle, -5).unwrap_err().code, -EINVAL);
        assert_eq!(clk.max_frequency(&g.handle).unwrap(), 1_000);
    }

    #[test]
    fn test_clock_release_twice_is_stale() {
        let clk = SimClock::new(0, 1_000);
        let g = clk.request(&[]).unwrap();
        let raw = g.handle.raw();
        clk.release(g.handle).unwrap();
        assert!(clk.release(BackendHandle::new(raw)).is_err());
    }

    #[test]
    fn test_regulator_voltage_argument() {
        let reg = SimRegulator::new(0x4a00_0000, 1_800_000);
        let g = reg.request(&1_200_000u32.to_le_bytes()).unwrap();
        assert_eq!(g.response, 1_200_000u32.to_le_bytes().to_vec());

        let g = reg.request(&[]).unwrap();
        assert_eq!(g.response, 1_800_000u32.to_le_bytes().to_vec());

        assert_eq!(reg.request(&[1, 2]).unwrap_err().code, -EINVAL);
    }

    #[test]
    fn test_regulator_merges_constraints() {
        let reg = SimRegulator::new(0, 1_800_000);
        let a = reg.request(&[]).unwrap();
        let b = reg.request(&[]).unwrap();
        reg.set_latency(1, &a.handle, 50).unwrap();
        reg.set_latency(2, &b.handle, 20).unwrap();
        reg.set_bandwidth(1, &a.handle, 100).unwrap();
        reg.set_bandwidth(2, &b.handle, 300).unwrap();
        assert_eq!(reg.effective_latency(), Some(20));
        assert_eq!(reg.total_bandwidth(), 400);

        reg.set_latency(2, &b.handle, -1).unwrap();
        assert_eq!(reg.effective_latency(), Some(50));
    }

    #[test]
    fn test_regulator_has_no_scale() {
        let reg = SimRegulator::new(0, 1_800_000);
        let g = reg.request(&[]).unwrap();
        assert_eq!(reg.scale(1, &g.handle, 10).unwrap_err().code, -EOPNOTSUPP);
    }

    #[test]
    fn test_backend_spec_deserialize() {
        let spec: BackendSpec =
            serde_json::from_str(r#"{"kind":"clock","base":1073741824,"max_frequency":400}"#)
                .unwrap();
        assert_eq!(
            spec,
            BackendSpec::Clock {
                base: 0x4000_0000,
                max_frequency: 400
            }
        );

        let spec: BackendSpec = serde_json::from_str(r#"{"kind":"regulator","base":0}"#).unwrap();
        assert_eq!(
            spec,
            BackendSpec::Regulator {
                base: 0,
                default_microvolts: 1_800_000
            }
        );
    }
}
