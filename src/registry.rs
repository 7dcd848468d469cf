//! # Address Registry
//!
//! The global table of registered IP blocks. Owned exclusively by the main
//! task during Phases 0-3 and by the routing task during Phase 4 (never
//! both at once), so it needs no internal locking.

use crate::error::RouterError;
use crate::wire::{IpInfo, IpType};

/// Outcome of a successful `findTarget` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingTarget {
    pub ip_id: u64,
    pub client_id: u64,
}

/// Global table of IP blocks keyed by id, with an address-ordered index for
/// `findTarget`. Per the spec's own open question, a single `Vec<IpInfo>`
/// indexed by id suffices; `ips_by_id` and `ips` collapse into one store.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    ips: Vec<IpInfo>,
    master_count: u64,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id that would be assigned by `register`.
    pub fn ip_count(&self) -> u64 {
        self.ips.len() as u64
    }

    pub fn master_count(&self) -> u64 {
        self.master_count
    }

    /// All registered IPs in id order, as published during the commit phase.
    pub fn all(&self) -> &[IpInfo] {
        &self.ips
    }

    pub fn get(&self, ip_id: u64) -> Option<&IpInfo> {
        self.ips.get(ip_id as usize)
    }

    /// Register a new IP block, rejecting it if its range overlaps any
    /// already-registered range. On success, assigns and returns the new id.
    pub fn register(&mut self, mut ip: IpInfo) -> Result<u64, RouterError> {
        let (new_lo, new_hi) = ip.range();
        if new_hi <= new_lo {
            return Err(RouterError::Registration(format!(
                "IP '{}' has a degenerate or wrapping range [{:#x}, {:#x})",
                ip.name, new_lo, new_hi
            )));
        }

        for existing in &self.ips {
            let (lo, hi) = existing.range();
            if new_lo < hi && lo < new_hi {
                return Err(RouterError::Registration(format!(
                    "IP '{}' range [{:#x}, {:#x}) overlaps '{}' range [{:#x}, {:#x})",
                    ip.name, new_lo, new_hi, existing.name, lo, hi
                )));
            }
        }

        let id = self.ip_count();
        ip.id = id;
        if ip.ip_type.is_master() {
            self.master_count += 1;
        }
        self.ips.push(ip);
        Ok(id)
    }

    /// Locate the unique IP whose range contains `address`, and verify the
    /// transaction of `size` bytes starting there does not cross its
    /// boundary.
    pub fn find_target(&self, address: u64, size: u64) -> Result<RoutingTarget, RouterError> {
        let end = address
            .checked_add(size)
            .ok_or_else(|| RouterError::Routing(format!("address {:#x} + size {} overflows", address, size)))?;

        let ip = self
            .ips
            .iter()
            .find(|ip| {
                let (lo, hi) = ip.range();
                address >= lo && address < hi
            })
            .ok_or_else(|| RouterError::Routing(format!("no IP covers address {:#x}", address)))?;

        let (_, ip_hi) = ip.range();
        if end > ip_hi {
            return Err(RouterError::Routing(format!(
                "transaction [{:#x}, {:#x}) crosses the boundary of '{}' ending at {:#x}",
                address, end, ip.name, ip_hi
            )));
        }

        Ok(RoutingTarget {
            ip_id: ip.id,
            client_id: ip.client_id,
        })
    }

    /// Record a TERMINATE for `ip_id`, decrementing the master population.
    /// Returns the new master count.
    pub fn on_terminate(&mut self, ip_id: u64) -> u64 {
        if let Some(ip) = self.ips.get(ip_id as usize) {
            if ip.ip_type.is_master() && self.master_count > 0 {
                self.master_count -= 1;
            }
        }
        self.master_count
    }
}
