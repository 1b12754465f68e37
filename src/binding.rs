//! The per-address lease record.
//!
//! A [`Binding`] pairs one pool address with the lease state of whichever
//! client currently holds it. Bindings are owned by a
//! [`Pool`](crate::Pool); the setters here are plain field writes and do no
//! cross-field validation, the pool is responsible for keeping them coherent.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use macaddr::MacAddr6;

/// One address of a pool together with its lease state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    address: Ipv4Addr,
    /// Last known owner. `None` means the address was never handed out
    /// (or a permanent reservation on it was released).
    hardware_address: Option<MacAddr6>,
    lease_start: Option<DateTime<Utc>>,
    lease_duration_seconds: u32,
    active: bool,
    permanent: bool,
}

impl Binding {
    /// Creates an unassigned, inactive, non-permanent binding.
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            hardware_address: None,
            lease_start: None,
            lease_duration_seconds: 0,
            active: false,
            permanent: false,
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn hardware_address(&self) -> Option<MacAddr6> {
        self.hardware_address
    }

    pub fn lease_start(&self) -> Option<DateTime<Utc>> {
        self.lease_start
    }

    pub fn lease_duration_seconds(&self) -> u32 {
        self.lease_duration_seconds
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// Returns true if `mac` is the recorded owner of this binding.
    pub fn is_owned_by(&self, mac: MacAddr6) -> bool {
        self.hardware_address == Some(mac)
    }

    /// Starts the lease clock at the current time.
    pub fn start_lease_now(&mut self) {
        self.lease_start = Some(Utc::now());
    }

    /// Sets the lease length. Zero makes a started lease expire immediately.
    pub fn set_lease_duration(&mut self, seconds: u32) {
        self.lease_duration_seconds = seconds;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn set_permanent(&mut self, permanent: bool) {
        self.permanent = permanent;
    }

    pub fn set_hardware_address(&mut self, mac: MacAddr6) {
        self.hardware_address = Some(mac);
    }

    pub fn clear_hardware_address(&mut self) {
        self.hardware_address = None;
    }

    /// Releases the lease.
    ///
    /// The hardware address is kept so the same client can be handed the
    /// same address again; permanence is not touched.
    pub fn cancel(&mut self) {
        self.active = false;
    }

    /// Returns true if the address can be handed out (no lease is held).
    pub fn is_available(&self) -> bool {
        !self.active
    }

    /// Returns true if this is an active dynamic lease whose time is up.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Same as [`is_expired`](Self::is_expired) against an explicit clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.permanent || !self.active {
            return false;
        }
        match self.lease_expires_at() {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// When the current lease ends, if a lease clock was ever started.
    pub fn lease_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lease_start
            .map(|start| start + TimeDelta::seconds(i64::from(self.lease_duration_seconds)))
    }

    /// Seconds until expiry, or 0 once expired. `None` for permanent or idle bindings.
    pub fn remaining_seconds(&self) -> Option<i64> {
        if self.permanent || !self.active {
            return None;
        }
        self.lease_expires_at()
            .map(|expires_at| (expires_at - Utc::now()).num_seconds().max(0))
    }

    /// Short lease state: `free`, `leased`, `reserved` or `fixed`.
    pub fn state_label(&self) -> &'static str {
        match (self.permanent, self.active) {
            (true, true) => "fixed",
            (true, false) => "reserved",
            (false, true) => "leased",
            (false, false) => "free",
        }
    }

    /// Backdates the lease clock. Only tests need to travel in time.
    #[cfg(test)]
    pub(crate) fn set_lease_start(&mut self, start: DateTime<Utc>) {
        self.lease_start = Some(start);
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.hardware_address {
            Some(mac) => mac.to_string(),
            None => "unassigned".to_string(),
        };
        write!(f, "{} {} {}", self.address, owner, self.state_label())
    }
}
