//! Address pool and lease allocation algorithms.
//!
//! A [`Pool`] is an ordered collection of [`Binding`]s, one per address,
//! and is the only thing that mutates them. It implements:
//!
//! - Candidate selection for a client (by hardware address or desired address)
//! - Dynamic lease commit, renewal and cancellation
//! - Static (permanent) reservations and their release
//! - Reclaiming expired dynamic leases
//! - Adding and removing addresses while leases are live
//!
//! # Thread Safety
//!
//! `Pool` itself is not synchronized. Selection (`find_*`) and commit
//! (`set_*`) are separate calls, so a caller sharing a pool between workers
//! must hold one exclusive lock across both. [`Instance`](crate::Instance)
//! does this with a [`tokio::sync::Mutex`] and offers the fused
//! [`Instance::allocate`](crate::Instance::allocate).

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use macaddr::MacAddr6;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::error::{Error, Result};

/// The addresses of one subnet and their lease state.
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use leasepool::Pool;
/// use macaddr::MacAddr6;
///
/// # fn example() -> leasepool::Result<()> {
/// let mut pool = Pool::new(Ipv4Addr::new(192, 168, 1, 10), 3)?;
/// let client = MacAddr6::new(0x00, 0x11, 0x22, 0x33, 0x44, 0x55);
///
/// if let Some(candidate) = pool.find_lease_binding(client) {
///     pool.set_lease_binding(&candidate, client, 3600)?;
/// }
/// assert_eq!(pool.availability(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Pool {
    /// Bindings in pool order: construction order, then addresses added later.
    bindings: Vec<Binding>,
    /// Number of bindings with no active lease.
    availability: usize,
    /// Lowest address in the pool, `None` once the pool is empty.
    start_address: Option<Ipv4Addr>,
}

impl Pool {
    /// Creates a pool of `size` sequential unassigned addresses beginning at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the range runs past `255.255.255.255`.
    pub fn new(start: Ipv4Addr, size: u32) -> Result<Self> {
        let first = u32::from(start);
        if size > 0 && first.checked_add(size - 1).is_none() {
            return Err(Error::InvalidArgument(format!(
                "{} addresses starting at {} exceed the IPv4 address space",
                size, start
            )));
        }

        let bindings: Vec<Binding> = (0..size)
            .map(|offset| Binding::new(Ipv4Addr::from(first + offset)))
            .collect();

        Ok(Self {
            availability: bindings.len(),
            start_address: (size > 0).then_some(start),
            bindings,
        })
    }

    /// Number of addresses currently in the pool.
    pub fn size(&self) -> usize {
        self.bindings.len()
    }

    /// Number of addresses without an active lease.
    pub fn availability(&self) -> usize {
        self.availability
    }

    /// Lowest address in the pool, or `None` if every address was removed.
    pub fn start_address(&self) -> Option<Ipv4Addr> {
        self.start_address
    }

    /// Returns true once every address is actively leased.
    pub fn is_full(&self) -> bool {
        self.availability == 0
    }

    /// Returns true if at least one address has no active lease.
    pub fn has_available_space(&self) -> bool {
        if self.is_full() {
            debug!("Address pool is full, no space available");
            return false;
        }
        true
    }

    /// All bindings in pool order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Number of bindings currently holding an active lease.
    pub fn active_count(&self) -> usize {
        self.bindings.iter().filter(|binding| binding.is_active()).count()
    }

    pub fn binding_by_address(&self, address: Ipv4Addr) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|binding| binding.address() == address)
    }

    /// First binding in pool order whose recorded owner is `mac`.
    pub fn binding_by_hardware_address(&self, mac: MacAddr6) -> Option<&Binding> {
        self.bindings.iter().find(|binding| binding.is_owned_by(mac))
    }

    pub fn is_address_in_pool(&self, address: Ipv4Addr) -> bool {
        self.index_of(address).is_some()
    }

    /// Returns true if the address is in the pool and actively leased.
    pub fn is_address_leased(&self, address: Ipv4Addr) -> bool {
        self.binding_by_address(address)
            .is_some_and(|binding| binding.is_active())
    }

    fn index_of(&self, address: Ipv4Addr) -> Option<usize> {
        self.bindings
            .iter()
            .position(|binding| binding.address() == address)
    }

    /// Adds an unassigned address to the pool.
    ///
    /// Returns `None` without touching anything if the address is already present.
    pub fn add_address(&mut self, address: Ipv4Addr) -> Option<&Binding> {
        if self.is_address_in_pool(address) {
            return None;
        }

        if self.start_address.is_none_or(|start| address < start) {
            self.start_address = Some(address);
        }

        self.bindings.push(Binding::new(address));
        self.availability += 1;
        info!("Added {} to the address pool", address);
        self.bindings.last()
    }

    /// Removes an address from the pool and returns its binding.
    ///
    /// If the removed address was the start address, the lowest remaining
    /// address becomes the new start. Returns `None` if the address is absent.
    pub fn remove_address(&mut self, address: Ipv4Addr) -> Option<Binding> {
        let index = self.index_of(address)?;
        let removed = self.bindings.remove(index);

        if removed.is_available() {
            self.availability -= 1;
        }

        if self.start_address == Some(address) {
            self.start_address = self.bindings.iter().map(Binding::address).min();
        }

        info!(
            "Removed {} from the address pool ({} remaining)",
            address,
            self.bindings.len()
        );
        Some(removed)
    }

    /// Picks the binding a client should lease, without committing anything.
    ///
    /// # Selection Priority
    ///
    /// 1. A binding already associated with `mac` (its permanent reservation
    ///    first), whether or not it is currently active
    /// 2. The first available binding that was never assigned
    /// 3. The first available dynamic binding left behind by a previous client
    ///
    /// Returns `None` when the pool has no available space.
    pub fn find_lease_binding(&self, mac: MacAddr6) -> Option<Binding> {
        if !self.has_available_space() {
            return None;
        }

        if let Some(binding) = self.reserved_for(mac).or_else(|| self.binding_by_hardware_address(mac)) {
            debug!(
                "Found {} registered in the pool, returning binding for {}",
                mac,
                binding.address()
            );
            return Some(binding.clone());
        }

        let candidate = self
            .bindings
            .iter()
            .find(|binding| binding.is_available() && binding.hardware_address().is_none())
            .or_else(|| {
                self.bindings
                    .iter()
                    .find(|binding| binding.is_available() && !binding.is_permanent())
            })?;

        debug!("Offering {} to new client {}", candidate.address(), mac);
        Some(candidate.clone())
    }

    /// Picks the binding for a client asking for a specific address.
    ///
    /// 1. If `mac` has an available permanent reservation other than the
    ///    desired address, the reservation wins.
    /// 2. If the desired address is an available reservation for `mac`, it is returned.
    /// 3. If the desired address is available and not reserved, it is returned.
    /// 4. Otherwise `None`; callers fall back to [`find_lease_binding`](Self::find_lease_binding).
    pub fn find_lease_binding_for_desired_address(
        &self,
        desired: Ipv4Addr,
        mac: MacAddr6,
    ) -> Option<Binding> {
        if !self.has_available_space() {
            return None;
        }

        let requested = self.binding_by_address(desired);

        if let Some(reserved) = self.reserved_for(mac)
            && reserved.is_available()
            && reserved.address() != desired
        {
            info!(
                "Fixed entry for {} trumps requested {}, returning {}",
                mac,
                desired,
                reserved.address()
            );
            return Some(reserved.clone());
        }

        match requested {
            Some(binding) if binding.is_available() && binding.is_permanent() => {
                if binding.is_owned_by(mac) {
                    info!("Found fixed entry for {} with {}", desired, mac);
                    Some(binding.clone())
                } else {
                    debug!("{} is reserved for another client", desired);
                    None
                }
            }
            Some(binding) if binding.is_available() => {
                debug!("Returning dynamic binding for requested {}", desired);
                Some(binding.clone())
            }
            _ => {
                debug!("{} is unknown or actively leased", desired);
                None
            }
        }
    }

    /// The permanent reservation held for `mac`, if any.
    fn reserved_for(&self, mac: MacAddr6) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|binding| binding.is_permanent() && binding.is_owned_by(mac))
    }

    /// Reserves `address` permanently for `mac` without leasing it yet.
    ///
    /// Any dynamic lease on the address is revoked. Returns false if the
    /// address is not in the pool.
    pub fn configure_fixed_ip_lease(&mut self, address: Ipv4Addr, mac: MacAddr6) -> bool {
        let Some(index) = self.index_of(address) else {
            info!(
                "Cannot reserve {} for {}: address is not in the pool",
                address, mac
            );
            return false;
        };

        let binding = &mut self.bindings[index];
        let was_active = binding.is_active();
        binding.set_hardware_address(mac);
        binding.set_permanent(true);
        binding.set_active(false);

        if was_active {
            self.availability += 1;
        }

        info!("Reserved {} for {}", address, mac);
        true
    }

    /// Commits a dynamic lease of `binding` to `mac` for `duration_seconds`.
    ///
    /// Any other dynamic binding held by `mac` is released, so a client never
    /// holds two dynamic leases.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressOutOfRange`] if the binding's address is not in the pool
    /// - [`Error::IllegalState`] if the binding is permanent (use
    ///   [`set_fixed_lease_binding`](Self::set_fixed_lease_binding)) or is
    ///   actively leased to a different client
    pub fn set_lease_binding(
        &mut self,
        binding: &Binding,
        mac: MacAddr6,
        duration_seconds: u32,
    ) -> Result<()> {
        let index = self
            .index_of(binding.address())
            .ok_or(Error::AddressOutOfRange(binding.address()))?;

        let current = &self.bindings[index];
        if current.is_permanent() {
            return Err(Error::IllegalState(format!(
                "{} is a permanent binding, commit it with set_fixed_lease_binding",
                current.address()
            )));
        }
        self.ensure_not_held_by_other(index, mac)?;

        self.release_dynamic_bindings_of(mac, index);

        let binding = &mut self.bindings[index];
        let was_available = binding.is_available();
        binding.set_hardware_address(mac);
        binding.start_lease_now();
        binding.set_lease_duration(duration_seconds);
        binding.set_active(true);
        let address = binding.address();

        if was_available {
            self.take_one();
        }

        info!("Leased {} to {} for {}s", address, mac, duration_seconds);
        Ok(())
    }

    /// Commits a permanent lease of a reserved `binding` to `mac`.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressOutOfRange`] if the binding's address is not in the pool
    /// - [`Error::IllegalState`] if the binding is not permanent (use
    ///   [`set_lease_binding`](Self::set_lease_binding)) or is reserved for a
    ///   different client
    pub fn set_fixed_lease_binding(&mut self, binding: &Binding, mac: MacAddr6) -> Result<()> {
        let index = self
            .index_of(binding.address())
            .ok_or(Error::AddressOutOfRange(binding.address()))?;

        let current = &self.bindings[index];
        if !current.is_permanent() {
            return Err(Error::IllegalState(format!(
                "{} is a dynamic binding, commit it with set_lease_binding",
                current.address()
            )));
        }
        self.ensure_not_held_by_other(index, mac)?;

        self.release_dynamic_bindings_of(mac, index);

        let binding = &mut self.bindings[index];
        let was_available = binding.is_available();
        binding.set_hardware_address(mac);
        binding.set_active(true);
        let address = binding.address();

        if was_available {
            self.take_one();
        }

        info!("Leased fixed address {} to {}", address, mac);
        Ok(())
    }

    fn ensure_not_held_by_other(&self, index: usize, mac: MacAddr6) -> Result<()> {
        let current = &self.bindings[index];
        match current.hardware_address() {
            Some(owner) if owner != mac && (current.is_active() || current.is_permanent()) => {
                Err(Error::IllegalState(format!(
                    "{} is held by {}, not {}",
                    current.address(),
                    owner,
                    mac
                )))
            }
            _ => Ok(()),
        }
    }

    /// Drops `mac` from every dynamic binding except the one at `keep`.
    fn release_dynamic_bindings_of(&mut self, mac: MacAddr6, keep: usize) {
        let mut released = 0;
        for (index, binding) in self.bindings.iter_mut().enumerate() {
            if index == keep || binding.is_permanent() || !binding.is_owned_by(mac) {
                continue;
            }
            if binding.is_active() {
                binding.cancel();
                released += 1;
                debug!("Released previous lease {} of {}", binding.address(), mac);
            }
            binding.clear_hardware_address();
        }
        self.availability += released;
    }

    fn take_one(&mut self) {
        self.availability -= 1;
        if self.availability == 0 {
            info!("Address pool is full");
        }
    }

    /// Restarts the lease clock of a dynamic binding.
    ///
    /// Returns false if the address is unknown, permanent, or has never been
    /// leased to anyone.
    pub fn renew_lease(&mut self, address: Ipv4Addr, duration_seconds: u32) -> bool {
        let Some(index) = self.index_of(address) else {
            return false;
        };

        let binding = &mut self.bindings[index];
        if binding.is_permanent() {
            debug!("Cannot renew {}: address is a permanent lease", address);
            return false;
        }
        let Some(owner) = binding.hardware_address() else {
            debug!("Cannot renew {}: address was never leased", address);
            return false;
        };

        let was_available = binding.is_available();
        if was_available {
            self.release_dynamic_bindings_of(owner, index);
        }

        let binding = &mut self.bindings[index];
        binding.start_lease_now();
        binding.set_lease_duration(duration_seconds);
        binding.set_active(true);

        if was_available {
            self.take_one();
        }

        info!("Renewed {} for {}s", address, duration_seconds);
        true
    }

    /// Cancels the active dynamic lease on `address`.
    ///
    /// Returns false for unknown addresses, inactive bindings and permanent
    /// leases (those need [`release_permanent_lease`](Self::release_permanent_lease)).
    pub fn cancel_lease_by_address(&mut self, address: Ipv4Addr) -> bool {
        match self.index_of(address) {
            Some(index) => self.cancel_at(index),
            None => false,
        }
    }

    /// Cancels the active dynamic lease held by `mac`.
    pub fn cancel_lease_by_hardware_address(&mut self, mac: MacAddr6) -> bool {
        let index = self
            .bindings
            .iter()
            .position(|binding| binding.is_owned_by(mac) && binding.is_active() && !binding.is_permanent());

        match index {
            Some(index) => self.cancel_at(index),
            None => {
                debug!("No dynamic lease held by {} to cancel", mac);
                false
            }
        }
    }

    fn cancel_at(&mut self, index: usize) -> bool {
        let binding = &mut self.bindings[index];
        if !binding.is_active() {
            return false;
        }
        if binding.is_permanent() {
            debug!(
                "Cannot cancel {}: address is a permanent lease",
                binding.address()
            );
            return false;
        }

        binding.cancel();
        self.availability += 1;

        info!(
            "Cancelled lease of {} held by {}",
            binding.address(),
            binding
                .hardware_address()
                .map(|mac| mac.to_string())
                .unwrap_or_default()
        );
        true
    }

    /// Returns a permanent binding to the dynamic, unassigned pool.
    ///
    /// Returns false if the address is unknown or not permanent.
    pub fn release_permanent_lease(&mut self, address: Ipv4Addr) -> bool {
        let Some(index) = self.index_of(address) else {
            return false;
        };

        let binding = &mut self.bindings[index];
        if !binding.is_permanent() {
            return false;
        }

        let was_active = binding.is_active();
        binding.set_active(false);
        binding.set_permanent(false);
        binding.clear_hardware_address();

        if was_active {
            self.availability += 1;
        }

        info!("Released permanent lease on {}", address);
        true
    }

    /// Cancels every expired dynamic lease and returns all bindings.
    pub fn sweep_expired_leases(&mut self) -> &[Binding] {
        self.sweep_expired_leases_at(Utc::now())
    }

    /// Same as [`sweep_expired_leases`](Self::sweep_expired_leases) against an explicit clock.
    pub fn sweep_expired_leases_at(&mut self, now: DateTime<Utc>) -> &[Binding] {
        let expired: Vec<usize> = self
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, binding)| binding.is_expired_at(now))
            .map(|(index, _)| index)
            .collect();

        let count = expired.len();
        for index in expired {
            self.cancel_at(index);
        }

        if count > 0 {
            info!("Reclaimed {} expired lease(s)", count);
        }

        &self.bindings
    }

    /// Direct access to one binding for tests that need to age a lease.
    #[cfg(test)]
    pub(crate) fn binding_mut(&mut self, address: Ipv4Addr) -> Option<&mut Binding> {
        self.bindings
            .iter_mut()
            .find(|binding| binding.address() == address)
    }
}
