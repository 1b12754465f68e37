//! Per-subnet DHCP instance.
//!
//! An [`Instance`] bundles the validated configuration of one subnet with
//! the [`Pool`] that serves it. Instances are created through
//! [`InstanceBuilder`] and are immutable afterwards; only the pool state
//! changes, behind the instance's lock.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::binding::Binding;
use crate::error::{Error, Result};
use crate::pool::Pool;

/// Lease time used when none is configured (24 hours).
pub const DEFAULT_LEASE_SECONDS: u32 = 86400;

const MAX_VLAN_ID: u16 = 4095;

/// An 802.1Q VLAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VlanId(u16);

impl VlanId {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for ids above 4095.
    pub fn new(id: u16) -> Result<Self> {
        if id > MAX_VLAN_ID {
            return Err(Error::InvalidArgument(format!(
                "VLAN id {} is out of range (0-{})",
                id, MAX_VLAN_ID
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

/// A switch port location: datapath id of the switch plus port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchPort {
    pub datapath_id: u64,
    pub port: u32,
}

impl SwitchPort {
    pub fn new(datapath_id: u64, port: u32) -> Self {
        Self { datapath_id, port }
    }
}

/// One subnet's configuration plus its address pool.
#[derive(Debug)]
pub struct Instance {
    name: String,
    server_address: Ipv4Addr,
    server_hardware_address: MacAddr6,
    broadcast_address: Option<Ipv4Addr>,
    router_address: Option<Ipv4Addr>,
    subnet_mask: Option<Ipv4Addr>,
    start_address: Ipv4Addr,
    end_address: Ipv4Addr,
    lease_time_seconds: u32,
    rebind_time_seconds: u32,
    renewal_time_seconds: u32,
    dns_servers: Vec<Ipv4Addr>,
    ntp_servers: Vec<Ipv4Addr>,
    ip_forwarding: bool,
    domain_name: Option<String>,
    /// Reservations that were applied to the pool.
    static_addresses: BTreeMap<MacAddr6, Ipv4Addr>,
    client_members: HashSet<MacAddr6>,
    vlan_members: HashSet<VlanId>,
    port_members: HashSet<SwitchPort>,
    pool: Mutex<Pool>,
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.server_address
    }

    pub fn server_hardware_address(&self) -> MacAddr6 {
        self.server_hardware_address
    }

    /// The configured broadcast address, or `server | !mask` when only a
    /// subnet mask is known.
    pub fn broadcast_address(&self) -> Option<Ipv4Addr> {
        if let Some(broadcast) = self.broadcast_address {
            return Some(broadcast);
        }

        self.subnet_mask.map(|mask| {
            let server = u32::from(self.server_address);
            Ipv4Addr::from(server | !u32::from(mask))
        })
    }

    pub fn router_address(&self) -> Option<Ipv4Addr> {
        self.router_address
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.subnet_mask
    }

    pub fn start_address(&self) -> Ipv4Addr {
        self.start_address
    }

    pub fn end_address(&self) -> Ipv4Addr {
        self.end_address
    }

    pub fn lease_time_seconds(&self) -> u32 {
        self.lease_time_seconds
    }

    /// T2, always 87.5% of the lease time.
    pub fn rebind_time_seconds(&self) -> u32 {
        self.rebind_time_seconds
    }

    /// T1, always half the lease time.
    pub fn renewal_time_seconds(&self) -> u32 {
        self.renewal_time_seconds
    }

    pub fn dns_servers(&self) -> &[Ipv4Addr] {
        &self.dns_servers
    }

    pub fn ntp_servers(&self) -> &[Ipv4Addr] {
        &self.ntp_servers
    }

    pub fn ip_forwarding(&self) -> bool {
        self.ip_forwarding
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    pub fn static_addresses(&self) -> &BTreeMap<MacAddr6, Ipv4Addr> {
        &self.static_addresses
    }

    pub fn client_members(&self) -> &HashSet<MacAddr6> {
        &self.client_members
    }

    pub fn vlan_members(&self) -> &HashSet<VlanId> {
        &self.vlan_members
    }

    pub fn port_members(&self) -> &HashSet<SwitchPort> {
        &self.port_members
    }

    pub fn has_client_member(&self, mac: MacAddr6) -> bool {
        self.client_members.contains(&mac)
    }

    pub fn has_vlan_member(&self, vlan: VlanId) -> bool {
        self.vlan_members.contains(&vlan)
    }

    pub fn has_port_member(&self, port: SwitchPort) -> bool {
        self.port_members.contains(&port)
    }

    /// Locks the pool.
    ///
    /// Hold the guard across a `find_*` call and the `set_*` commit that
    /// follows it so no other worker can take the same address in between.
    pub async fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().await
    }

    pub async fn is_address_in_instance(&self, address: Ipv4Addr) -> bool {
        self.pool.lock().await.is_address_in_pool(address)
    }

    /// Lease duration granted for a client request: the request clamped to
    /// the configured lease time, or the lease time itself.
    pub fn lease_duration_for(&self, requested_seconds: Option<u32>) -> u32 {
        requested_seconds.map_or(self.lease_time_seconds, |requested| {
            requested.min(self.lease_time_seconds)
        })
    }

    /// Selects and commits a lease for `mac` under a single pool lock.
    ///
    /// # Allocation Priority
    ///
    /// 1. If `desired` is given, the desired-address rules of
    ///    [`Pool::find_lease_binding_for_desired_address`]
    /// 2. Otherwise, or if that yields nothing, [`Pool::find_lease_binding`]
    ///
    /// Permanent candidates are committed as fixed leases, everything else
    /// as a dynamic lease of [`lease_duration_for`](Self::lease_duration_for).
    /// Returns `Ok(None)` when no address can be offered.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::IllegalState`] from the commit, which only happens
    /// if the candidate belongs to another client.
    pub async fn allocate(
        &self,
        mac: MacAddr6,
        desired: Option<Ipv4Addr>,
        requested_seconds: Option<u32>,
    ) -> Result<Option<Binding>> {
        let mut pool = self.pool.lock().await;

        let candidate = desired
            .and_then(|address| pool.find_lease_binding_for_desired_address(address, mac))
            .or_else(|| pool.find_lease_binding(mac));

        let Some(candidate) = candidate else {
            warn!("{}: no address available for {}", self.name, mac);
            return Ok(None);
        };

        if candidate.is_permanent() {
            pool.set_fixed_lease_binding(&candidate, mac)?;
        } else {
            let duration = self.lease_duration_for(requested_seconds);
            pool.set_lease_binding(&candidate, mac, duration)?;
        }

        Ok(pool.binding_by_address(candidate.address()).cloned())
    }

    /// Renews the dynamic lease on `address`. See [`Pool::renew_lease`].
    pub async fn renew(&self, address: Ipv4Addr, requested_seconds: Option<u32>) -> bool {
        let duration = self.lease_duration_for(requested_seconds);
        self.pool.lock().await.renew_lease(address, duration)
    }

    /// Cancels the dynamic lease held by `mac`. See [`Pool::cancel_lease_by_hardware_address`].
    pub async fn release(&self, mac: MacAddr6) -> bool {
        self.pool.lock().await.cancel_lease_by_hardware_address(mac)
    }

    /// Reclaims expired leases and returns how many were reclaimed.
    pub async fn sweep_expired_leases(&self) -> usize {
        let mut pool = self.pool.lock().await;
        let before = pool.availability();
        pool.sweep_expired_leases();
        pool.availability() - before
    }

    /// Runs [`sweep_expired_leases`](Self::sweep_expired_leases) every `period`
    /// until the returned task is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero period.
    pub fn spawn_expiry_sweeper(self: Arc<Self>, period: Duration) -> Result<JoinHandle<()>> {
        if period.is_zero() {
            return Err(Error::InvalidArgument(
                "expiry sweep period must be greater than zero".to_string(),
            ));
        }

        Ok(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let reclaimed = self.sweep_expired_leases().await;
                if reclaimed > 0 {
                    debug!("{}: expiry sweep reclaimed {} lease(s)", self.name, reclaimed);
                }
            }
        }))
    }
}

/// Validating builder for [`Instance`].
///
/// Every setter checks its value immediately. The first rejected value is
/// remembered and returned by [`build`](Self::build); rejected values are
/// never stored.
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use leasepool::Instance;
/// use macaddr::MacAddr6;
///
/// # fn example() -> leasepool::Result<()> {
/// let instance = Instance::builder()
///     .name("lab")
///     .server_address(Ipv4Addr::new(10, 0, 0, 1))
///     .server_hardware_address(MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff))
///     .start_address(Ipv4Addr::new(10, 0, 0, 100))
///     .end_address(Ipv4Addr::new(10, 0, 0, 199))
///     .lease_time_seconds(3600)
///     .build()?;
/// assert_eq!(instance.renewal_time_seconds(), 1800);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InstanceBuilder {
    name: Option<String>,
    server_address: Option<Ipv4Addr>,
    server_hardware_address: Option<MacAddr6>,
    broadcast_address: Option<Ipv4Addr>,
    router_address: Option<Ipv4Addr>,
    subnet_mask: Option<Ipv4Addr>,
    start_address: Option<Ipv4Addr>,
    end_address: Option<Ipv4Addr>,
    lease_time_seconds: Option<u32>,
    dns_servers: Option<Vec<Ipv4Addr>>,
    ntp_servers: Option<Vec<Ipv4Addr>>,
    ip_forwarding: bool,
    domain_name: Option<String>,
    static_addresses: BTreeMap<MacAddr6, Ipv4Addr>,
    client_members: Option<HashSet<MacAddr6>>,
    vlan_members: Option<HashSet<VlanId>>,
    port_members: Option<HashSet<SwitchPort>>,
    error: Option<Error>,
}

impl InstanceBuilder {
    fn reject(mut self, message: String) -> Self {
        if self.error.is_none() {
            self.error = Some(Error::InvalidArgument(message));
        }
        self
    }

    fn specified(self, field: &str, address: Ipv4Addr) -> std::result::Result<Self, Self> {
        if address.is_unspecified() {
            return Err(self.reject(format!("{} can not be {}", field, address)));
        }
        Ok(self)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            return self.reject("instance name can not be empty".to_string());
        }
        self.name = Some(name);
        self
    }

    pub fn server_address(self, address: Ipv4Addr) -> Self {
        match self.specified("server address", address) {
            Ok(mut builder) => {
                builder.server_address = Some(address);
                builder
            }
            Err(builder) => builder,
        }
    }

    pub fn server_hardware_address(mut self, mac: MacAddr6) -> Self {
        if mac.is_nil() {
            return self.reject("server hardware address can not be nil".to_string());
        }
        self.server_hardware_address = Some(mac);
        self
    }

    pub fn broadcast_address(self, address: Ipv4Addr) -> Self {
        match self.specified("broadcast address", address) {
            Ok(mut builder) => {
                builder.broadcast_address = Some(address);
                builder
            }
            Err(builder) => builder,
        }
    }

    pub fn router_address(mut self, address: Ipv4Addr) -> Self {
        self.router_address = Some(address);
        self
    }

    pub fn subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.subnet_mask = Some(mask);
        self
    }

    pub fn start_address(self, address: Ipv4Addr) -> Self {
        match self.specified("pool start address", address) {
            Ok(mut builder) => {
                builder.start_address = Some(address);
                builder
            }
            Err(builder) => builder,
        }
    }

    pub fn end_address(self, address: Ipv4Addr) -> Self {
        match self.specified("pool end address", address) {
            Ok(mut builder) => {
                builder.end_address = Some(address);
                builder
            }
            Err(builder) => builder,
        }
    }

    /// Sets the lease time. Rebind and renewal times are derived from it.
    pub fn lease_time_seconds(mut self, seconds: u32) -> Self {
        self.lease_time_seconds = Some(seconds);
        self
    }

    pub fn dns_servers(mut self, servers: Vec<Ipv4Addr>) -> Self {
        self.dns_servers = Some(servers);
        self
    }

    pub fn ntp_servers(mut self, servers: Vec<Ipv4Addr>) -> Self {
        self.ntp_servers = Some(servers);
        self
    }

    pub fn ip_forwarding(mut self, enabled: bool) -> Self {
        self.ip_forwarding = enabled;
        self
    }

    pub fn domain_name(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return self.reject("domain name can not be empty".to_string());
        }
        self.domain_name = Some(domain);
        self
    }

    /// Reserves `address` for `mac`. A later call for the same MAC replaces it.
    pub fn static_address(mut self, mac: MacAddr6, address: Ipv4Addr) -> Self {
        if mac.is_nil() || address.is_unspecified() {
            return self.reject(format!(
                "static address {} for {} can not be empty",
                address, mac
            ));
        }
        self.static_addresses.insert(mac, address);
        self
    }

    pub fn client_members(mut self, members: HashSet<MacAddr6>) -> Self {
        self.client_members = Some(members);
        self
    }

    pub fn vlan_members(mut self, members: HashSet<VlanId>) -> Self {
        self.vlan_members = Some(members);
        self
    }

    pub fn port_members(mut self, members: HashSet<SwitchPort>) -> Self {
        self.port_members = Some(members);
        self
    }

    /// Validates the collected fields and creates the instance and its pool.
    ///
    /// Static reservations outside the pool range, or for an address already
    /// reserved by another client, are skipped with a warning and do not
    /// appear in [`Instance::static_addresses`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a setter rejected a value, a
    /// mandatory field (name, server address, server hardware address, start
    /// and end address) is missing, or the start address is not lower than
    /// the end address.
    pub fn build(self) -> Result<Instance> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let name = self.name.ok_or_else(|| missing("name"))?;
        let server_address = self.server_address.ok_or_else(|| missing("server address"))?;
        let server_hardware_address = self
            .server_hardware_address
            .ok_or_else(|| missing("server hardware address"))?;
        let start_address = self.start_address.ok_or_else(|| missing("pool start address"))?;
        let end_address = self.end_address.ok_or_else(|| missing("pool end address"))?;

        if start_address >= end_address {
            return Err(Error::InvalidArgument(format!(
                "pool start address {} must be lower than end address {}",
                start_address, end_address
            )));
        }

        let lease_time_seconds = self.lease_time_seconds.unwrap_or(DEFAULT_LEASE_SECONDS);
        let rebind_time_seconds = (u64::from(lease_time_seconds) * 7 / 8) as u32;
        let renewal_time_seconds = lease_time_seconds / 2;

        let size = u32::from(end_address) - u32::from(start_address) + 1;
        let mut pool = Pool::new(start_address, size)?;

        let mut static_addresses = BTreeMap::new();
        for (mac, address) in self.static_addresses {
            let Some(binding) = pool.binding_by_address(address) else {
                warn!(
                    "{}: static address {} for {} is outside the pool range, skipping",
                    name, address, mac
                );
                continue;
            };
            if binding.is_permanent()
                && let Some(owner) = binding.hardware_address()
            {
                warn!(
                    "{}: static address {} is already reserved for {}, skipping {}",
                    name, address, owner, mac
                );
                continue;
            }
            pool.configure_fixed_ip_lease(address, mac);
            static_addresses.insert(mac, address);
        }

        info!(
            "Instance {}: pool {} - {} ({} addresses, {} reserved)",
            name,
            start_address,
            end_address,
            size,
            static_addresses.len()
        );

        Ok(Instance {
            name,
            server_address,
            server_hardware_address,
            broadcast_address: self.broadcast_address,
            router_address: self.router_address,
            subnet_mask: self.subnet_mask,
            start_address,
            end_address,
            lease_time_seconds,
            rebind_time_seconds,
            renewal_time_seconds,
            dns_servers: self.dns_servers.unwrap_or_default(),
            ntp_servers: self.ntp_servers.unwrap_or_default(),
            ip_forwarding: self.ip_forwarding,
            domain_name: self.domain_name,
            static_addresses,
            client_members: self.client_members.unwrap_or_default(),
            vlan_members: self.vlan_members.unwrap_or_default(),
            port_members: self.port_members.unwrap_or_default(),
            pool: Mutex::new(pool),
        })
    }
}

fn missing(field: &str) -> Error {
    Error::InvalidArgument(format!("instance {} is required", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(bytes: [u8; 6]) -> MacAddr6 {
        MacAddr6::from(bytes)
    }

    fn base_builder() -> InstanceBuilder {
        Instance::builder()
            .name("dhcpTestInstance")
            .server_address(Ipv4Addr::new(192, 168, 1, 2))
            .server_hardware_address(mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
            .start_address(Ipv4Addr::new(192, 168, 1, 3))
            .end_address(Ipv4Addr::new(192, 168, 1, 10))
            .lease_time_seconds(10)
    }

    #[tokio::test]
    async fn test_build_instance_with_all_fields() {
        let clients: HashSet<MacAddr6> = [
            mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            mac([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]),
        ]
        .into_iter()
        .collect();
        let vlans: HashSet<VlanId> = [VlanId::new(100).unwrap(), VlanId::new(200).unwrap()]
            .into_iter()
            .collect();
        let ports: HashSet<SwitchPort> = [SwitchPort::new(1, 1), SwitchPort::new(2, 2)]
            .into_iter()
            .collect();

        let instance = base_builder()
            .broadcast_address(Ipv4Addr::new(192, 168, 1, 255))
            .router_address(Ipv4Addr::new(192, 168, 1, 1))
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .dns_servers(vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)])
            .ntp_servers(vec![Ipv4Addr::new(10, 0, 0, 3), Ipv4Addr::new(10, 0, 0, 4)])
            .ip_forwarding(true)
            .domain_name("testDomainName")
            .static_address(mac([0x44, 0x55, 0x66, 0x77, 0x88, 0x99]), Ipv4Addr::new(192, 168, 1, 3))
            .static_address(mac([0x99, 0x88, 0x77, 0x66, 0x55, 0x44]), Ipv4Addr::new(192, 168, 1, 5))
            .client_members(clients.clone())
            .vlan_members(vlans.clone())
            .port_members(ports.clone())
            .build()
            .unwrap();

        assert_eq!(instance.name(), "dhcpTestInstance");
        assert_eq!(instance.server_address(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(
            instance.server_hardware_address(),
            mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        );
        assert_eq!(instance.broadcast_address(), Some(Ipv4Addr::new(192, 168, 1, 255)));
        assert_eq!(instance.router_address(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(instance.subnet_mask(), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(instance.start_address(), Ipv4Addr::new(192, 168, 1, 3));
        assert_eq!(instance.end_address(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(instance.lease_time_seconds(), 10);
        assert_eq!(instance.rebind_time_seconds(), 8);
        assert_eq!(instance.renewal_time_seconds(), 5);
        assert_eq!(instance.dns_servers().len(), 2);
        assert_eq!(instance.ntp_servers()[1], Ipv4Addr::new(10, 0, 0, 4));
        assert!(instance.ip_forwarding());
        assert_eq!(instance.domain_name(), Some("testDomainName"));
        assert_eq!(instance.static_addresses().len(), 2);
        assert_eq!(instance.client_members(), &clients);
        assert_eq!(instance.vlan_members(), &vlans);
        assert_eq!(instance.port_members(), &ports);

        let pool = instance.pool().await;
        assert_eq!(pool.size(), 8);
        assert_eq!(pool.start_address(), Some(Ipv4Addr::new(192, 168, 1, 3)));
        let reserved = pool.binding_by_address(Ipv4Addr::new(192, 168, 1, 5)).unwrap();
        assert!(reserved.is_permanent());
        assert!(reserved.is_owned_by(mac([0x99, 0x88, 0x77, 0x66, 0x55, 0x44])));
    }

    #[test]
    fn test_unset_collections_default_to_empty() {
        let instance = base_builder().build().unwrap();
        assert!(instance.dns_servers().is_empty());
        assert!(instance.ntp_servers().is_empty());
        assert!(instance.client_members().is_empty());
        assert!(instance.vlan_members().is_empty());
        assert!(instance.port_members().is_empty());
        assert!(instance.static_addresses().is_empty());
        assert_eq!(instance.domain_name(), None);
        assert_eq!(instance.broadcast_address(), None);
    }

    #[test]
    fn test_default_lease_time() {
        let instance = Instance::builder()
            .name("defaults")
            .server_address(Ipv4Addr::new(10, 0, 0, 1))
            .server_hardware_address(mac([2, 0, 0, 0, 0, 1]))
            .start_address(Ipv4Addr::new(10, 0, 0, 10))
            .end_address(Ipv4Addr::new(10, 0, 0, 20))
            .build()
            .unwrap();
        assert_eq!(instance.lease_time_seconds(), DEFAULT_LEASE_SECONDS);
        assert_eq!(instance.rebind_time_seconds(), 75600);
        assert_eq!(instance.renewal_time_seconds(), 43200);
    }

    #[test]
    fn test_derived_times_round_down() {
        let instance = base_builder().lease_time_seconds(7).build().unwrap();
        assert_eq!(instance.rebind_time_seconds(), 6);
        assert_eq!(instance.renewal_time_seconds(), 3);
    }

    #[test]
    fn test_broadcast_computed_from_mask() {
        let instance = base_builder()
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .build()
            .unwrap();
        assert_eq!(instance.broadcast_address(), Some(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[tokio::test]
    async fn test_out_of_range_static_addresses_are_skipped() {
        let instance = base_builder()
            .static_address(mac([0x44, 0x55, 0x66, 0x77, 0x88, 0x99]), Ipv4Addr::new(20, 20, 20, 20))
            .static_address(mac([0x99, 0x88, 0x77, 0x66, 0x55, 0x44]), Ipv4Addr::new(30, 30, 30, 30))
            .build()
            .unwrap();

        assert!(instance.static_addresses().is_empty());
        let pool = instance.pool().await;
        assert!(pool.bindings().iter().all(|binding| !binding.is_permanent()));
    }

    #[test]
    fn test_conflicting_static_address_keeps_first_reservation() {
        let first = mac([0x02, 0, 0, 0, 0, 0x01]);
        let second = mac([0x02, 0, 0, 0, 0, 0x02]);
        let instance = base_builder()
            .static_address(second, Ipv4Addr::new(192, 168, 1, 4))
            .static_address(first, Ipv4Addr::new(192, 168, 1, 4))
            .build()
            .unwrap();

        assert_eq!(instance.static_addresses().len(), 1);
        assert_eq!(
            instance.static_addresses().get(&first),
            Some(&Ipv4Addr::new(192, 168, 1, 4))
        );
    }

    #[test]
    fn test_missing_name() {
        let result = Instance::builder()
            .server_address(Ipv4Addr::new(192, 168, 1, 2))
            .server_hardware_address(mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
            .start_address(Ipv4Addr::new(192, 168, 1, 3))
            .end_address(Ipv4Addr::new(192, 168, 1, 10))
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_empty_name() {
        let result = base_builder().name("  ").build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_first_rejection_wins() {
        let result = base_builder()
            .server_address(Ipv4Addr::UNSPECIFIED)
            .domain_name("")
            .build();
        match result {
            Err(Error::InvalidArgument(message)) => assert!(message.contains("server address")),
            other => panic!("unexpected result: {:?}", other.map(|instance| instance.name().to_string())),
        }
    }

    #[test]
    fn test_missing_pool_range() {
        let result = Instance::builder()
            .name("dhcpTestInstance")
            .server_address(Ipv4Addr::new(192, 168, 1, 2))
            .server_hardware_address(mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_start_not_lower_than_end() {
        let inverted = base_builder()
            .end_address(Ipv4Addr::new(192, 168, 1, 1))
            .build();
        assert!(matches!(inverted, Err(Error::InvalidArgument(_))));

        let equal = base_builder()
            .end_address(Ipv4Addr::new(192, 168, 1, 3))
            .build();
        assert!(matches!(equal, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_empty_mandatory_addresses() {
        let nil_mac = base_builder().server_hardware_address(MacAddr6::nil()).build();
        assert!(matches!(nil_mac, Err(Error::InvalidArgument(_))));

        let broadcast = base_builder().broadcast_address(Ipv4Addr::UNSPECIFIED).build();
        assert!(matches!(broadcast, Err(Error::InvalidArgument(_))));

        let reservation = base_builder()
            .static_address(mac([1, 2, 3, 4, 5, 6]), Ipv4Addr::UNSPECIFIED)
            .build();
        assert!(matches!(reservation, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_vlan_id_range() {
        assert!(VlanId::new(4095).is_ok());
        assert!(VlanId::new(4096).is_err());
        assert_eq!(VlanId::new(100).unwrap().get(), 100);
    }

    #[test]
    fn test_membership_predicates() {
        let client = mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let instance = base_builder()
            .client_members([client].into_iter().collect())
            .vlan_members([VlanId::new(10).unwrap()].into_iter().collect())
            .port_members([SwitchPort::new(7, 3)].into_iter().collect())
            .build()
            .unwrap();

        assert!(instance.has_client_member(client));
        assert!(!instance.has_client_member(MacAddr6::nil()));
        assert!(instance.has_vlan_member(VlanId::new(10).unwrap()));
        assert!(!instance.has_vlan_member(VlanId::new(11).unwrap()));
        assert!(instance.has_port_member(SwitchPort::new(7, 3)));
        assert!(!instance.has_port_member(SwitchPort::new(7, 4)));
    }

    #[tokio::test]
    async fn test_is_address_in_instance() {
        let instance = base_builder().build().unwrap();
        assert!(instance.is_address_in_instance(Ipv4Addr::new(192, 168, 1, 3)).await);
        assert!(instance.is_address_in_instance(Ipv4Addr::new(192, 168, 1, 10)).await);
        assert!(!instance.is_address_in_instance(Ipv4Addr::new(192, 168, 1, 11)).await);
    }

    #[test]
    fn test_lease_duration_is_clamped() {
        let instance = base_builder().lease_time_seconds(3600).build().unwrap();
        assert_eq!(instance.lease_duration_for(None), 3600);
        assert_eq!(instance.lease_duration_for(Some(60)), 60);
        assert_eq!(instance.lease_duration_for(Some(7200)), 3600);
    }

    #[tokio::test]
    async fn test_allocate_prefers_desired_then_falls_back() {
        let instance = base_builder().build().unwrap();
        let client = mac([0x02, 0, 0, 0, 0, 0x01]);
        let other = mac([0x02, 0, 0, 0, 0, 0x02]);

        let granted = instance
            .allocate(client, Some(Ipv4Addr::new(192, 168, 1, 7)), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(granted.address(), Ipv4Addr::new(192, 168, 1, 7));
        assert!(granted.is_active());
        assert_eq!(granted.lease_duration_seconds(), 10);

        let fallback = instance
            .allocate(other, Some(Ipv4Addr::new(192, 168, 1, 7)), Some(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.address(), Ipv4Addr::new(192, 168, 1, 3));
        assert_eq!(fallback.lease_duration_seconds(), 5);

        assert_eq!(instance.pool().await.availability(), 6);
    }

    #[tokio::test]
    async fn test_allocate_commits_static_reservation() {
        let reserved = mac([0x44, 0x55, 0x66, 0x77, 0x88, 0x99]);
        let instance = base_builder()
            .static_address(reserved, Ipv4Addr::new(192, 168, 1, 9))
            .build()
            .unwrap();

        let granted = instance
            .allocate(reserved, Some(Ipv4Addr::new(192, 168, 1, 4)), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(granted.address(), Ipv4Addr::new(192, 168, 1, 9));
        assert!(granted.is_permanent());
        assert!(granted.is_active());

        let stranger = instance
            .allocate(mac([1, 1, 1, 1, 1, 1]), Some(Ipv4Addr::new(192, 168, 1, 9)), None)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stranger.address(), Ipv4Addr::new(192, 168, 1, 9));

        assert!(!instance.release(reserved).await);
    }

    #[tokio::test]
    async fn test_allocate_returns_none_when_exhausted() {
        let instance = base_builder()
            .end_address(Ipv4Addr::new(192, 168, 1, 4))
            .build()
            .unwrap();

        for last in 1..=2 {
            let granted = instance.allocate(mac([2, 0, 0, 0, 0, last]), None, None).await.unwrap();
            assert!(granted.is_some());
        }
        let exhausted = instance.allocate(mac([2, 0, 0, 0, 0, 3]), None, None).await.unwrap();
        assert!(exhausted.is_none());

        assert!(instance.release(mac([2, 0, 0, 0, 0, 1])).await);
        let granted = instance.allocate(mac([2, 0, 0, 0, 0, 3]), None, None).await.unwrap();
        assert_eq!(granted.unwrap().address(), Ipv4Addr::new(192, 168, 1, 3));
    }

    #[tokio::test]
    async fn test_renew_through_instance() {
        let instance = base_builder().lease_time_seconds(100).build().unwrap();
        let client = mac([2, 0, 0, 0, 0, 1]);
        let granted = instance.allocate(client, None, Some(10)).await.unwrap().unwrap();

        assert!(instance.renew(granted.address(), Some(1000)).await);
        let pool = instance.pool().await;
        let renewed = pool.binding_by_address(granted.address()).unwrap();
        assert_eq!(renewed.lease_duration_seconds(), 100);
    }

    #[tokio::test]
    async fn test_sweep_through_instance() {
        let instance = base_builder().build().unwrap();
        instance
            .allocate(mac([2, 0, 0, 0, 0, 1]), None, Some(0))
            .await
            .unwrap();
        instance
            .allocate(mac([2, 0, 0, 0, 0, 2]), None, None)
            .await
            .unwrap();

        assert_eq!(instance.sweep_expired_leases().await, 1);
        assert_eq!(instance.sweep_expired_leases().await, 0);
        assert_eq!(instance.pool().await.availability(), 7);
    }

    #[tokio::test]
    async fn test_expiry_sweeper_task() {
        let instance = Arc::new(base_builder().build().unwrap());
        instance
            .allocate(mac([2, 0, 0, 0, 0, 1]), None, Some(0))
            .await
            .unwrap();

        let sweeper = Arc::clone(&instance)
            .spawn_expiry_sweeper(Duration::from_millis(10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert_eq!(instance.pool().await.availability(), 8);
    }

    #[tokio::test]
    async fn test_expiry_sweeper_rejects_zero_period() {
        let instance = Arc::new(base_builder().build().unwrap());
        let result = Arc::clone(&instance).spawn_expiry_sweeper(Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let sweeper = instance.spawn_expiry_sweeper(Duration::from_millis(1)).unwrap();
        assert!(!sweeper.is_finished());
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_concurrent_allocations() {
        let instance = Arc::new(base_builder().build().unwrap());

        let mut handles = vec![];
        for index in 0..8u8 {
            let instance = Arc::clone(&instance);
            handles.push(tokio::spawn(async move {
                instance
                    .allocate(mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, index]), None, None)
                    .await
            }));
        }

        let mut allocated = HashSet::new();
        for handle in handles {
            let binding = handle.await.unwrap().unwrap().unwrap();
            assert!(
                allocated.insert(binding.address()),
                "Duplicate address allocated: {}",
                binding.address()
            );
        }

        assert_eq!(allocated.len(), 8);
        assert!(instance.pool().await.is_full());
    }
}
