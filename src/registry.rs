//! Named collection of [`Instance`]s with a global on/off switch.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use macaddr::MacAddr6;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::instance::{Instance, SwitchPort, VlanId};

/// Registry of DHCP instances keyed by name.
///
/// While the registry is disabled, the client lookups (`get_by_address`,
/// `get_by_vlan`, `get_by_switch_port`, `get_by_client`) resolve nothing, so
/// no request can reach a pool. Lookup by name and listing keep working for
/// administration.
///
/// # Thread Safety
///
/// The map sits behind a `tokio::sync::RwLock`; lookups run concurrently
/// and each returned `Arc<Instance>` locks its own pool independently.
#[derive(Debug)]
pub struct Instances {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    enabled: AtomicBool,
}

impl Default for Instances {
    fn default() -> Self {
        Self::new()
    }
}

impl Instances {
    /// Creates an empty, disabled registry.
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(false),
        }
    }

    /// Builds every instance in `config` and registers it.
    ///
    /// # Errors
    ///
    /// Fails if an instance does not build or two instances share a name.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::new();
        for instance in config.build_instances()? {
            registry.add(instance).await?;
        }
        Ok(registry)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("DHCP enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("DHCP disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`Error::DuplicateInstance`] if the name is already taken.
    pub async fn add(&self, instance: Instance) -> Result<Arc<Instance>> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(instance.name()) {
            return Err(Error::DuplicateInstance(instance.name().to_string()));
        }

        let instance = Arc::new(instance);
        instances.insert(instance.name().to_string(), Arc::clone(&instance));
        info!("Added instance {}", instance.name());
        Ok(instance)
    }

    /// Returns false if no instance has that name.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.instances.write().await.remove(name).is_some();
        if removed {
            info!("Removed instance {}", name);
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Instance>> {
        self.instances.read().await.get(name).cloned()
    }

    /// The instance whose pool range contains `address`.
    pub async fn get_by_address(&self, address: Ipv4Addr) -> Option<Arc<Instance>> {
        if !self.serving() {
            return None;
        }

        let instances = self.instances.read().await;
        for instance in instances.values() {
            if instance.is_address_in_instance(address).await {
                return Some(Arc::clone(instance));
            }
        }
        None
    }

    pub async fn get_by_vlan(&self, vlan: VlanId) -> Option<Arc<Instance>> {
        self.find(|instance| instance.has_vlan_member(vlan)).await
    }

    pub async fn get_by_switch_port(&self, port: SwitchPort) -> Option<Arc<Instance>> {
        self.find(|instance| instance.has_port_member(port)).await
    }

    /// The instance that lists `mac` as a client member or holds a
    /// static reservation for it.
    pub async fn get_by_client(&self, mac: MacAddr6) -> Option<Arc<Instance>> {
        self.find(|instance| {
            instance.has_client_member(mac) || instance.static_addresses().contains_key(&mac)
        })
        .await
    }

    /// All instances, sorted by name.
    pub async fn all(&self) -> Vec<Arc<Instance>> {
        let mut instances: Vec<_> = self.instances.read().await.values().cloned().collect();
        instances.sort_by(|a, b| a.name().cmp(b.name()));
        instances
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    fn serving(&self) -> bool {
        let enabled = self.is_enabled();
        if !enabled {
            debug!("DHCP is disabled, not resolving an instance");
        }
        enabled
    }

    async fn find(&self, predicate: impl Fn(&Instance) -> bool) -> Option<Arc<Instance>> {
        if !self.serving() {
            return None;
        }

        self.instances
            .read()
            .await
            .values()
            .find(|instance| predicate(instance))
            .cloned()
    }
}
