use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use macaddr::MacAddr6;

use crate::error::{Error, Result};
use crate::instance::{Instance, SwitchPort, VlanId};

/// Configuration document: one entry per served subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub server_ip: Ipv4Addr,
    pub server_mac: String,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    #[serde(default)]
    pub subnet_mask: Option<Ipv4Addr>,
    #[serde(default)]
    pub broadcast_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub router: Option<Ipv4Addr>,
    #[serde(default)]
    pub lease_duration_seconds: Option<u32>,
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ntp_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ip_forwarding: bool,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub static_bindings: Vec<StaticBinding>,
    #[serde(default)]
    pub client_members: Vec<String>,
    #[serde(default)]
    pub vlan_members: Vec<u16>,
    #[serde(default)]
    pub switch_ports: Vec<SwitchPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticBinding {
    pub mac_address: String,
    pub ip_address: Ipv4Addr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instances: vec![InstanceConfig::default()],
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            server_mac: "02:00:00:00:00:01".to_string(),
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 200),
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            broadcast_address: None,
            router: Some(Ipv4Addr::new(192, 168, 1, 1)),
            lease_duration_seconds: Some(86400),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            ntp_servers: Vec::new(),
            ip_forwarding: false,
            domain_name: None,
            static_bindings: Vec::new(),
            client_members: Vec::new(),
            vlan_members: Vec::new(),
            switch_ports: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks instance names are unique and every instance builds.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for instance in &self.instances {
            if !names.insert(instance.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "instance name {} is used more than once",
                    instance.name
                )));
            }
            instance.validate()?;
        }
        Ok(())
    }

    pub fn build_instances(&self) -> Result<Vec<Instance>> {
        self.instances.iter().map(InstanceConfig::build).collect()
    }
}

impl InstanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ip_in_pool(self.server_ip) {
            return Err(Error::InvalidConfig(format!(
                "{}: server_ip must not be within the pool range",
                self.name
            )));
        }

        if let Some(router) = self.router
            && self.ip_in_pool(router)
        {
            return Err(Error::InvalidConfig(format!(
                "{}: router must not be within the pool range",
                self.name
            )));
        }

        self.build().map(|_| ()).map_err(|error| match error {
            Error::InvalidArgument(message) => {
                Error::InvalidConfig(format!("{}: {}", self.name, message))
            }
            other => other,
        })
    }

    /// Converts the entry into an [`Instance`] with a fresh pool.
    pub fn build(&self) -> Result<Instance> {
        let mut builder = Instance::builder()
            .name(self.name.as_str())
            .server_address(self.server_ip)
            .server_hardware_address(parse_mac(&self.server_mac)?)
            .start_address(self.pool_start)
            .end_address(self.pool_end)
            .dns_servers(self.dns_servers.clone())
            .ntp_servers(self.ntp_servers.clone())
            .ip_forwarding(self.ip_forwarding);

        if let Some(mask) = self.subnet_mask {
            builder = builder.subnet_mask(mask);
        }
        if let Some(broadcast) = self.broadcast_address {
            builder = builder.broadcast_address(broadcast);
        }
        if let Some(router) = self.router {
            builder = builder.router_address(router);
        }
        if let Some(seconds) = self.lease_duration_seconds {
            builder = builder.lease_time_seconds(seconds);
        }
        if let Some(domain) = &self.domain_name {
            builder = builder.domain_name(domain.as_str());
        }

        for binding in &self.static_bindings {
            builder = builder.static_address(parse_mac(&binding.mac_address)?, binding.ip_address);
        }

        let clients = self
            .client_members
            .iter()
            .map(|mac| parse_mac(mac))
            .collect::<Result<HashSet<_>>>()?;
        let vlans = self
            .vlan_members
            .iter()
            .map(|&id| VlanId::new(id))
            .collect::<Result<HashSet<_>>>()?;

        builder
            .client_members(clients)
            .vlan_members(vlans)
            .port_members(self.switch_ports.iter().copied().collect())
            .build()
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);
        addr >= start && addr <= end
    }
}

fn parse_mac(value: &str) -> Result<MacAddr6> {
    value
        .parse::<MacAddr6>()
        .map_err(|error| Error::InvalidArgument(format!("invalid MAC address {:?}: {}", value, error)))
}
