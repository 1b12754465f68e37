//! # leasepool
//!
//! An IPv4 lease allocation engine for DHCP servers: per-subnet address
//! pools, client bindings, static reservations and lease expiry.
//!
//! ## Features
//!
//! - Contiguous address pools with O(1) availability tracking
//! - Dynamic leases with per-client address affinity
//! - Static (fixed) MAC-to-IP reservations
//! - Desired-address selection following the client's requested IP
//! - Expiry sweeping, on demand or as a background task
//! - Multiple named instances selectable by address, VLAN, switch port or client
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use leasepool::{Config, Instances};
//! use macaddr::MacAddr6;
//!
//! #[tokio::main]
//! async fn main() -> leasepool::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let instances = Instances::from_config(&config).await?;
//!
//!     let client: MacAddr6 = "00:11:22:33:44:55".parse().unwrap();
//!     if let Some(instance) = instances.get("default").await
//!         && let Some(binding) = instance.allocate(client, None, None).await?
//!     {
//!         println!("{}", binding);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Binding`] - One address and its lease state
//! - [`Pool`] - Address pool with selection and commit operations
//! - [`Instance`] - Subnet configuration plus a locked pool, built with [`InstanceBuilder`]
//! - [`Instances`] - Registry of named instances
//! - [`Config`] - JSON configuration describing the instances

pub mod binding;
pub mod config;
pub mod error;
pub mod instance;
pub mod pool;
pub mod registry;

pub use binding::Binding;
pub use config::{Config, InstanceConfig, StaticBinding};
pub use error::{Error, Result};
pub use instance::{DEFAULT_LEASE_SECONDS, Instance, InstanceBuilder, SwitchPort, VlanId};
pub use pool::Pool;
pub use registry::Instances;
