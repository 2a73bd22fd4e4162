//! fleetd: Fleet management daemon for VPN-connected robots
//!
//! Robots dial into the node over a VPN; each robot owns one container on
//! the node's overlay network. fleetd keeps the NAT firewall, the DNS zone,
//! the container runtime, and the fleet datastore in agreement with the set
//! of robots currently connected, and provisions containers for newly
//! registered robots from a queue.
//!
//! # Architecture
//!
//! ```text
//! VPN status file ─▶ watcher ─▶ reconciler ─▶ firewall (NAT DNAT rules)
//!                                          ─▶ DNS (hosts file + restart)
//!                                          ─▶ store (connection rows)
//!                                          ─▶ runtime (lxc start/stop)
//!
//! provisioning queue ─▶ workers ─▶ address allocation + config render
//! ```
//!
//! # Modules
//!
//! - [`addr`]: overlay address allocation
//! - [`config`]: configuration types and loading
//! - [`diff`]: snapshot diffing
//! - [`dns`]: DNS records and service control
//! - [`error`]: error types
//! - [`firewall`]: NAT rule management
//! - [`provision`]: container provisioning workers
//! - [`reconcile`]: connection reconciliation
//! - [`runtime`]: container runtime control
//! - [`store`]: persistent datastore
//! - [`vpn`]: VPN status sources

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod addr;
pub mod config;
pub mod diff;
pub mod dns;
pub mod error;
pub mod firewall;
pub mod provision;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod vpn;

// Re-export commonly used types at the crate root
pub use addr::AddressAllocator;
pub use config::{load_config, load_config_with_env, Config};
pub use diff::{diff, Diff};
pub use dns::{DnsManager, DnsService, DnsmasqService};
pub use error::{
    ConfigError, DnsError, FirewallError, FleetError, ProvisionError, RuntimeError, StoreError,
};
pub use firewall::{FirewallManager, IptablesBackend, NatBackend};
pub use provision::Provisioner;
pub use reconcile::Reconciler;
pub use runtime::{ContainerRuntime, LxcRuntime};
pub use store::Store;
pub use vpn::ClientRecord;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
