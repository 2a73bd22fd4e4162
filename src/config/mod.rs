//! Configuration module for fleetd
//!
//! Configuration is loaded from JSON files with optional environment
//! variable overrides.

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ContainerConfig, DnsConfig, FirewallConfig, LogConfig, NodeConfig, ProvisionConfig,
    StoreConfig, VpnConfig,
};
