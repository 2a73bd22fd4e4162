//! Configuration types for fleetd
//!
//! This module defines all configuration structures used by the daemon.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Local node identity
    #[serde(default)]
    pub node: NodeConfig,

    /// VPN status sources
    #[serde(default)]
    pub vpn: VpnConfig,

    /// Firewall and NAT settings
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// DNS zone settings
    #[serde(default)]
    pub dns: DnsConfig,

    /// Container layout and runtime settings
    #[serde(default)]
    pub containers: ContainerConfig,

    /// Datastore settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Provisioning worker settings
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vpn.validate()?;
        self.firewall.validate()?;
        self.dns.validate()?;
        self.containers.validate()?;
        self.provision.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            node: NodeConfig::default(),
            vpn: VpnConfig::default(),
            firewall: FirewallConfig::default(),
            dns: DnsConfig::default(),
            containers: ContainerConfig::default(),
            store: StoreConfig::default(),
            provision: ProvisionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Local node identity
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Node name; defaults to the OS hostname when unset
    #[serde(default)]
    pub name: Option<String>,

    /// Node address advertised in the store; autodetected when unset
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
}

/// VPN status sources
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VpnConfig {
    /// Path to the periodically rewritten VPN status file
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,

    /// Path to the DHCP leases file used to backfill addresses
    #[serde(default = "default_leases_file")]
    pub leases_file: PathBuf,

    /// Status file poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl VpnConfig {
    /// Validate VPN configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the poll interval as a Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            status_file: default_status_file(),
            leases_file: default_leases_file(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Firewall and NAT settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    /// VPN tunnel interface robot traffic arrives on
    #[serde(default = "default_vpn_interface")]
    pub vpn_interface: String,

    /// Uplink interface carrying external WebSocket traffic
    #[serde(default = "default_uplink")]
    pub uplink_interface: String,

    /// Prefix of the per-container veth interfaces
    #[serde(default = "default_veth_prefix")]
    pub veth_prefix: String,

    /// Port the master service listens on
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// First external WebSocket port handed out
    #[serde(default = "default_ws_start_port")]
    pub ws_start_port: u16,

    /// Port the WebSocket bridge listens on inside each container
    #[serde(default = "default_ws_internal_port")]
    pub ws_internal_port: u16,
}

impl FirewallConfig {
    /// Validate firewall configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uplink_interface.is_empty() {
            return Err(ConfigError::ValidationError(
                "uplink_interface cannot be empty".into(),
            ));
        }
        // Interface name length limit (IFNAMSIZ = 16 on Linux)
        if self.uplink_interface.len() > 15 {
            return Err(ConfigError::ValidationError(format!(
                "Interface name '{}' too long (max 15 chars)",
                self.uplink_interface
            )));
        }
        if self.ws_start_port == 0 {
            return Err(ConfigError::ValidationError(
                "ws_start_port must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            vpn_interface: default_vpn_interface(),
            uplink_interface: default_uplink(),
            veth_prefix: default_veth_prefix(),
            master_port: default_master_port(),
            ws_start_port: default_ws_start_port(),
            ws_internal_port: default_ws_internal_port(),
        }
    }
}

/// DNS zone settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Hosts file regenerated from the record map
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Command used to restart the DNS service
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,
}

impl DnsConfig {
    /// Validate DNS configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.restart_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "dns restart_command cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            hosts_file: default_hosts_file(),
            restart_command: default_restart_command(),
        }
    }
}

/// Container layout and runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerConfig {
    /// Directory holding one subdirectory per container
    #[serde(default = "default_containers_root")]
    pub root: PathBuf,

    /// Container config template with {anchor} and {address} placeholders
    #[serde(default = "default_template_path")]
    pub template: PathBuf,
}

impl ContainerConfig {
    /// Validate container configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "containers root cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            root: default_containers_root(),
            template: default_template_path(),
        }
    }
}

/// Datastore settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Provisioning worker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionConfig {
    /// Number of concurrent provisioning workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Base idle delay in milliseconds before polling the queue again
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl ProvisionConfig {
    /// Validate provisioning configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "provision workers must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the base idle delay as a Duration
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            target: true,
        }
    }
}

// Default value functions for serde
const fn default_true() -> bool {
    true
}

fn default_status_file() -> PathBuf {
    PathBuf::from("/run/openvpn.status")
}

fn default_leases_file() -> PathBuf {
    PathBuf::from("/var/lib/misc/dnsmasq.leases")
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_vpn_interface() -> String {
    "tun0".into()
}

fn default_uplink() -> String {
    "eth0".into()
}

fn default_veth_prefix() -> String {
    "veth.".into()
}

const fn default_master_port() -> u16 {
    11311
}

const fn default_ws_start_port() -> u16 {
    7000
}

const fn default_ws_internal_port() -> u16 {
    9090
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/lxc-hosts")
}

fn default_restart_command() -> Vec<String> {
    vec!["/etc/init.d/dnsmasq".into(), "restart".into()]
}

fn default_containers_root() -> PathBuf {
    PathBuf::from("/lxc")
}

fn default_template_path() -> PathBuf {
    PathBuf::from("/lxc/config.template")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/fleetd/fleet.db")
}

const fn default_workers() -> usize {
    1
}

const fn default_base_delay_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
