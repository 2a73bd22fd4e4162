//! Firewall management
//!
//! Keeps the NAT PREROUTING chain in agreement with the set of connected
//! robots. Each robot gets four DNAT rules (see [`rule::RuleSet`]) plus a
//! freshly generated external WebSocket port.
//!
//! The packet filter itself sits behind the [`NatBackend`] trait so tests
//! can record rule operations instead of shelling out.

mod iptables;
mod manager;
mod rule;

pub use iptables::IptablesBackend;
pub use manager::FirewallManager;
pub use rule::{DnatTarget, NatRule, RuleSet};

use async_trait::async_trait;

use crate::error::FirewallError;

/// Seam over the host packet filter's NAT table
#[async_trait]
pub trait NatBackend: Send + Sync {
    /// Append a rule to the PREROUTING chain
    async fn append(&self, rule: &NatRule) -> Result<(), FirewallError>;

    /// Delete a previously appended rule
    async fn delete(&self, rule: &NatRule) -> Result<(), FirewallError>;

    /// Flush the whole NAT table
    async fn flush(&self) -> Result<(), FirewallError>;
}
