//! DNS zone management
//!
//! Maintains the container hosts file consumed by the DNS service and
//! restarts the service when the record set has changed. The service
//! itself sits behind the [`DnsService`] trait so tests can count restarts
//! instead of touching init scripts.

mod dnsmasq;
mod manager;

pub use dnsmasq::DnsmasqService;
pub use manager::DnsManager;

use async_trait::async_trait;

use crate::error::DnsError;

/// Seam over the external DNS service
#[async_trait]
pub trait DnsService: Send + Sync {
    /// Restart the service, blocking until it has restarted
    async fn restart(&self) -> Result<(), DnsError>;
}
