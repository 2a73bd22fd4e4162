//! dnsmasq service control
//!
//! Restarts dnsmasq through its init script and waits for the script to
//! finish, so a restart observed by the caller really has happened.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::DnsService;
use crate::error::DnsError;

/// Production DNS service driving dnsmasq
#[derive(Debug, Clone)]
pub struct DnsmasqService {
    command: Vec<String>,
}

impl DnsmasqService {
    /// Create a service wrapper around the configured restart command
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DnsService for DnsmasqService {
    async fn restart(&self) -> Result<(), DnsError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(DnsError::restart_failed("empty restart command"));
        };

        debug!(command = ?self.command, "Restarting DNS service");

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| DnsError::restart_failed(e.to_string()))?;

        if !status.success() {
            return Err(DnsError::restart_failed(format!(
                "{program} exited with {status}"
            )));
        }

        info!("DNS service restarted");
        Ok(())
    }
}
