//! iptables NAT backend
//!
//! Drives the host NAT table by invoking `iptables -t nat`. Rules are
//! appended to and deleted from PREROUTING with the exact same argument
//! vector, so a delete always matches its append.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::rule::NatRule;
use super::NatBackend;
use crate::error::FirewallError;

/// Production NAT backend invoking iptables
#[derive(Debug, Clone, Default)]
pub struct IptablesBackend;

impl IptablesBackend {
    /// Create a new backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn run(args: &[String]) -> Result<(), FirewallError> {
        debug!(args = ?args, "iptables");

        let output = Command::new("iptables")
            .arg("-t")
            .arg("nat")
            .args(args)
            .output()
            .await
            .map_err(|e| FirewallError::command_failed("iptables", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FirewallError::command_failed(
                format!("iptables -t nat {}", args.join(" ")),
                stderr.trim().to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NatBackend for IptablesBackend {
    async fn append(&self, rule: &NatRule) -> Result<(), FirewallError> {
        let mut args = vec!["-A".to_string(), "PREROUTING".to_string()];
        args.extend(rule.to_args());
        Self::run(&args).await
    }

    async fn delete(&self, rule: &NatRule) -> Result<(), FirewallError> {
        let mut args = vec!["-D".to_string(), "PREROUTING".to_string()];
        args.extend(rule.to_args());
        Self::run(&args).await
    }

    async fn flush(&self) -> Result<(), FirewallError> {
        Self::run(&["-F".to_string()]).await
    }
}
