//! Container runtime control
//!
//! Starts and stops LXC containers by anchor name. The runtime sits behind
//! the [`ContainerRuntime`] trait; the reconciler logs failures and moves
//! on rather than retrying, since the next connect attempt produces a
//! fresh start anyway.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RuntimeError;

/// Seam over the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start the container for an anchor, blocking until the runtime
    /// command returns
    async fn start(&self, anchor: &str) -> Result<(), RuntimeError>;

    /// Stop the container for an anchor, blocking until the runtime
    /// command returns
    async fn stop(&self, anchor: &str) -> Result<(), RuntimeError>;
}

/// Production runtime driving the LXC tools
#[derive(Debug, Clone, Default)]
pub struct LxcRuntime;

impl LxcRuntime {
    /// Create a new runtime handle
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn run(command: &str, args: &[&str], anchor: &str) -> Result<(), RuntimeError> {
        debug!(command = %command, anchor = %anchor, "Invoking container runtime");

        let status = Command::new(command)
            .args(args)
            .status()
            .await
            .map_err(|e| RuntimeError::spawn_failed(command, e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(RuntimeError::non_zero_exit(command, anchor, code)),
            None => Err(RuntimeError::non_zero_exit(command, anchor, -1)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for LxcRuntime {
    async fn start(&self, anchor: &str) -> Result<(), RuntimeError> {
        Self::run("lxc-start", &["-n", anchor, "-d"], anchor).await?;
        info!(anchor = %anchor, "Container started");
        Ok(())
    }

    async fn stop(&self, anchor: &str) -> Result<(), RuntimeError> {
        Self::run("lxc-stop", &["-n", anchor], anchor).await?;
        info!(anchor = %anchor, "Container stopped");
        Ok(())
    }
}
