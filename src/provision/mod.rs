//! Container provisioning
//!
//! Workers drain the `new_containers` queue: claim a task, allocate the
//! container's overlay address, persist its placement, and lay down its
//! directory and rendered config. Several workers may run concurrently;
//! the claim is an atomic dequeue, so a task is provisioned at most once
//! no matter how many workers race for it.
//!
//! An idle worker backs off by its base delay plus one second per
//! container placed on the node, seeded from the store at startup, which
//! keeps busier nodes polling less aggressively even across restarts.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::addr::AddressAllocator;
use crate::error::ProvisionError;
use crate::store::Store;

/// Compute the idle backoff for a worker
///
/// Grows linearly with the number of containers the worker has provisioned.
#[must_use]
pub fn backoff_delay(base: Duration, provisioned: u64) -> Duration {
    base + Duration::from_secs(provisioned)
}

/// Render a container config from its template
///
/// Replaces every `{anchor}` and `{address}` placeholder.
#[must_use]
pub fn render_config(template: &str, anchor: &str, address: &str) -> String {
    template
        .replace("{anchor}", anchor)
        .replace("{address}", address)
}

/// One provisioning worker
pub struct Provisioner {
    store: Store,
    allocator: AddressAllocator,
    node_id: i64,
    containers_root: PathBuf,
    template_path: PathBuf,
    base_delay: Duration,
}

impl Provisioner {
    /// Create a worker bound to one node
    #[must_use]
    pub fn new(
        store: Store,
        node_id: i64,
        containers_root: PathBuf,
        template_path: PathBuf,
        base_delay: Duration,
    ) -> Self {
        Self {
            store,
            allocator: AddressAllocator::new(),
            node_id,
            containers_root,
            template_path,
            base_delay,
        }
    }

    /// Containers already placed on this node
    ///
    /// Seeds the idle backoff so a restarted daemon on a full node keeps
    /// polling at its slower pace instead of resetting to the base delay.
    pub async fn placed_count(&self) -> u64 {
        match self.store.count_containers_on_node(self.node_id).await {
            Ok(count) => u64::try_from(count).unwrap_or(0),
            Err(e) => {
                error!(error = %e, "Failed to count placed containers; backoff starts from zero");
                0
            }
        }
    }

    /// Drain the queue until a fatal error occurs
    ///
    /// Recoverable failures abandon the task and keep the worker alive;
    /// the affected container needs operator attention but the queue keeps
    /// moving.
    pub async fn run(self) {
        let mut provisioned = self.placed_count().await;

        loop {
            match self.provision_next().await {
                Ok(true) => {
                    provisioned += 1;
                }
                Ok(false) => {
                    tokio::time::sleep(backoff_delay(self.base_delay, provisioned)).await;
                }
                Err(e) if e.is_recoverable() => {
                    error!(error = %e, "Provisioning task abandoned");
                    tokio::time::sleep(backoff_delay(self.base_delay, provisioned)).await;
                }
                Err(e) => {
                    error!(error = %e, "Fatal provisioning error; worker stopping");
                    break;
                }
            }
        }
    }

    /// Claim and provision one container
    ///
    /// Returns `Ok(false)` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError` when a claimed task cannot be completed.
    /// Partial effects (a claimed queue row, a created directory) are not
    /// rolled back.
    pub async fn provision_next(&self) -> Result<bool, ProvisionError> {
        let Some(container_id) = self.store.claim_provision_task().await? else {
            debug!("Provisioning queue empty");
            return Ok(false);
        };

        let Some(robot) = self.store.robot_for_container(container_id).await? else {
            error!(container_id = container_id, "Claimed container has no robot");
            return Err(ProvisionError::RobotNotFound { container_id });
        };

        let address = self.allocator.allocate(container_id)?;

        self.store
            .set_container_placement(container_id, address, self.node_id)
            .await?;

        let container_dir = self.containers_root.join(&robot.anchor);
        tokio::fs::create_dir_all(&container_dir).await.map_err(|e| {
            error!(path = ?container_dir, error = %e, "Failed to create container directory");
            ProvisionError::resource_failed(container_dir.display().to_string(), e.to_string())
        })?;

        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| {
                error!(path = ?self.template_path, error = %e, "Failed to read config template");
                ProvisionError::resource_failed(
                    self.template_path.display().to_string(),
                    e.to_string(),
                )
            })?;

        let config_path = container_dir.join("config");
        let rendered = render_config(&template, &robot.anchor, &address.to_string());
        tokio::fs::write(&config_path, rendered.as_bytes())
            .await
            .map_err(|e| {
                error!(path = ?config_path, error = %e, "Failed to write container config");
                ProvisionError::resource_failed(config_path.display().to_string(), e.to_string())
            })?;

        info!(
            anchor = %robot.anchor,
            container_id = container_id,
            address = %address,
            "Container provisioned"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_with_provisioned_count() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(3500));
    }

    #[test]
    fn test_render_config_replaces_placeholders() {
        let template = "lxc.utsname = {anchor}\nlxc.network.ipv4 = {address}/16\n# {anchor}\n";
        let rendered = render_config(template, "robot1", "10.10.0.42");
        assert_eq!(
            rendered,
            "lxc.utsname = robot1\nlxc.network.ipv4 = 10.10.0.42/16\n# robot1\n"
        );
    }

    #[test]
    fn test_render_config_without_placeholders_is_identity() {
        let template = "lxc.rootfs = /lxc/base\n";
        assert_eq!(render_config(template, "r", "1.2.3.4"), template);
    }
}
