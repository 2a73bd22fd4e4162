//! Firewall manager
//!
//! Tracks the rule sets installed for connected robots and mirrors every
//! change into the NAT backend. Rule state lives in memory only; the
//! startup flush wipes whatever a previous run left in the NAT table, so
//! memory and table never disagree for longer than one batch.
//!
//! # WebSocket Ports
//!
//! External WebSocket ports are handed out by a strictly monotonic counter
//! seeded from configuration. Ports are never recycled, not even when the
//! robot disconnects; the assignment is persisted on the robot row so
//! external infrastructure can keep routing to it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::rule::{DnatTarget, NatRule, RuleSet};
use super::NatBackend;
use crate::addr;
use crate::config::FirewallConfig;
use crate::error::FirewallError;
use crate::store::Store;

/// Manages NAT rule sets for connected robots
pub struct FirewallManager {
    backend: Arc<dyn NatBackend>,
    store: Store,
    config: FirewallConfig,
    rules: RwLock<HashMap<String, RuleSet>>,
    next_ws_port: AtomicU32,
}

impl FirewallManager {
    /// Create a new manager
    #[must_use]
    pub fn new(backend: Arc<dyn NatBackend>, store: Store, config: FirewallConfig) -> Self {
        let next_ws_port = AtomicU32::new(u32::from(config.ws_start_port));
        Self {
            backend,
            store,
            config,
            rules: RwLock::new(HashMap::new()),
            next_ws_port,
        }
    }

    /// Flush the NAT table
    ///
    /// Run once at startup so rules from a previous run never linger.
    ///
    /// # Errors
    ///
    /// Returns `FirewallError` if the backend flush fails.
    pub async fn flush(&self) -> Result<(), FirewallError> {
        self.rules.write().clear();
        self.backend.flush().await?;
        info!("NAT table flushed");
        Ok(())
    }

    /// Install the rule set for a newly connected robot
    ///
    /// Looks up the robot's container, generates a WebSocket port, appends
    /// the four DNAT rules, and persists the port on the robot row.
    ///
    /// # Errors
    ///
    /// Returns `RobotNotFound` for an anchor with no registered robot and
    /// `ContainerNotReady` when its container has no overlay address yet;
    /// the caller logs these and skips the anchor. Also returns
    /// `FirewallError` if a backend append or the port persist fails; rules
    /// already appended stay in the table and the next startup flush
    /// reclaims them.
    pub async fn create_rules(
        &self,
        anchor: &str,
        virtual_address: Ipv4Addr,
    ) -> Result<(), FirewallError> {
        let Some(info) = self.store.anchor_info(anchor).await? else {
            return Err(FirewallError::robot_not_found(anchor));
        };
        let Some(container_address) = info.container_addr() else {
            return Err(FirewallError::container_not_ready(anchor));
        };

        let ws_port = self.next_ws_port()?;
        let rule_set = self.build_rule_set(anchor, virtual_address, container_address, ws_port);

        for rule in rule_set.iter() {
            self.backend.append(rule).await?;
        }

        self.store.set_robot_wsport(info.robot_id, ws_port).await?;
        self.rules.write().insert(anchor.to_string(), rule_set);

        info!(
            anchor = %anchor,
            virtual_address = %virtual_address,
            container = %container_address,
            ws_port = ws_port,
            "Firewall rules installed"
        );
        Ok(())
    }

    /// Remove the rule set for a disconnected robot
    ///
    /// Deleting an anchor that was never tracked is a logged no-op; the
    /// startup purge makes that a normal occurrence right after a restart.
    ///
    /// # Errors
    ///
    /// Returns the first backend delete failure, after attempting all four
    /// deletes.
    pub async fn delete_rules(&self, anchor: &str) -> Result<(), FirewallError> {
        let Some(rule_set) = self.rules.write().remove(anchor) else {
            warn!(anchor = %anchor, "No rules tracked for anchor; nothing to delete");
            return Ok(());
        };

        let mut first_error = None;
        for rule in rule_set.iter() {
            if let Err(e) = self.backend.delete(rule).await {
                error!(anchor = %anchor, error = %e, "Failed to delete NAT rule");
                first_error.get_or_insert(e);
            }
        }

        debug!(anchor = %anchor, "Firewall rules removed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check whether an anchor currently has rules installed
    #[must_use]
    pub fn has_rules(&self, anchor: &str) -> bool {
        self.rules.read().contains_key(anchor)
    }

    /// Number of anchors with installed rules
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.rules.read().len()
    }

    fn next_ws_port(&self) -> Result<u16, FirewallError> {
        let port = self.next_ws_port.fetch_add(1, Ordering::SeqCst);
        u16::try_from(port).map_err(|_| FirewallError::PortExhausted)
    }

    fn build_rule_set(
        &self,
        anchor: &str,
        virtual_address: Ipv4Addr,
        container_address: Ipv4Addr,
        ws_port: u16,
    ) -> RuleSet {
        let veth = format!("{}{}", self.config.veth_prefix, anchor);

        RuleSet {
            // Robot reaching its container over the tunnel
            client: NatRule {
                source: Some(virtual_address),
                destination: Some(container_address),
                in_interface: Some(self.config.vpn_interface.clone()),
                dport: None,
                target: DnatTarget::to_address(container_address),
            },
            // Container reaching its robot
            container: NatRule {
                source: Some(container_address),
                destination: Some(virtual_address),
                in_interface: Some(veth.clone()),
                dport: None,
                target: DnatTarget::to_address(virtual_address),
            },
            // Container's master traffic redirected to the robot
            master: NatRule {
                source: Some(container_address),
                destination: Some(addr::GATEWAY),
                in_interface: Some(veth),
                dport: Some(self.config.master_port),
                target: DnatTarget::to_address_port(virtual_address, self.config.master_port),
            },
            // External WebSocket traffic forwarded into the container
            websocket: NatRule {
                source: None,
                destination: None,
                in_interface: Some(self.config.uplink_interface.clone()),
                dport: Some(ws_port),
                target: DnatTarget::to_address_port(
                    container_address,
                    self.config.ws_internal_port,
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        ops: Mutex<Vec<(String, NatRule)>>,
    }

    impl RecordingBackend {
        fn ops(&self) -> Vec<(String, NatRule)> {
            self.ops.lock().clone()
        }
    }

    #[async_trait]
    impl NatBackend for RecordingBackend {
        async fn append(&self, rule: &NatRule) -> Result<(), FirewallError> {
            self.ops.lock().push(("append".into(), rule.clone()));
            Ok(())
        }

        async fn delete(&self, rule: &NatRule) -> Result<(), FirewallError> {
            self.ops.lock().push(("delete".into(), rule.clone()));
            Ok(())
        }

        async fn flush(&self) -> Result<(), FirewallError> {
            self.ops.lock().push((
                "flush".into(),
                NatRule {
                    source: None,
                    destination: None,
                    in_interface: None,
                    dport: None,
                    target: DnatTarget::to_address(Ipv4Addr::UNSPECIFIED),
                },
            ));
            Ok(())
        }
    }

    async fn addressed_store(anchor: &str, address: &str) -> Store {
        let store = Store::connect_memory().await.unwrap();
        store.migrate().await.unwrap();
        let node = store
            .register_node("node1", "192.168.1.10".parse().unwrap())
            .await
            .unwrap();
        let robot = store.insert_robot(anchor).await.unwrap();
        let container = store.insert_container(robot.id).await.unwrap();
        store
            .set_container_placement(container.id, address.parse().unwrap(), node.id)
            .await
            .unwrap();
        store
    }

    fn manager(backend: Arc<RecordingBackend>, store: Store) -> FirewallManager {
        FirewallManager::new(backend, store, FirewallConfig::default())
    }

    #[tokio::test]
    async fn test_create_then_delete_restores_empty_state() {
        let backend = Arc::new(RecordingBackend::default());
        let store = addressed_store("robot1", "10.10.0.42").await;
        let mgr = manager(Arc::clone(&backend), store);

        mgr.create_rules("robot1", "10.9.0.6".parse().unwrap())
            .await
            .unwrap();
        assert!(mgr.has_rules("robot1"));
        assert_eq!(backend.ops().len(), 4);

        mgr.delete_rules("robot1").await.unwrap();
        assert!(!mgr.has_rules("robot1"));
        assert_eq!(mgr.tracked_count(), 0);

        // The four deletes mirror the four appends
        let ops = backend.ops();
        let appended: Vec<_> = ops
            .iter()
            .filter(|(op, _)| op == "append")
            .map(|(_, r)| r.clone())
            .collect();
        let deleted: Vec<_> = ops
            .iter()
            .filter(|(op, _)| op == "delete")
            .map(|(_, r)| r.clone())
            .collect();
        assert_eq!(appended, deleted);
    }

    #[tokio::test]
    async fn test_ws_ports_monotonic_and_never_reused() {
        let backend = Arc::new(RecordingBackend::default());
        let store = addressed_store("robot1", "10.10.0.42").await;
        let robot2 = store.insert_robot("robot2").await.unwrap();
        let c2 = store.insert_container(robot2.id).await.unwrap();
        store
            .set_container_placement(c2.id, "10.10.0.43".parse().unwrap(), 1)
            .await
            .unwrap();
        let mgr = manager(backend, store.clone());

        mgr.create_rules("robot1", "10.9.0.6".parse().unwrap())
            .await
            .unwrap();
        mgr.create_rules("robot2", "10.9.0.7".parse().unwrap())
            .await
            .unwrap();

        let p1 = store.anchor_info("robot1").await.unwrap().unwrap().wsport;
        let p2 = store.anchor_info("robot2").await.unwrap().unwrap().wsport;
        assert_eq!(p1, Some(7000));
        assert_eq!(p2, Some(7001));

        // Reconnecting does not hand the old port back
        mgr.delete_rules("robot1").await.unwrap();
        mgr.create_rules("robot1", "10.9.0.6".parse().unwrap())
            .await
            .unwrap();
        let p3 = store.anchor_info("robot1").await.unwrap().unwrap().wsport;
        assert_eq!(p3, Some(7002));
    }

    #[tokio::test]
    async fn test_delete_unknown_anchor_is_noop() {
        let backend = Arc::new(RecordingBackend::default());
        let store = addressed_store("robot1", "10.10.0.42").await;
        let mgr = manager(Arc::clone(&backend), store);

        mgr.delete_rules("never-seen").await.unwrap();
        assert!(backend.ops().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_anchor_is_rejected() {
        let backend = Arc::new(RecordingBackend::default());
        let store = Store::connect_memory().await.unwrap();
        store.migrate().await.unwrap();
        let mgr = manager(Arc::clone(&backend), store);

        let result = mgr.create_rules("ghost", "10.9.0.9".parse().unwrap()).await;
        assert!(matches!(result, Err(FirewallError::RobotNotFound { .. })));
        assert!(!mgr.has_rules("ghost"));
        assert!(backend.ops().is_empty());
    }

    #[tokio::test]
    async fn test_unaddressed_container_is_rejected() {
        let backend = Arc::new(RecordingBackend::default());
        let store = Store::connect_memory().await.unwrap();
        store.migrate().await.unwrap();
        let robot = store.insert_robot("robot1").await.unwrap();
        store.insert_container(robot.id).await.unwrap();
        let mgr = manager(Arc::clone(&backend), store);

        let result = mgr.create_rules("robot1", "10.9.0.6".parse().unwrap()).await;
        assert!(matches!(
            result,
            Err(FirewallError::ContainerNotReady { .. })
        ));
        assert!(!mgr.has_rules("robot1"));
        assert!(backend.ops().is_empty());
    }

    #[tokio::test]
    async fn test_websocket_rule_uses_assigned_port() {
        let backend = Arc::new(RecordingBackend::default());
        let store = addressed_store("robot1", "10.10.0.42").await;
        let mgr = manager(Arc::clone(&backend), store);

        mgr.create_rules("robot1", "10.9.0.6".parse().unwrap())
            .await
            .unwrap();

        let ops = backend.ops();
        let websocket = &ops[3].1;
        assert_eq!(websocket.dport, Some(7000));
        assert_eq!(websocket.in_interface.as_deref(), Some("eth0"));
        assert_eq!(
            websocket.target,
            DnatTarget::to_address_port("10.10.0.42".parse().unwrap(), 9090)
        );
    }
}
