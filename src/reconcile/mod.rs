//! Connection reconciliation
//!
//! The reconciler keeps firewall, DNS, datastore, and container runtime in
//! agreement with the set of robots currently connected to the VPN.
//!
//! # Architecture
//!
//! ```text
//! status file ──watcher──▶ dirty channel ──▶ reconcile batch
//!                                               │
//!                            parse + merge leases + filter
//!                                               │
//!                                   diff against snapshot
//!                                               │
//!        firewall ─▶ DNS records ─▶ store ─▶ DNS restart ─▶ runtime
//! ```
//!
//! Batches are serialized by the capacity-1 dirty channel; the snapshot is
//! replaced unconditionally at the end of every batch, so a partially
//! failed batch self-heals on the next rewrite rather than replaying
//! forever.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::diff::diff;
use crate::dns::DnsManager;
use crate::error::Result;
use crate::firewall::FirewallManager;
use crate::runtime::ContainerRuntime;
use crate::store::Store;
use crate::vpn::{merge_leases, parse_leases, parse_status, ClientRecord};

/// Reconciles observed VPN connections against managed state
pub struct Reconciler {
    node_id: i64,
    store: Store,
    firewall: Arc<FirewallManager>,
    dns: Arc<DnsManager>,
    runtime: Arc<dyn ContainerRuntime>,
    status_file: PathBuf,
    leases_file: PathBuf,
    snapshot: HashMap<String, ClientRecord>,
}

impl Reconciler {
    /// Create a reconciler for one node
    #[must_use]
    pub fn new(
        node_id: i64,
        store: Store,
        firewall: Arc<FirewallManager>,
        dns: Arc<DnsManager>,
        runtime: Arc<dyn ContainerRuntime>,
        status_file: PathBuf,
        leases_file: PathBuf,
    ) -> Self {
        Self {
            node_id,
            store,
            firewall,
            dns,
            runtime,
            status_file,
            leases_file,
            snapshot: HashMap::new(),
        }
    }

    /// Reset managed state left over from a previous run
    ///
    /// Flushes the NAT table and purges this node's connection rows. The
    /// first batch then rebuilds everything from the live status file.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the purge fails; the daemon should
    /// not start reconciling on top of stale state.
    pub async fn startup(&self) -> Result<()> {
        self.firewall.flush().await?;
        let purged = self.store.purge_connections(self.node_id).await?;
        info!(purged = purged, "Reconciler state reset");
        Ok(())
    }

    /// Consume change signals until the channel closes
    pub async fn run(mut self, mut rx: mpsc::Receiver<()>) {
        while rx.recv().await.is_some() {
            self.reconcile_once().await;
        }
        info!("Change channel closed; reconciler exiting");
    }

    /// Run one reconciliation batch
    pub async fn reconcile_once(&mut self) {
        let contents = match tokio::fs::read_to_string(&self.status_file).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = ?self.status_file, error = %e, "Cannot read status file; skipping batch");
                return;
            }
        };

        let mut current = parse_status(&contents);

        // Leases are best effort; a missing file just means no backfill
        if let Ok(lease_contents) = tokio::fs::read_to_string(&self.leases_file).await {
            merge_leases(&mut current, &parse_leases(&lease_contents));
        }

        let Some(current) = self.filter(current).await else {
            return;
        };

        let changes = diff(&current, &self.snapshot);
        if changes.is_empty() {
            debug!("Snapshot unchanged");
            self.snapshot = current;
            return;
        }

        info!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            changed = changes.changed.len(),
            "Reconciling connection changes"
        );

        // Rules exist before their container starts and outlive it until
        // after it stops, so traffic never hits a running container without
        // a NAT path.
        for (anchor, record) in &changes.added {
            if let Some(virtual_address) = record.virtual_address {
                if let Err(e) = self.firewall.create_rules(anchor, virtual_address).await {
                    error!(anchor = %anchor, error = %e, "Failed to install firewall rules");
                }
            }
        }
        for anchor in changes.removed.keys() {
            if let Err(e) = self.firewall.delete_rules(anchor).await {
                error!(anchor = %anchor, error = %e, "Failed to remove firewall rules");
            }
        }

        for anchor in changes.added.keys() {
            if let Err(e) = self.dns.append_record(anchor).await {
                error!(anchor = %anchor, error = %e, "Failed to add DNS record");
            }
        }
        for anchor in changes.removed.keys() {
            self.dns.delete_record(anchor);
        }

        if let Err(e) = self
            .store
            .apply_connection_changes(self.node_id, &changes)
            .await
        {
            error!(error = %e, "Failed to persist connection changes");
        }

        if let Err(e) = self.dns.restart().await {
            error!(error = %e, "Failed to restart DNS service");
        }

        for anchor in changes.added.keys() {
            if let Err(e) = self.runtime.start(anchor).await {
                error!(anchor = %anchor, error = %e, "Failed to start container");
            }
        }
        for anchor in changes.removed.keys() {
            if let Err(e) = self.runtime.stop(anchor).await {
                error!(anchor = %anchor, error = %e, "Failed to stop container");
            }
        }

        // Unconditional: a failed step above is not replayed, the next
        // batch re-diffs against reality instead
        self.snapshot = current;
    }

    /// Drop entries that cannot be reconciled
    ///
    /// Entries without a virtual address have not finished address
    /// assignment and will appear complete in a later rewrite. Entries
    /// whose anchor has no robot are unprovisionable and dropped loudly.
    /// Yields `None` when the store is unreachable; the whole batch is
    /// skipped rather than reconciled against half-validated data.
    async fn filter(
        &self,
        records: HashMap<String, ClientRecord>,
    ) -> Option<HashMap<String, ClientRecord>> {
        let mut filtered = HashMap::with_capacity(records.len());

        for (anchor, record) in records {
            if record.virtual_address.is_none() {
                warn!(anchor = %anchor, "Client has no virtual address yet; deferring");
                continue;
            }

            match self.store.anchor_info(&anchor).await {
                Ok(Some(_)) => {
                    filtered.insert(anchor, record);
                }
                Ok(None) => {
                    error!(anchor = %anchor, "Connected client has no registered robot; ignoring");
                }
                Err(e) => {
                    error!(error = %e, "Store lookup failed during filtering; skipping batch");
                    return None;
                }
            }
        }

        Some(filtered)
    }

    /// Current snapshot of reconciled connections
    #[must_use]
    pub fn snapshot(&self) -> &HashMap<String, ClientRecord> {
        &self.snapshot
    }
}
