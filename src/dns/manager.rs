//! DNS record manager
//!
//! Holds the container name to address map, regenerates the hosts file
//! from it, and restarts the DNS service when the map has changed since
//! the last restart. One reconciliation batch makes any number of record
//! changes and then calls [`DnsManager::restart`] exactly once.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::DnsService;
use crate::error::DnsError;
use crate::store::Store;

/// Hostname prefix for container records
const HOST_PREFIX: &str = "lxc-";

#[derive(Debug, Default)]
struct RecordMap {
    records: HashMap<String, Ipv4Addr>,
    dirty: bool,
}

/// Manages DNS records for connected robots' containers
pub struct DnsManager {
    store: Store,
    service: Arc<dyn DnsService>,
    hosts_file: PathBuf,
    state: Mutex<RecordMap>,
}

impl DnsManager {
    /// Create a new manager
    #[must_use]
    pub fn new(store: Store, service: Arc<dyn DnsService>, hosts_file: PathBuf) -> Self {
        Self {
            store,
            service,
            hosts_file,
            state: Mutex::new(RecordMap::default()),
        }
    }

    /// Add the record for a newly connected robot's container
    ///
    /// # Errors
    ///
    /// Returns `RobotNotFound` for an anchor with no registered robot and
    /// `ContainerNotReady` when its container has no overlay address yet;
    /// the caller logs these and skips the anchor. Also returns `DnsError`
    /// if the store lookup fails.
    pub async fn append_record(&self, anchor: &str) -> Result<(), DnsError> {
        let Some(info) = self.store.anchor_info(anchor).await? else {
            return Err(DnsError::RobotNotFound {
                anchor: anchor.to_string(),
            });
        };
        let Some(address) = info.container_addr() else {
            return Err(DnsError::ContainerNotReady {
                anchor: anchor.to_string(),
            });
        };

        let mut state = self.state.lock();
        state.records.insert(anchor.to_string(), address);
        state.dirty = true;
        debug!(anchor = %anchor, address = %address, "DNS record added");
        Ok(())
    }

    /// Drop the record for a disconnected robot
    pub fn delete_record(&self, anchor: &str) {
        let mut state = self.state.lock();
        if state.records.remove(anchor).is_some() {
            state.dirty = true;
            debug!(anchor = %anchor, "DNS record removed");
        } else {
            warn!(anchor = %anchor, "No DNS record for anchor; nothing to delete");
        }
    }

    /// Regenerate the hosts file and restart the service, if anything
    /// changed since the last restart
    ///
    /// The file is written to a sibling temp path and renamed into place,
    /// so a failed write leaves the previous file intact. A failed write
    /// also skips the service restart; the next changed batch retries.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if the write or the service restart fails.
    pub async fn restart(&self) -> Result<(), DnsError> {
        let contents = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            render_hosts(&state.records)
        };

        let tmp_path = self.hosts_file.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents.as_bytes())
            .await
            .map_err(|e| DnsError::write_failed(tmp_path.display().to_string(), e.to_string()))?;
        tokio::fs::rename(&tmp_path, &self.hosts_file)
            .await
            .map_err(|e| {
                DnsError::write_failed(self.hosts_file.display().to_string(), e.to_string())
            })?;

        info!(hosts_file = ?self.hosts_file, "Hosts file regenerated");
        self.service.restart().await
    }

    /// Number of records currently held
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }
}

fn render_hosts(records: &HashMap<String, Ipv4Addr>) -> String {
    let mut contents = String::new();
    for (anchor, address) in records {
        contents.push_str(&format!("{address}  {HOST_PREFIX}{anchor}\n"));
    }
    contents
}
