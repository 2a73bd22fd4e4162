//! Persisted row types
//!
//! Rows mirror the SQLite schema one to one. Addresses are stored as text
//! and parsed at the edges.

use std::net::Ipv4Addr;

use sqlx::FromRow;

/// A compute node running this daemon
#[derive(Debug, Clone, FromRow)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub address: String,
}

/// A robot identity, keyed by its VPN certificate common name (anchor)
///
/// The registration fields (`name`, `owner`, `plugins`, `wsauth`) are
/// written by the external registrar; this daemon only reads them.
#[derive(Debug, Clone, FromRow)]
pub struct Robot {
    pub id: i64,
    /// Human-readable name set at registration
    pub name: Option<String>,
    pub anchor: String,
    /// Owning user
    pub owner: Option<String>,
    /// Comma-separated list of plugins enabled for the robot
    pub plugins: Option<String>,
    /// External WebSocket port assigned on last connect
    pub wsport: Option<i64>,
    /// WebSocket auth token issued at registration
    pub wsauth: Option<String>,
}

/// A robot's backing container
#[derive(Debug, Clone, FromRow)]
pub struct Container {
    pub id: i64,
    pub robot_id: i64,
    /// Overlay address; set exactly once during provisioning
    pub address: Option<String>,
    /// Node the container was placed on
    pub node_id: Option<i64>,
}

impl Container {
    /// Parse the overlay address, if provisioned
    #[must_use]
    pub fn overlay_address(&self) -> Option<Ipv4Addr> {
        self.address.as_deref().and_then(|a| a.parse().ok())
    }
}

/// A live VPN connection observed on this node
///
/// Rows are keyed by `(node_id, anchor)` rather than by container id; a
/// robot has exactly one container, so the anchor identifies the container
/// too, and the anchor is what the status file reports.
#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRow {
    pub id: i64,
    pub node_id: i64,
    pub anchor: String,
    pub virtual_address: String,
    pub real_address: String,
    pub bytes_received: i64,
    pub bytes_sent: i64,
    pub connected_since: i64,
}

/// Joined view of a robot and its container, looked up by anchor
#[derive(Debug, Clone, FromRow)]
pub struct AnchorInfo {
    pub robot_id: i64,
    pub wsport: Option<i64>,
    pub container_id: Option<i64>,
    pub container_address: Option<String>,
}

impl AnchorInfo {
    /// Parse the container's overlay address, if provisioned
    #[must_use]
    pub fn container_addr(&self) -> Option<Ipv4Addr> {
        self.container_address
            .as_deref()
            .and_then(|a| a.parse().ok())
    }
}
