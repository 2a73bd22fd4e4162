//! Persistent datastore
//!
//! SQLite-backed store holding the fleet data model: nodes, robots,
//! containers, the provisioning queue, and per-node connection rows.
//!
//! # Concurrency
//!
//! The pool is capped at a single connection with WAL and a busy timeout,
//! which serializes writers without failing them. The provisioning queue is
//! drained with a single-statement `DELETE ... RETURNING`, so a row can be
//! claimed by at most one worker even with several workers racing.

mod models;

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::diff::Diff;
use crate::error::StoreError;
use crate::vpn::ClientRecord;

pub use models::{AnchorInfo, ConnectionRow, Container, Node, Robot};

/// Database schema, applied idempotently at startup
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    address TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS robots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    anchor TEXT NOT NULL UNIQUE,
    owner TEXT,
    plugins TEXT,
    wsport INTEGER,
    wsauth TEXT
);

CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    robot_id INTEGER NOT NULL UNIQUE REFERENCES robots(id),
    address TEXT,
    node_id INTEGER REFERENCES nodes(id)
);

CREATE TABLE IF NOT EXISTS new_containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers(id)
);

CREATE TABLE IF NOT EXISTS connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL REFERENCES nodes(id),
    anchor TEXT NOT NULL,
    virtual_address TEXT NOT NULL,
    real_address TEXT NOT NULL,
    bytes_received INTEGER NOT NULL DEFAULT 0,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    connected_since INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_node_anchor
    ON connections(node_id, anchor);
";

/// Handle to the fleet datastore
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at the given path
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be opened.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!("Datastore opened at {:?}", path.as_ref());
        Ok(Self { pool })
    }

    /// Open an in-memory database
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be opened.
    pub async fn connect_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Access the underlying pool
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the schema
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Migration` if any statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        debug!("Schema applied");
        Ok(())
    }

    /// Register this node, refreshing its address if it already exists
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn register_node(
        &self,
        name: &str,
        address: Ipv4Addr,
    ) -> Result<Node, StoreError> {
        let node = sqlx::query_as::<_, Node>(
            "INSERT INTO nodes (name, address) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET address = excluded.address
             RETURNING id, name, address",
        )
        .bind(name)
        .bind(address.to_string())
        .fetch_one(&self.pool)
        .await?;

        info!(node = %node.name, address = %node.address, "Node registered");
        Ok(node)
    }

    /// Delete every connection row for a node
    ///
    /// Run at reconciler startup so stale rows from a previous run never
    /// survive a restart.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn purge_connections(&self, node_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM connections WHERE node_id = ?1")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Look up a robot and its container by anchor
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn anchor_info(&self, anchor: &str) -> Result<Option<AnchorInfo>, StoreError> {
        let info = sqlx::query_as::<_, AnchorInfo>(
            "SELECT r.id AS robot_id, r.wsport AS wsport,
                    c.id AS container_id, c.address AS container_address
             FROM robots r
             LEFT JOIN containers c ON c.robot_id = r.id
             WHERE r.anchor = ?1",
        )
        .bind(anchor)
        .fetch_optional(&self.pool)
        .await?;
        Ok(info)
    }

    /// Persist the WebSocket port assigned to a robot
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the robot does not exist.
    pub async fn set_robot_wsport(&self, robot_id: i64, port: u16) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE robots SET wsport = ?1 WHERE id = ?2")
            .bind(i64::from(port))
            .bind(robot_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("robot", robot_id.to_string()));
        }
        Ok(())
    }

    /// Apply one reconciliation batch's connection changes in a single
    /// transaction
    ///
    /// Adds, removes, and updates either all land or none do.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure; the transaction is rolled
    /// back and the connection table is left untouched.
    pub async fn apply_connection_changes(
        &self,
        node_id: i64,
        changes: &Diff<String, ClientRecord>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for (anchor, record) in &changes.added {
            sqlx::query(
                "INSERT INTO connections
                 (node_id, anchor, virtual_address, real_address,
                  bytes_received, bytes_sent, connected_since)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(node_id, anchor) DO UPDATE SET
                     virtual_address = excluded.virtual_address,
                     real_address = excluded.real_address,
                     bytes_received = excluded.bytes_received,
                     bytes_sent = excluded.bytes_sent,
                     connected_since = excluded.connected_since",
            )
            .bind(node_id)
            .bind(anchor)
            .bind(record.virtual_address.map_or_else(String::new, |a| a.to_string()))
            .bind(&record.real_address)
            .bind(to_i64(record.bytes_received))
            .bind(to_i64(record.bytes_sent))
            .bind(record.connected_since)
            .execute(&mut *tx)
            .await?;
        }

        for anchor in changes.removed.keys() {
            sqlx::query("DELETE FROM connections WHERE node_id = ?1 AND anchor = ?2")
                .bind(node_id)
                .bind(anchor)
                .execute(&mut *tx)
                .await?;
        }

        for (anchor, (_, record)) in &changes.changed {
            sqlx::query(
                "UPDATE connections SET
                     virtual_address = ?3,
                     real_address = ?4,
                     bytes_received = ?5,
                     bytes_sent = ?6,
                     connected_since = ?7
                 WHERE node_id = ?1 AND anchor = ?2",
            )
            .bind(node_id)
            .bind(anchor)
            .bind(record.virtual_address.map_or_else(String::new, |a| a.to_string()))
            .bind(&record.real_address)
            .bind(to_i64(record.bytes_received))
            .bind(to_i64(record.bytes_sent))
            .bind(record.connected_since)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List the connection rows recorded for a node
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn connections_for_node(
        &self,
        node_id: i64,
    ) -> Result<Vec<ConnectionRow>, StoreError> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            "SELECT id, node_id, anchor, virtual_address, real_address,
                    bytes_received, bytes_sent, connected_since
             FROM connections WHERE node_id = ?1 ORDER BY anchor",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Claim one provisioning task by deleting its queue row
    ///
    /// The delete is the claim: a single statement dequeues and returns the
    /// oldest row, so two workers can never claim the same task.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure. An empty queue is not an
    /// error; it yields `None`.
    pub async fn claim_provision_task(&self) -> Result<Option<i64>, StoreError> {
        let container_id = sqlx::query_scalar::<_, i64>(
            "DELETE FROM new_containers
             WHERE id = (SELECT id FROM new_containers ORDER BY id LIMIT 1)
             RETURNING container_id",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(container_id)
    }

    /// Fetch a container by id
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn container_by_id(&self, id: i64) -> Result<Option<Container>, StoreError> {
        let container = sqlx::query_as::<_, Container>(
            "SELECT id, robot_id, address, node_id FROM containers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(container)
    }

    /// Fetch the robot owning a container
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn robot_for_container(
        &self,
        container_id: i64,
    ) -> Result<Option<Robot>, StoreError> {
        let robot = sqlx::query_as::<_, Robot>(
            "SELECT r.id, r.name, r.anchor, r.owner, r.plugins, r.wsport, r.wsauth
             FROM robots r
             JOIN containers c ON c.robot_id = r.id
             WHERE c.id = ?1",
        )
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(robot)
    }

    /// Record a container's overlay address and placement node
    ///
    /// The address is written exactly once.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the container is already addressed
    /// and `StoreError::NotFound` if it does not exist.
    pub async fn set_container_placement(
        &self,
        container_id: i64,
        address: Ipv4Addr,
        node_id: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE containers SET address = ?1, node_id = ?2
             WHERE id = ?3 AND address IS NULL",
        )
        .bind(address.to_string())
        .bind(node_id)
        .bind(container_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.container_by_id(container_id).await? {
                Some(_) => Err(StoreError::conflict("container", container_id.to_string())),
                None => Err(StoreError::not_found("container", container_id.to_string())),
            };
        }
        Ok(())
    }

    /// Count containers placed on a node
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn count_containers_on_node(&self, node_id: i64) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM containers WHERE node_id = ?1",
        )
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Register a robot by anchor
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn insert_robot(&self, anchor: &str) -> Result<Robot, StoreError> {
        let robot = sqlx::query_as::<_, Robot>(
            "INSERT INTO robots (anchor) VALUES (?1)
             RETURNING id, name, anchor, owner, plugins, wsport, wsauth",
        )
        .bind(anchor)
        .fetch_one(&self.pool)
        .await?;
        Ok(robot)
    }

    /// Register a container for a robot
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn insert_container(&self, robot_id: i64) -> Result<Container, StoreError> {
        let container = sqlx::query_as::<_, Container>(
            "INSERT INTO containers (robot_id) VALUES (?1)
             RETURNING id, robot_id, address, node_id",
        )
        .bind(robot_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(container)
    }

    /// Enqueue a container for provisioning
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub async fn enqueue_provision(&self, container_id: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO new_containers (container_id) VALUES (?1)")
            .bind(container_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_wrap)]
const fn to_i64(v: u64) -> i64 {
    v as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let store = Store::connect_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_register_node_is_idempotent() {
        let store = test_store().await;

        let first = store
            .register_node("node1", "192.168.1.10".parse().unwrap())
            .await
            .unwrap();
        let second = store
            .register_node("node1", "192.168.1.20".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.address, "192.168.1.20");
    }

    #[tokio::test]
    async fn test_anchor_info_joins_container() {
        let store = test_store().await;
        let robot = store.insert_robot("robot1").await.unwrap();
        let container = store.insert_container(robot.id).await.unwrap();

        let info = store.anchor_info("robot1").await.unwrap().unwrap();
        assert_eq!(info.robot_id, robot.id);
        assert_eq!(info.container_id, Some(container.id));
        assert!(info.container_address.is_none());

        assert!(store.anchor_info("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_container_placement_writes_once() {
        let store = test_store().await;
        let node = store
            .register_node("node1", "192.168.1.10".parse().unwrap())
            .await
            .unwrap();
        let robot = store.insert_robot("robot1").await.unwrap();
        let container = store.insert_container(robot.id).await.unwrap();

        store
            .set_container_placement(container.id, "10.10.0.1".parse().unwrap(), node.id)
            .await
            .unwrap();

        // Second write must be refused
        let result = store
            .set_container_placement(container.id, "10.10.0.2".parse().unwrap(), node.id)
            .await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));

        let stored = store.container_by_id(container.id).await.unwrap().unwrap();
        assert_eq!(stored.address.as_deref(), Some("10.10.0.1"));

        // Unknown containers are reported as missing
        let result = store
            .set_container_placement(9999, "10.10.0.3".parse().unwrap(), node.id)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_claim_provision_task_drains_in_order() {
        let store = test_store().await;
        let robot1 = store.insert_robot("robot1").await.unwrap();
        let robot2 = store.insert_robot("robot2").await.unwrap();
        let c1 = store.insert_container(robot1.id).await.unwrap();
        let c2 = store.insert_container(robot2.id).await.unwrap();
        store.enqueue_provision(c1.id).await.unwrap();
        store.enqueue_provision(c2.id).await.unwrap();

        assert_eq!(store.claim_provision_task().await.unwrap(), Some(c1.id));
        assert_eq!(store.claim_provision_task().await.unwrap(), Some(c2.id));
        assert_eq!(store.claim_provision_task().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_robot_registration_columns_round_trip() {
        let store = test_store().await;
        let robot = store.insert_robot("robot1").await.unwrap();
        assert!(robot.name.is_none());
        assert!(robot.wsauth.is_none());

        // The external registrar fills these in through the same schema
        sqlx::query(
            "UPDATE robots SET name = 'Rover', owner = 'alice',
                 plugins = 'camera,arm', wsauth = 'tok-123'
             WHERE id = ?1",
        )
        .bind(robot.id)
        .execute(store.pool())
        .await
        .unwrap();

        let container = store.insert_container(robot.id).await.unwrap();
        let robot = store
            .robot_for_container(container.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(robot.name.as_deref(), Some("Rover"));
        assert_eq!(robot.owner.as_deref(), Some("alice"));
        assert_eq!(robot.plugins.as_deref(), Some("camera,arm"));
        assert_eq!(robot.wsauth.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn test_set_robot_wsport() {
        let store = test_store().await;
        let robot = store.insert_robot("robot1").await.unwrap();

        store.set_robot_wsport(robot.id, 7000).await.unwrap();
        let info = store.anchor_info("robot1").await.unwrap().unwrap();
        assert_eq!(info.wsport, Some(7000));

        let result = store.set_robot_wsport(9999, 7001).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_purge_connections_scoped_to_node() {
        let store = test_store().await;
        let n1 = store
            .register_node("node1", "192.168.1.10".parse().unwrap())
            .await
            .unwrap();
        let n2 = store
            .register_node("node2", "192.168.1.11".parse().unwrap())
            .await
            .unwrap();

        for (node, anchor) in [(n1.id, "a"), (n1.id, "b"), (n2.id, "c")] {
            sqlx::query(
                "INSERT INTO connections
                 (node_id, anchor, virtual_address, real_address)
                 VALUES (?1, ?2, '10.9.0.1', '1.2.3.4:5')",
            )
            .bind(node)
            .bind(anchor)
            .execute(store.pool())
            .await
            .unwrap();
        }

        assert_eq!(store.purge_connections(n1.id).await.unwrap(), 2);
        assert_eq!(store.connections_for_node(n1.id).await.unwrap().len(), 0);
        assert_eq!(store.connections_for_node(n2.id).await.unwrap().len(), 1);
    }
}
