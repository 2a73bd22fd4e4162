//! VPN status sources
//!
//! The VPN daemon periodically rewrites a status file listing the clients
//! currently connected; the DHCP server maintains a leases file. This
//! module parses both and merges them into the connection snapshot the
//! reconciler diffs against.
//!
//! - [`status`]: status file parser
//! - [`leases`]: DHCP leases parser, used to backfill missing addresses
//! - [`watcher`]: status file change notification

pub mod leases;
pub mod status;
pub mod watcher;

pub use leases::parse_leases;
pub use status::{parse_status, ClientRecord};
pub use watcher::spawn_watcher;

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Fill missing virtual addresses from DHCP leases, matched by hostname
///
/// The VPN status file omits the virtual address for clients that obtained
/// theirs over DHCP; their lease hostname equals the anchor.
pub fn merge_leases(
    records: &mut HashMap<String, ClientRecord>,
    leases: &HashMap<String, Ipv4Addr>,
) {
    for (anchor, record) in records.iter_mut() {
        if record.virtual_address.is_none() {
            record.virtual_address = leases.get(anchor).copied();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_fills_only_missing_addresses() {
        let mut records = HashMap::new();
        records.insert(
            "robot1".to_string(),
            ClientRecord {
                common_name: "robot1".into(),
                real_address: "1.2.3.4:5000".into(),
                virtual_address: None,
                bytes_received: 0,
                bytes_sent: 0,
                connected_since: 100,
            },
        );
        records.insert(
            "robot2".to_string(),
            ClientRecord {
                common_name: "robot2".into(),
                real_address: "1.2.3.5:5000".into(),
                virtual_address: Some("10.9.0.2".parse().unwrap()),
                bytes_received: 0,
                bytes_sent: 0,
                connected_since: 100,
            },
        );

        let mut leases = HashMap::new();
        leases.insert("robot1".to_string(), "10.9.0.7".parse().unwrap());
        leases.insert("robot2".to_string(), "10.9.0.99".parse().unwrap());

        merge_leases(&mut records, &leases);

        assert_eq!(
            records["robot1"].virtual_address,
            Some("10.9.0.7".parse().unwrap())
        );
        // An address from the status file wins over the lease
        assert_eq!(
            records["robot2"].virtual_address,
            Some("10.9.0.2".parse().unwrap())
        );
    }

    #[test]
    fn test_merge_leaves_unleased_records_unaddressed() {
        let mut records = HashMap::new();
        records.insert(
            "robot1".to_string(),
            ClientRecord {
                common_name: "robot1".into(),
                real_address: "1.2.3.4:5000".into(),
                virtual_address: None,
                bytes_received: 0,
                bytes_sent: 0,
                connected_since: 100,
            },
        );

        merge_leases(&mut records, &HashMap::new());
        assert!(records["robot1"].virtual_address.is_none());
    }
}
