//! VPN status file parser
//!
//! Parses the version 3 (tab-separated) status file the VPN daemon rewrites
//! every few seconds. Each `CLIENT_LIST` line describes one connected
//! client, keyed by certificate common name. Column positions are taken
//! from the `HEADER` line when present, falling back to the stock layout.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tracing::warn;

/// One connected VPN client, as reported by the status file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// Certificate common name; doubles as the robot anchor
    pub common_name: String,

    /// Client's public endpoint (`ip:port`)
    pub real_address: String,

    /// Address inside the tunnel, if the VPN assigned one
    pub virtual_address: Option<Ipv4Addr>,

    /// Bytes received from the client
    pub bytes_received: u64,

    /// Bytes sent to the client
    pub bytes_sent: u64,

    /// Connection establishment time (unix seconds)
    pub connected_since: i64,
}

/// Column layout of CLIENT_LIST lines
#[derive(Debug, Clone, Copy)]
struct Columns {
    common_name: usize,
    real_address: usize,
    virtual_address: usize,
    bytes_received: usize,
    bytes_sent: usize,
    connected_since: usize,
}

impl Default for Columns {
    /// Stock layout of status-version 3 output
    fn default() -> Self {
        Self {
            common_name: 1,
            real_address: 2,
            virtual_address: 3,
            bytes_received: 5,
            bytes_sent: 6,
            connected_since: 8,
        }
    }
}

impl Columns {
    fn from_header(fields: &[&str]) -> Self {
        let mut columns = Self::default();
        for (index, field) in fields.iter().enumerate() {
            match *field {
                "Common Name" => columns.common_name = index,
                "Real Address" => columns.real_address = index,
                "Virtual Address" => columns.virtual_address = index,
                "Bytes Received" => columns.bytes_received = index,
                "Bytes Sent" => columns.bytes_sent = index,
                "Connected Since (time_t)" => columns.connected_since = index,
                _ => {}
            }
        }
        columns
    }
}

/// Parse status file contents into records keyed by common name
///
/// Malformed lines are skipped with a warning; the file is rewritten every
/// few seconds, so a torn read self-corrects on the next batch.
#[must_use]
pub fn parse_status(contents: &str) -> HashMap<String, ClientRecord> {
    let mut records = HashMap::new();
    let mut columns = Columns::default();

    for line in contents.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.first() {
            Some(&"HEADER") if fields.get(1) == Some(&"CLIENT_LIST") => {
                // Dropping the HEADER tag aligns header fields with data fields
                columns = Columns::from_header(&fields[1..]);
            }
            Some(&"CLIENT_LIST") => {
                match parse_client_line(&fields, columns) {
                    Some(record) => {
                        records.insert(record.common_name.clone(), record);
                    }
                    None => warn!(line = %line, "Skipping malformed client line"),
                }
            }
            _ => {}
        }
    }

    records
}

fn parse_client_line(fields: &[&str], columns: Columns) -> Option<ClientRecord> {
    let common_name = (*fields.get(columns.common_name)?).to_string();
    if common_name.is_empty() {
        return None;
    }

    let real_address = (*fields.get(columns.real_address)?).to_string();
    let virtual_address = fields
        .get(columns.virtual_address)
        .and_then(|v| v.parse().ok());
    let bytes_received = fields
        .get(columns.bytes_received)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let bytes_sent = fields
        .get(columns.bytes_sent)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let connected_since = fields
        .get(columns.connected_since)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(ClientRecord {
        common_name,
        real_address,
        virtual_address,
        bytes_received,
        bytes_sent,
        connected_since,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "TITLE\tOpenVPN 2.4.7\n\
TIME\tThu Jun 18 12:00:00 2026\t1781784000\n\
HEADER\tCLIENT_LIST\tCommon Name\tReal Address\tVirtual Address\tVirtual IPv6 Address\tBytes Received\tBytes Sent\tConnected Since\tConnected Since (time_t)\tUsername\n\
CLIENT_LIST\trobot1\t203.0.113.7:51820\t10.9.0.6\t\t4096\t8192\tThu Jun 18 11:00:00 2026\t1781780400\tUNDEF\n\
CLIENT_LIST\trobot2\t203.0.113.8:51821\t\t\t100\t200\tThu Jun 18 11:30:00 2026\t1781782200\tUNDEF\n\
ROUTING_TABLE\t10.9.0.6\trobot1\t203.0.113.7:51820\tThu Jun 18 11:00:00 2026\t1781780400\n\
GLOBAL_STATS\tMax bcast/mcast queue length\t0\n\
END\n";

    #[test]
    fn test_parse_client_lines() {
        let records = parse_status(SAMPLE);
        assert_eq!(records.len(), 2);

        let r1 = &records["robot1"];
        assert_eq!(r1.real_address, "203.0.113.7:51820");
        assert_eq!(r1.virtual_address, Some("10.9.0.6".parse().unwrap()));
        assert_eq!(r1.bytes_received, 4096);
        assert_eq!(r1.bytes_sent, 8192);
        assert_eq!(r1.connected_since, 1_781_780_400);
    }

    #[test]
    fn test_missing_virtual_address_is_none() {
        let records = parse_status(SAMPLE);
        assert!(records["robot2"].virtual_address.is_none());
    }

    #[test]
    fn test_routing_and_stats_lines_are_ignored() {
        let records = parse_status(SAMPLE);
        assert!(!records.contains_key("10.9.0.6"));
    }

    #[test]
    fn test_empty_file_yields_no_records() {
        assert!(parse_status("").is_empty());
        assert!(parse_status("TITLE\tOpenVPN\nEND\n").is_empty());
    }

    #[test]
    fn test_works_without_header_line() {
        let contents = "CLIENT_LIST\trobot1\t203.0.113.7:51820\t10.9.0.6\t\t1\t2\tx\t1781780400\tUNDEF\n";
        let records = parse_status(contents);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records["robot1"].virtual_address,
            Some("10.9.0.6".parse().unwrap())
        );
    }

    #[test]
    fn test_truncated_line_is_skipped() {
        let contents = "CLIENT_LIST\trobot1\n";
        let records = parse_status(contents);
        // Common name present but real address missing
        assert!(records.is_empty());
    }
}
