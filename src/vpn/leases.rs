//! DHCP leases parser
//!
//! Best-effort parser for the dnsmasq leases file. Each line is
//! `expiry mac address hostname client-id`, whitespace separated. The
//! result maps hostnames to addresses; anything unparsable is dropped.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tracing::debug;

/// Parse leases file contents into a hostname to address map
///
/// Lines that do not parse are skipped. A hostname of `*` (no hostname
/// sent) is dropped since it can never match an anchor.
#[must_use]
pub fn parse_leases(contents: &str) -> HashMap<String, Ipv4Addr> {
    let mut leases = HashMap::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let _expiry = fields.next();
        let _mac = fields.next();
        let address = fields.next().and_then(|a| a.parse::<Ipv4Addr>().ok());
        let hostname = fields.next();

        match (address, hostname) {
            (Some(address), Some(hostname)) if hostname != "*" => {
                leases.insert(hostname.to_string(), address);
            }
            _ => {
                if !line.trim().is_empty() {
                    debug!(line = %line, "Skipping unparsable lease line");
                }
            }
        }
    }

    leases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typical_leases() {
        let contents = "\
1781784000 aa:bb:cc:dd:ee:01 10.9.0.6 robot1 01:aa:bb:cc:dd:ee:01
1781784100 aa:bb:cc:dd:ee:02 10.9.0.7 robot2 *
";
        let leases = parse_leases(contents);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases["robot1"], "10.9.0.6".parse::<Ipv4Addr>().unwrap());
        assert_eq!(leases["robot2"], "10.9.0.7".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_anonymous_hostname_is_dropped() {
        let contents = "1781784000 aa:bb:cc:dd:ee:03 10.9.0.8 * *\n";
        assert!(parse_leases(contents).is_empty());
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let contents = "not a lease line\n\n1781784000 aa:bb 999.0.0.1 robot9 *\n";
        assert!(parse_leases(contents).is_empty());
    }
}
