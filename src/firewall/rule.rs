//! NAT rule model
//!
//! A [`NatRule`] is one DNAT entry in the PREROUTING chain, held in a form
//! that renders directly to packet filter arguments. A [`RuleSet`] is the
//! four rules every connected robot gets.

use std::net::Ipv4Addr;

/// Destination a DNAT rule rewrites to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnatTarget {
    pub address: Ipv4Addr,
    pub port: Option<u16>,
}

impl DnatTarget {
    /// Rewrite to an address, keeping the original port
    #[must_use]
    pub const fn to_address(address: Ipv4Addr) -> Self {
        Self {
            address,
            port: None,
        }
    }

    /// Rewrite to an address and port
    #[must_use]
    pub const fn to_address_port(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address,
            port: Some(port),
        }
    }

    fn render(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.address, port),
            None => self.address.to_string(),
        }
    }
}

/// One DNAT rule in the NAT PREROUTING chain
///
/// All rules match TCP only; `dport` narrows the match to one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    /// Match on source address
    pub source: Option<Ipv4Addr>,

    /// Match on destination address
    pub destination: Option<Ipv4Addr>,

    /// Match on input interface
    pub in_interface: Option<String>,

    /// Match on TCP destination port
    pub dport: Option<u16>,

    /// DNAT rewrite target
    pub target: DnatTarget,
}

impl NatRule {
    /// Render to packet filter arguments (everything after the chain name)
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(source) = self.source {
            args.push("-s".into());
            args.push(source.to_string());
        }
        if let Some(destination) = self.destination {
            args.push("-d".into());
            args.push(destination.to_string());
        }
        if let Some(ref iface) = self.in_interface {
            args.push("-i".into());
            args.push(iface.clone());
        }

        // Every rule matches TCP, ported or not
        args.push("-p".into());
        args.push("tcp".into());
        if let Some(dport) = self.dport {
            args.push("--dport".into());
            args.push(dport.to_string());
        }

        args.push("-j".into());
        args.push("DNAT".into());
        args.push("--to-destination".into());
        args.push(self.target.render());

        args
    }
}

/// The four NAT rules tracked per connected robot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    /// Robot to container traffic, arriving on the tunnel
    pub client: NatRule,

    /// Container to robot traffic, arriving on the container veth
    pub container: NatRule,

    /// Container traffic to the master service on the overlay gateway
    pub master: NatRule,

    /// External WebSocket traffic on the robot's assigned port
    pub websocket: NatRule,
}

impl RuleSet {
    /// Iterate over the rules in creation order
    pub fn iter(&self) -> impl Iterator<Item = &NatRule> {
        [&self.client, &self.container, &self.master, &self.websocket].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_only_rule_args() {
        let rule = NatRule {
            source: Some("10.9.0.6".parse().unwrap()),
            destination: Some("10.10.0.42".parse().unwrap()),
            in_interface: Some("tun0".into()),
            dport: None,
            target: DnatTarget::to_address("10.10.0.42".parse().unwrap()),
        };

        assert_eq!(
            rule.to_args(),
            vec![
                "-s", "10.9.0.6", "-d", "10.10.0.42", "-i", "tun0", "-p", "tcp", "-j", "DNAT",
                "--to-destination", "10.10.0.42",
            ]
        );
    }

    #[test]
    fn test_portless_rule_still_matches_tcp() {
        let rule = NatRule {
            source: None,
            destination: None,
            in_interface: None,
            dport: None,
            target: DnatTarget::to_address("10.10.0.1".parse().unwrap()),
        };

        let args = rule.to_args();
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "tcp");
        assert!(!args.contains(&"--dport".to_string()));
    }

    #[test]
    fn test_port_rule_args() {
        let rule = NatRule {
            source: None,
            destination: None,
            in_interface: Some("eth0".into()),
            dport: Some(7000),
            target: DnatTarget::to_address_port("10.10.0.42".parse().unwrap(), 9090),
        };

        assert_eq!(
            rule.to_args(),
            vec![
                "-i", "eth0", "-p", "tcp", "--dport", "7000", "-j", "DNAT",
                "--to-destination", "10.10.0.42:9090",
            ]
        );
    }
}
