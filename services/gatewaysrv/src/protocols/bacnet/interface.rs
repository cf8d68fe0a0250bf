//! Local interface selection for BACnet/IP peers

use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// IPv4 network of a local interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Ipv4Network {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { address, netmask }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.address) & mask == u32::from(ip) & mask
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }
}

/// IPv4 networks of every local interface
pub fn local_networks() -> Vec<Ipv4Network> {
    let mut networks = Vec::new();
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                if let get_if_addrs::IfAddr::V4(iface_addr) = iface.addr {
                    debug!(
                        "Interface {}: {}/{}",
                        iface.name, iface_addr.ip, iface_addr.netmask
                    );
                    networks.push(Ipv4Network::new(iface_addr.ip, iface_addr.netmask));
                }
            }
        },
        Err(e) => warn!("Failed to list network interfaces: {}", e),
    }
    networks
}

/// Most specific network containing `peer`
pub fn pick_interface(peer: Ipv4Addr, networks: &[Ipv4Network]) -> Option<Ipv4Addr> {
    networks
        .iter()
        .filter(|net| net.contains(peer))
        .max_by_key(|net| net.prefix_len())
        .map(|net| net.address)
}

/// Local address to bind for talking to `peer`
///
/// Falls back to the unspecified address when no interface network
/// contains the peer (routed BACnet/IP).
pub fn select_interface(peer: Ipv4Addr) -> Ipv4Addr {
    pick_interface(peer, &local_networks()).unwrap_or_else(|| {
        warn!(
            "No local interface on the subnet of {}, binding to {}",
            peer,
            Ipv4Addr::UNSPECIFIED
        );
        Ipv4Addr::UNSPECIFIED
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn networks() -> Vec<Ipv4Network> {
        vec![
            Ipv4Network::new(Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(255, 0, 0, 0)),
            Ipv4Network::new(Ipv4Addr::new(10, 1, 0, 20), Ipv4Addr::new(255, 255, 0, 0)),
            Ipv4Network::new(Ipv4Addr::new(10, 1, 2, 5), Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(255, 255, 255, 0)),
        ]
    }

    #[test]
    fn test_subnet_match() {
        let nets = networks();
        assert_eq!(
            pick_interface(Ipv4Addr::new(192, 168, 1, 77), &nets),
            Some(Ipv4Addr::new(192, 168, 1, 10))
        );
        assert_eq!(
            pick_interface(Ipv4Addr::LOCALHOST, &nets),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert_eq!(pick_interface(Ipv4Addr::new(172, 16, 0, 1), &nets), None);
    }

    #[test]
    fn test_most_specific_network_wins() {
        let nets = networks();
        assert_eq!(
            pick_interface(Ipv4Addr::new(10, 1, 2, 99), &nets),
            Some(Ipv4Addr::new(10, 1, 2, 5))
        );
        assert_eq!(
            pick_interface(Ipv4Addr::new(10, 1, 3, 99), &nets),
            Some(Ipv4Addr::new(10, 1, 0, 20))
        );
    }
}
