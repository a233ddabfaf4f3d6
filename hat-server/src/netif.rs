//! Host identity and IPv4 interface enumeration.
use std::net::{Ipv4Addr, SocketAddrV4};

/// An interface name together with one of its IPv4 addresses.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct NetworkInterfaceAddress {
    pub name: String,
    pub address: Ipv4Addr,
}

impl NetworkInterfaceAddress {
    pub fn new(name: impl Into<String>, address: Ipv4Addr) -> NetworkInterfaceAddress {
        NetworkInterfaceAddress {
            name: name.into(),
            address,
        }
    }
}

/// Source of the host's current interface addresses.
pub trait InterfaceSource: Send + Sync {
    fn ipv4_addresses(&self) -> Vec<NetworkInterfaceAddress>;
}

/// Reads interface addresses from the operating system.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn ipv4_addresses(&self) -> Vec<NetworkInterfaceAddress> {
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("Unable to enumerate network interfaces: {}", e);
                return Vec::new();
            }
        };
        addrs
            .filter_map(|ifaddr| {
                let sin = *ifaddr.address.as_ref()?.as_sockaddr_in()?;
                let address = *SocketAddrV4::from(sin).ip();
                log::trace!(
                    "Found interface {} with address {}",
                    ifaddr.interface_name,
                    address
                );
                Some(NetworkInterfaceAddress::new(ifaddr.interface_name, address))
            })
            .collect()
    }
}

/// A fixed set of interfaces, for hosts without enumeration or for tests.
#[derive(Clone, Debug, Default)]
pub struct StaticInterfaces(pub Vec<NetworkInterfaceAddress>);

impl InterfaceSource for StaticInterfaces {
    fn ipv4_addresses(&self) -> Vec<NetworkInterfaceAddress> {
        self.0.clone()
    }
}

/// Interfaces that can carry a broadcast: every interface with a non-zero address.
pub fn broadcast_interfaces(source: &dyn InterfaceSource) -> Vec<NetworkInterfaceAddress> {
    source
        .ipv4_addresses()
        .into_iter()
        .filter(|iface| !iface.address.is_unspecified())
        .collect()
}

/// First address reported for the interface called `name`.
pub fn address_of(addresses: &[NetworkInterfaceAddress], name: &str) -> Option<Ipv4Addr> {
    addresses
        .iter()
        .find(|iface| iface.name == name)
        .map(|iface| iface.address)
}

pub fn host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unspecified_addresses_are_skipped() {
        let source = StaticInterfaces(vec![
            NetworkInterfaceAddress::new("eth0", Ipv4Addr::new(192, 168, 1, 20)),
            NetworkInterfaceAddress::new("wlan0", Ipv4Addr::UNSPECIFIED),
            NetworkInterfaceAddress::new("lo", Ipv4Addr::LOCALHOST),
        ]);
        let names: Vec<_> = broadcast_interfaces(&source)
            .into_iter()
            .map(|iface| iface.name)
            .collect();
        assert_eq!(names, vec!["eth0", "lo"]);
    }

    #[test]
    fn lookup_by_name() {
        let addresses = vec![
            NetworkInterfaceAddress::new("eth0", Ipv4Addr::new(10, 0, 0, 2)),
            NetworkInterfaceAddress::new("wlan0", Ipv4Addr::new(10, 0, 1, 2)),
        ];
        assert_eq!(
            address_of(&addresses, "wlan0"),
            Some(Ipv4Addr::new(10, 0, 1, 2))
        );
        assert_eq!(address_of(&addresses, "usb0"), None);
    }

    #[test]
    fn system_enumeration_reports_loopback() {
        let addresses = SystemInterfaces.ipv4_addresses();
        assert!(addresses.iter().any(|iface| iface.address.is_loopback()));
    }

    #[test]
    fn host_name_is_not_empty() {
        assert!(!host_name().is_empty());
    }
}
