//! Network endpoint addresses and their canonical text form
//!
//! Formatting rules:
//! - IPv4: `1.2.0.255:123`
//! - IPv6: `[2001:db8::1]:123`
//! - unset address: `none`

use socket2::SockAddr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::NetworkError;

/// IPv4 or IPv6 endpoint, or an unset (invalid) address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address {
    addr: Option<SocketAddr>,
}

impl Address {
    /// Create from a resolved socket address
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr: Some(addr) }
    }

    /// Set to an IPv4 address; leaves the address untouched on parse failure
    pub fn set_ipv4(&mut self, ip: &str, port: u16) -> bool {
        match ip.parse::<Ipv4Addr>() {
            Ok(ip) => {
                self.addr = Some(SocketAddr::new(IpAddr::V4(ip), port));
                true
            }
            Err(_) => false,
        }
    }

    /// Set to an IPv6 address; leaves the address untouched on parse failure
    pub fn set_ipv6(&mut self, ip: &str, port: u16) -> bool {
        match ip.parse::<Ipv6Addr>() {
            Ok(ip) => {
                self.addr = Some(SocketAddr::new(IpAddr::V6(ip), port));
                true
            }
            Err(_) => false,
        }
    }

    /// Set from an OS socket address. Non-IP families are rejected.
    pub fn set_saddr(&mut self, saddr: &SockAddr) -> bool {
        match saddr.as_socket() {
            Some(addr) => {
                self.addr = Some(addr);
                true
            }
            None => false,
        }
    }

    /// OS socket address, if set
    pub fn saddr(&self) -> Option<SockAddr> {
        self.addr.map(SockAddr::from)
    }

    /// Length of the OS socket address for this family, 0 if unset
    pub fn slen(&self) -> usize {
        self.saddr().map_or(0, |saddr| saddr.len() as usize)
    }

    /// IP version: 4, 6, or 0 if unset
    pub fn version(&self) -> u8 {
        match self.addr {
            Some(SocketAddr::V4(_)) => 4,
            Some(SocketAddr::V6(_)) => 6,
            None => 0,
        }
    }

    pub fn valid(&self) -> bool {
        self.addr.is_some()
    }

    /// Port number, 0 if unset
    pub fn port(&self) -> u16 {
        self.addr.map_or(0, |addr| addr.port())
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.addr.map(|addr| addr.ip())
    }

    /// Whether this is a multicast group address
    pub fn multicast(&self) -> bool {
        self.addr.is_some_and(|addr| addr.ip().is_multicast())
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addr
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

/// Format the IP part of an address: `1.2.0.255`, `[2001:db8::1]` or `none`
pub fn ip_to_str(addr: &Address) -> String {
    match addr.ip() {
        Some(IpAddr::V4(ip)) => ip.to_string(),
        Some(IpAddr::V6(ip)) => format!("[{}]", ip),
        None => "none".to_string(),
    }
}

/// Format a full address: `1.2.0.255:123`, `[2001:db8::1]:123` or `none`
pub fn address_to_str(addr: &Address) -> String {
    addr.to_string()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{}:{}", ip_to_str(self), addr.port()),
            None => f.write_str("none"),
        }
    }
}

impl FromStr for Address {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "none" {
            return Ok(Self::default());
        }

        s.parse::<SocketAddr>()
            .map(Self::new)
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invalid_address() {
        let addr = Address::default();
        assert!(!addr.valid());
        assert_eq!(addr.version(), 0);
        assert_eq!(ip_to_str(&addr), "none");
        assert_eq!(address_to_str(&addr), "none");
    }

    #[test]
    fn test_ipv4_address() {
        let mut addr = Address::default();
        assert!(addr.set_ipv4("1.2.0.255", 123));
        assert!(addr.valid());
        assert_eq!(addr.version(), 4);

        assert_eq!(ip_to_str(&addr), "1.2.0.255");
        assert_eq!(address_to_str(&addr), "1.2.0.255:123");
    }

    #[test]
    fn test_ipv6_address() {
        let mut addr = Address::default();
        assert!(addr.set_ipv6("2001:db8::1", 123));
        assert_eq!(addr.version(), 6);

        assert_eq!(ip_to_str(&addr), "[2001:db8::1]");
        assert_eq!(address_to_str(&addr), "[2001:db8::1]:123");
    }

    #[test]
    fn test_bad_ip_leaves_address_unchanged() {
        let mut addr = Address::default();
        assert!(!addr.set_ipv4("1.2.3", 1));
        assert!(!addr.set_ipv6("1.2.3.4", 1));
        assert!(!addr.valid());
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let addr: Address = "1.2.0.255:123".parse().unwrap();
        assert_eq!(addr.ip(), Some(IpAddr::V4(Ipv4Addr::new(1, 2, 0, 255))));
        assert_eq!(addr.port(), 123);

        let back: Address = addr.to_string().parse().unwrap();
        assert_eq!(back, addr);

        let none: Address = "none".parse().unwrap();
        assert!(!none.valid());
        assert!("garbage".parse::<Address>().is_err());
    }

    #[test]
    fn test_multicast() {
        let group: Address = "239.1.2.3:5000".parse().unwrap();
        assert!(group.multicast());

        let group6: Address = "[ff02::1]:5000".parse().unwrap();
        assert!(group6.multicast());

        let unicast: Address = "10.0.0.1:5000".parse().unwrap();
        assert!(!unicast.multicast());
        assert!(!Address::default().multicast());
    }

    #[test]
    fn test_saddr_roundtrip() {
        let addr: Address = "[::1]:9000".parse().unwrap();
        let saddr = addr.saddr().unwrap();

        let mut back = Address::default();
        assert!(back.set_saddr(&saddr));
        assert_eq!(back, addr);
        assert_eq!(addr.slen(), saddr.len() as usize);
        assert_eq!(Address::default().slen(), 0);
    }

    #[test]
    fn test_slen_differs_by_family() {
        let v4: Address = "127.0.0.1:1".parse().unwrap();
        let v6: Address = "[::1]:1".parse().unwrap();
        assert!(v4.slen() > 0);
        assert!(v6.slen() > v4.slen());
    }

    proptest! {
        #[test]
        fn prop_ipv4_format_parse(octets: [u8; 4], port: u16) {
            let addr = Address::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port));
            let text = addr.to_string();
            prop_assert!(!text.starts_with('['));
            prop_assert_eq!(text.parse::<Address>().unwrap(), addr);
        }

        #[test]
        fn prop_ipv6_format_parse(segments: [u16; 8], port: u16) {
            let addr = Address::new(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(segments)), port));
            let text = addr.to_string();
            prop_assert!(text.starts_with('['));
            let suffix = format!("]:{}", port);
            prop_assert!(text.ends_with(&suffix));
            prop_assert_eq!(text.parse::<Address>().unwrap(), addr);
        }
    }
}
