use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A capture-capable network interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// Device name as libpcap knows it
    pub name: String,

    pub description: Option<String>,

    /// Assigned addresses, IPv4 first
    pub addresses: Vec<IpAddr>,

    pub mac_address: Option<String>,

    pub is_loopback: bool,

    pub is_up: bool,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            addresses: Vec::new(),
            mac_address: None,
            is_loopback: false,
            is_up: true,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.is_empty());
        self
    }

    /// Add an address, keeping IPv4 addresses ahead of IPv6 ones
    pub fn with_address(mut self, address: IpAddr) -> Self {
        let at = if address.is_ipv4() {
            self.addresses.iter().take_while(|a| a.is_ipv4()).count()
        } else {
            self.addresses.len()
        };
        self.addresses.insert(at, address);
        self
    }

    pub fn ipv4_address(&self) -> Option<IpAddr> {
        self.addresses.iter().copied().find(IpAddr::is_ipv4)
    }
}

impl fmt::Display for InterfaceInfo {
    /// `name (addr) [flags] - description`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(address) = self.addresses.first() {
            write!(f, " ({})", address)?;
        }

        let mut flags = Vec::new();
        if self.is_up {
            flags.push("up");
        }
        if self.is_loopback {
            flags.push("loopback");
        }
        if !flags.is_empty() {
            write!(f, " [{}]", flags.join(", "))?;
        }

        if let Some(description) = &self.description {
            write!(f, " - {}", description)?;
        }
        Ok(())
    }
}
