use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A single field value carried by a protocol layer or accepted by a filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Numeric fields: ports, TTLs, protocol numbers
    Int(i64),

    /// IPv4 or IPv6 address
    Ip(IpAddr),

    /// Anything else, including MAC addresses
    Text(String),
}

/// Coarse classification used when comparing endpoint values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Ip,
    Text,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Ip(_) => ValueKind::Ip,
            Value::Text(_) => ValueKind::Text,
        }
    }

    /// Capture-filter keyword a bare value of this kind is qualified with
    pub fn keyword(&self) -> &'static str {
        match self {
            Value::Int(_) => "port",
            Value::Ip(_) | Value::Text(_) => "host",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Ip(ip) => write!(f, "{}", ip),
            Value::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Int(value.into())
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Int(value.into())
    }
}

impl From<IpAddr> for Value {
    fn from(value: IpAddr) -> Self {
        Value::Ip(value)
    }
}

impl From<Ipv4Addr> for Value {
    fn from(value: Ipv4Addr) -> Self {
        Value::Ip(IpAddr::V4(value))
    }
}

impl From<Ipv6Addr> for Value {
    fn from(value: Ipv6Addr) -> Self {
        Value::Ip(IpAddr::V6(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        match value.parse::<IpAddr>() {
            Ok(ip) => Value::Ip(ip),
            Err(_) => Value::Text(value.to_string()),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::from(value.as_str())
    }
}

/// Source and destination of a layer, either addresses or ports
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endpoints<'a> {
    /// `src`/`dst` fields (link and network layers)
    Network { src: &'a Value, dst: &'a Value },

    /// `sport`/`dport` fields (transport layers)
    Transport { sport: &'a Value, dport: &'a Value },
}

impl<'a> Endpoints<'a> {
    pub fn source(&self) -> &'a Value {
        match self {
            Endpoints::Network { src, .. } => src,
            Endpoints::Transport { sport, .. } => sport,
        }
    }

    pub fn destination(&self) -> &'a Value {
        match self {
            Endpoints::Network { dst, .. } => dst,
            Endpoints::Transport { dport, .. } => dport,
        }
    }

    /// Capture-filter keyword naming this kind of endpoint
    pub fn keyword(&self) -> &'static str {
        match self {
            Endpoints::Network { .. } => "host",
            Endpoints::Transport { .. } => "port",
        }
    }
}

/// What a protocol layer must expose to be inspected by value filters
pub trait LayerFields {
    /// Protocol type name, e.g. `TCP`
    fn type_name(&self) -> &str;

    /// Look up a named attribute
    fn attribute(&self, name: &str) -> Option<&Value>;

    /// Source/destination pair, preferring `src`/`dst` over `sport`/`dport`
    fn endpoints(&self) -> Option<Endpoints<'_>> {
        if let (Some(src), Some(dst)) = (self.attribute("src"), self.attribute("dst")) {
            return Some(Endpoints::Network { src, dst });
        }
        if let (Some(sport), Some(dport)) = (self.attribute("sport"), self.attribute("dport")) {
            return Some(Endpoints::Transport { sport, dport });
        }
        None
    }
}

/// One protocol header in a packet's encapsulation stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer type name (Ether, IP, IPv6, ARP, TCP, UDP, ICMP, Raw)
    pub name: String,

    /// Parsed header fields
    pub fields: BTreeMap<String, Value>,
}

impl Layer {
    /// Create an empty layer of the given type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }
}

impl LayerFields for Layer {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Represents a captured network packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Sequence number assigned by the sniffer
    pub id: u64,

    /// Timestamp when the packet was captured
    pub timestamp: DateTime<Utc>,

    /// Interface or file the packet was read from
    pub interface: String,

    /// Length of the packet in bytes
    pub length: usize,

    /// The raw frame bytes
    #[serde(skip_serializing, default)]
    pub raw_data: Vec<u8>,

    /// Protocol layers, outermost first
    pub layers: Vec<Layer>,
}

impl Packet {
    /// Build a packet from an already dissected layer stack
    pub fn from_layers(layers: Vec<Layer>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            interface: String::new(),
            length: 0,
            raw_data: Vec::new(),
            layers,
        }
    }

    /// First layer of the given type, compared case-insensitively
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.name.eq_ignore_ascii_case(name))
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }

    /// Innermost protocol, ignoring the trailing payload
    pub fn protocol(&self) -> &str {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.name != "Raw")
            .map(|layer| layer.name.as_str())
            .unwrap_or("Unknown")
    }

    /// Condensed form for listings
    pub fn summary(&self) -> PacketSummary {
        PacketSummary {
            id: self.id,
            timestamp: self.timestamp,
            protocol: self.protocol().to_string(),
            source: self.format_endpoint(true),
            destination: self.format_endpoint(false),
            length: self.length,
            info: self.generate_info(),
        }
    }

    fn format_endpoint(&self, source: bool) -> String {
        let mut host = None;
        let mut port = None;
        for ep in self.layers.iter().filter_map(|layer| layer.endpoints()) {
            let value = if source { ep.source() } else { ep.destination() };
            match ep {
                Endpoints::Network { .. } => host = Some(value.to_string()),
                Endpoints::Transport { .. } => port = Some(value.to_string()),
            }
        }
        match (host, port) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host,
            _ => "Unknown".to_string(),
        }
    }

    fn generate_info(&self) -> String {
        let ports = self.layer(self.protocol()).and_then(|layer| {
            match (layer.attribute("sport"), layer.attribute("dport")) {
                (Some(s), Some(d)) => Some((s.as_int()?, d.as_int()?)),
                _ => None,
            }
        });

        match (self.protocol(), ports) {
            ("TCP", Some((_, 80 | 8080))) => "HTTP Request".to_string(),
            ("TCP", Some((80 | 8080, _))) => "HTTP Response".to_string(),
            ("TCP", Some((443, _) | (_, 443))) => "HTTPS Traffic".to_string(),
            ("TCP", _) => "TCP Segment".to_string(),
            ("UDP", Some((53, _) | (_, 53))) => "DNS Query/Response".to_string(),
            ("UDP", _) => "UDP Datagram".to_string(),
            ("ICMP", _) => "ICMP Message".to_string(),
            ("ARP", _) => "ARP Request/Reply".to_string(),
            (other, _) => format!("{} Packet", other),
        }
    }
}

/// A more concise representation of a packet for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketSummary {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,

    /// Source address (IP:port or MAC)
    pub source: String,

    /// Destination address (IP:port or MAC)
    pub destination: String,

    pub length: usize,

    /// Brief description of the packet
    pub info: String,
}

impl fmt::Display for PacketSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<6} {} {:<5} {} -> {} len={} {}",
            self.id,
            self.timestamp.format("%H:%M:%S%.6f"),
            self.protocol,
            self.source,
            self.destination,
            self.length,
            self.info
        )
    }
}
