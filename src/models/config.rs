use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sniffer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniffConfig {
    /// Network interface to capture from
    pub interface: Option<String>,

    /// Read packets from this pcap file instead of an interface
    pub offline: Option<PathBuf>,

    /// Enable promiscuous mode
    pub promiscuous: bool,

    /// Maximum bytes captured per packet
    pub snaplen: i32,

    /// libpcap read timeout in milliseconds
    pub read_timeout_ms: i32,

    /// Stop after this many accepted packets
    pub count: Option<usize>,

    /// Stop after this many seconds
    pub timeout_secs: Option<u64>,

    /// BPF filter expression handed to libpcap
    pub filter: Option<String>,

    /// Keep accepted packets in memory
    pub store: bool,

    /// Maximum number of stored packets; oldest are dropped first
    pub buffer_size: usize,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            interface: None,
            offline: None,
            promiscuous: false,
            snaplen: 65535,
            read_timeout_ms: 1000,
            count: None,
            timeout_secs: None,
            filter: None,
            store: true,
            buffer_size: 1000,
        }
    }
}

impl SniffConfig {
    /// Name of the packet source, used to tag captured packets
    pub fn source_name(&self) -> String {
        match (&self.offline, &self.interface) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(interface)) => interface.clone(),
            (None, None) => "memory".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_name() {
        let mut config = SniffConfig::default();
        assert_eq!(config.source_name(), "memory");

        config.interface = Some("eth0".to_string());
        assert_eq!(config.source_name(), "eth0");

        config.offline = Some(PathBuf::from("/tmp/trace.pcap"));
        assert_eq!(config.source_name(), "/tmp/trace.pcap");
    }
}
