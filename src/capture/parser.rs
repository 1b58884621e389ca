use log::{debug, log_enabled, trace, Level};
use pnet::packet::{
    arp::ArpPacket,
    ethernet::{EtherTypes, EthernetPacket},
    icmp::IcmpPacket,
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    Packet as PnetPacket,
};
use pnet::util::MacAddr;

use crate::models::packet::{Layer, Packet, Value};
use crate::utils::error::{SniffError, SniffResult};

/// Dissects raw Ethernet frames into a layer stack
#[derive(Debug, Default)]
pub struct PacketParser {}

impl PacketParser {
    /// Create a new packet parser
    pub fn new() -> Self {
        Self {}
    }

    /// Parse a raw frame into a packet; truncated headers are errors
    pub fn parse_packet(&self, data: Vec<u8>, interface: &str) -> SniffResult<Packet> {
        if log_enabled!(Level::Debug) {
            debug!("Parsing packet from '{}', size: {} bytes", interface, data.len());
        }

        let mut layers = Vec::new();
        {
            let eth_packet = EthernetPacket::new(&data).ok_or_else(|| truncated("Ethernet"))?;
            let ethertype = eth_packet.get_ethertype();

            layers.push(
                Layer::new("Ether")
                    .with("src", format_mac(eth_packet.get_source()))
                    .with("dst", format_mac(eth_packet.get_destination()))
                    .with("type", ethertype.0),
            );

            if log_enabled!(Level::Trace) {
                trace!(
                    "EtherType: {:?}, src: {}, dst: {}",
                    ethertype,
                    eth_packet.get_source(),
                    eth_packet.get_destination()
                );
            }

            match ethertype {
                EtherTypes::Ipv4 => self.parse_ipv4(eth_packet.payload(), &mut layers)?,
                EtherTypes::Ipv6 => self.parse_ipv6(eth_packet.payload(), &mut layers)?,
                EtherTypes::Arp => self.parse_arp(eth_packet.payload(), &mut layers)?,
                _ => push_raw(eth_packet.payload(), &mut layers),
            }
        }

        Ok(Packet {
            id: 0,
            timestamp: chrono::Utc::now(),
            interface: interface.to_string(),
            length: data.len(),
            raw_data: data,
            layers,
        })
    }

    fn parse_ipv4(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let ipv4_packet = Ipv4Packet::new(data).ok_or_else(|| truncated("IPv4"))?;

        layers.push(
            Layer::new("IP")
                .with("version", ipv4_packet.get_version())
                .with("ihl", ipv4_packet.get_header_length())
                .with("tos", ipv4_packet.get_dscp() << 2 | ipv4_packet.get_ecn())
                .with("len", ipv4_packet.get_total_length())
                .with("id", ipv4_packet.get_identification())
                .with("ttl", ipv4_packet.get_ttl())
                .with("proto", ipv4_packet.get_next_level_protocol().0)
                .with("src", ipv4_packet.get_source())
                .with("dst", ipv4_packet.get_destination()),
        );

        if log_enabled!(Level::Trace) {
            trace!(
                "IPv4 - src: {}, dst: {}, proto: {:?}",
                ipv4_packet.get_source(),
                ipv4_packet.get_destination(),
                ipv4_packet.get_next_level_protocol()
            );
        }

        self.parse_transport_protocol(
            ipv4_packet.get_next_level_protocol(),
            ipv4_packet.payload(),
            layers,
        )
    }

    fn parse_ipv6(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let ipv6_packet = Ipv6Packet::new(data).ok_or_else(|| truncated("IPv6"))?;

        layers.push(
            Layer::new("IPv6")
                .with("version", ipv6_packet.get_version())
                .with("tc", ipv6_packet.get_traffic_class())
                .with("fl", ipv6_packet.get_flow_label())
                .with("plen", ipv6_packet.get_payload_length())
                .with("nh", ipv6_packet.get_next_header().0)
                .with("hlim", ipv6_packet.get_hop_limit())
                .with("src", ipv6_packet.get_source())
                .with("dst", ipv6_packet.get_destination()),
        );

        self.parse_transport_protocol(ipv6_packet.get_next_header(), ipv6_packet.payload(), layers)
    }

    /// ARP carries no `src`/`dst`, so endpoint filters skip it
    fn parse_arp(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let arp_packet = ArpPacket::new(data).ok_or_else(|| truncated("ARP"))?;

        layers.push(
            Layer::new("ARP")
                .with("hwtype", arp_packet.get_hardware_type().0)
                .with("ptype", arp_packet.get_protocol_type().0)
                .with("op", arp_packet.get_operation().0)
                .with("hwsrc", format_mac(arp_packet.get_sender_hw_addr()))
                .with("psrc", arp_packet.get_sender_proto_addr())
                .with("hwdst", format_mac(arp_packet.get_target_hw_addr()))
                .with("pdst", arp_packet.get_target_proto_addr()),
        );
        Ok(())
    }

    fn parse_transport_protocol(
        &self,
        proto: IpNextHeaderProtocol,
        data: &[u8],
        layers: &mut Vec<Layer>,
    ) -> SniffResult<()> {
        if log_enabled!(Level::Trace) {
            trace!("Transport protocol: {:?}, data length: {}", proto, data.len());
        }

        match proto {
            IpNextHeaderProtocols::Tcp => self.parse_tcp(data, layers),
            IpNextHeaderProtocols::Udp => self.parse_udp(data, layers),
            IpNextHeaderProtocols::Icmp => self.parse_icmp(data, layers),
            _ => {
                push_raw(data, layers);
                Ok(())
            }
        }
    }

    fn parse_tcp(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let tcp_packet = TcpPacket::new(data).ok_or_else(|| truncated("TCP"))?;

        layers.push(
            Layer::new("TCP")
                .with("sport", tcp_packet.get_source())
                .with("dport", tcp_packet.get_destination())
                .with("seq", tcp_packet.get_sequence())
                .with("ack", tcp_packet.get_acknowledgement())
                .with("dataofs", tcp_packet.get_data_offset())
                .with("flags", Value::Int(tcp_packet.get_flags() as i64))
                .with("window", tcp_packet.get_window())
                .with("chksum", tcp_packet.get_checksum())
                .with("urgptr", tcp_packet.get_urgent_ptr()),
        );

        if log_enabled!(Level::Trace) {
            trace!(
                "TCP - src port: {}, dst port: {}, payload: {} bytes",
                tcp_packet.get_source(),
                tcp_packet.get_destination(),
                tcp_packet.payload().len()
            );
        }

        push_raw(tcp_packet.payload(), layers);
        Ok(())
    }

    fn parse_udp(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let udp_packet = UdpPacket::new(data).ok_or_else(|| truncated("UDP"))?;

        layers.push(
            Layer::new("UDP")
                .with("sport", udp_packet.get_source())
                .with("dport", udp_packet.get_destination())
                .with("len", udp_packet.get_length())
                .with("chksum", udp_packet.get_checksum()),
        );

        push_raw(udp_packet.payload(), layers);
        Ok(())
    }

    fn parse_icmp(&self, data: &[u8], layers: &mut Vec<Layer>) -> SniffResult<()> {
        let icmp_packet = IcmpPacket::new(data).ok_or_else(|| truncated("ICMP"))?;

        layers.push(
            Layer::new("ICMP")
                .with("type", icmp_packet.get_icmp_type().0)
                .with("code", icmp_packet.get_icmp_code().0)
                .with("chksum", icmp_packet.get_checksum()),
        );

        push_raw(icmp_packet.payload(), layers);
        Ok(())
    }
}

/// Trailing bytes nobody dissected
fn push_raw(payload: &[u8], layers: &mut Vec<Layer>) {
    if !payload.is_empty() {
        layers.push(Layer::new("Raw").with("len", Value::Int(payload.len() as i64)));
    }
}

fn truncated(header: &str) -> SniffError {
    SniffError::PacketParsing(format!("Failed to parse {} header", header))
}

fn format_mac(mac: MacAddr) -> String {
    mac.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packet::LayerFields;
    use crate::testutil;
    use std::net::Ipv4Addr;

    fn names(packet: &Packet) -> Vec<&str> {
        packet.layers.iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn test_parse_tcp() {
        let frame = testutil::http_request();
        let len = frame.len();
        let packet = PacketParser::new().parse_packet(frame, "eth0").unwrap();

        assert_eq!(names(&packet), vec!["Ether", "IP", "TCP", "Raw"]);
        assert_eq!(packet.length, len);
        assert_eq!(packet.raw_data.len(), len);
        assert_eq!(packet.interface, "eth0");

        let ether = packet.layer("Ether").unwrap();
        assert_eq!(ether.attribute("src"), Some(&Value::from("00:11:22:33:44:55")));
        assert_eq!(ether.attribute("type"), Some(&Value::Int(0x0800)));

        let ip = packet.layer("IP").unwrap();
        assert_eq!(ip.attribute("src"), Some(&Value::from(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(ip.attribute("ttl"), Some(&Value::Int(64)));
        assert_eq!(ip.attribute("proto"), Some(&Value::Int(6)));

        let tcp = packet.layer("TCP").unwrap();
        assert_eq!(tcp.attribute("sport"), Some(&Value::Int(51000)));
        assert_eq!(tcp.attribute("dport"), Some(&Value::Int(80)));
        assert_eq!(tcp.attribute("flags"), Some(&Value::Int(2)));

        let raw = packet.layer("Raw").unwrap();
        assert_eq!(raw.attribute("len"), Some(&Value::Int(16)));
    }

    #[test]
    fn test_parse_udp() {
        let packet = PacketParser::new()
            .parse_packet(testutil::dns_query(), "eth0")
            .unwrap();
        assert_eq!(names(&packet), vec!["Ether", "IP", "UDP", "Raw"]);
        assert_eq!(packet.protocol(), "UDP");
        assert_eq!(packet.summary().info, "DNS Query/Response");
    }

    #[test]
    fn test_parse_arp() {
        let frame = testutil::arp_frame(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 254));
        let packet = PacketParser::new().parse_packet(frame, "eth0").unwrap();

        assert_eq!(names(&packet), vec!["Ether", "ARP"]);
        let arp = packet.layer("ARP").unwrap();
        assert_eq!(arp.attribute("op"), Some(&Value::Int(1)));
        assert_eq!(arp.attribute("pdst"), Some(&Value::from("10.0.0.254")));
        assert!(arp.endpoints().is_none());
    }

    #[test]
    fn test_truncated_headers() {
        let parser = PacketParser::new();
        assert!(matches!(
            parser.parse_packet(vec![0u8; 6], "eth0"),
            Err(SniffError::PacketParsing(_))
        ));

        let mut frame = testutil::http_request();
        frame.truncate(14 + 20 + 10);
        assert!(matches!(
            parser.parse_packet(frame, "eth0"),
            Err(SniffError::PacketParsing(_))
        ));
    }

    #[test]
    fn test_unknown_ethertype_is_raw() {
        let mut frame = testutil::http_request();
        frame[12] = 0x88;
        frame[13] = 0xb5;
        let packet = PacketParser::new().parse_packet(frame, "eth0").unwrap();
        assert_eq!(names(&packet), vec!["Ether", "Raw"]);
    }
}
