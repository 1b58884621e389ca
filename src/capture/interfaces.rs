use log::{error, info, warn};
use std::net::IpAddr;

use crate::models::interface::InterfaceInfo;

/// Interfaces available for capture.
///
/// pnet_datalink is asked first; libpcap's device list is the fallback
/// when it comes back empty or panics.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    info!("Fetching network interface information");

    match std::panic::catch_unwind(pnet_interfaces) {
        Ok(interfaces) if !interfaces.is_empty() => {
            info!("Found {} interfaces using pnet_datalink", interfaces.len());
            return interfaces;
        }
        Ok(_) => info!("pnet_datalink found no interfaces, falling back to pcap"),
        Err(_) => error!("pnet_datalink panicked while listing interfaces"),
    }

    match pcap::Device::list() {
        Ok(devices) => {
            let interfaces: Vec<InterfaceInfo> =
                devices.into_iter().map(from_pcap_device).collect();
            info!("Found {} interfaces using pcap", interfaces.len());
            interfaces
        }
        Err(e) => {
            warn!("Failed to get interfaces from pcap: {}", e);
            Vec::new()
        }
    }
}

fn pnet_interfaces() -> Vec<InterfaceInfo> {
    pnet_datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let mut info = iface
                .ips
                .iter()
                .fold(InterfaceInfo::new(iface.name.clone()), |info, network| {
                    info.with_address(network.ip())
                })
                .with_description(Some(iface.description.clone()));
            info.mac_address = iface.mac.map(|mac| mac.to_string());
            info.is_loopback = iface.is_loopback();
            info.is_up = iface.is_up();
            info
        })
        .collect()
}

fn from_pcap_device(device: pcap::Device) -> InterfaceInfo {
    let mut info = device
        .addresses
        .iter()
        .map(|address| address.addr)
        .fold(InterfaceInfo::new(device.name.clone()), |info, addr: IpAddr| {
            info.with_address(addr)
        })
        .with_description(device.desc.clone());
    info.is_loopback = device.flags.is_loopback();
    info.is_up = device.flags.is_up();
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_does_not_panic() {
        for iface in list_interfaces() {
            assert!(!iface.name.is_empty());
            assert!(!iface.to_string().is_empty());
        }
    }
}
