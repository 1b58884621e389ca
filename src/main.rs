use anyhow::{bail, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use rustsniff::capture::{list_interfaces, PacketSource, PcapSource, Sniffer};
use rustsniff::filter::{self, Filter, LiveFilter, ValueFilter};
use rustsniff::models::config::SniffConfig;
use rustsniff::models::packet::Value;
use rustsniff::models::stats::CaptureStats;
use rustsniff::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Packet sniffer with composable capture filters")]
struct Args {
    /// Network interface to capture from
    #[clap(short, long)]
    interface: Option<String>,

    /// Read packets from a pcap file instead of an interface
    #[clap(short = 'r', long)]
    offline: Option<PathBuf>,

    /// List capture interfaces and exit
    #[clap(short = 'L', long)]
    list_interfaces: bool,

    /// Stop after this many accepted packets
    #[clap(short, long)]
    count: Option<usize>,

    /// Stop after this many seconds
    #[clap(short, long)]
    timeout: Option<u64>,

    /// Enable promiscuous mode
    #[clap(short = 'P', long)]
    promiscuous: bool,

    /// Maximum bytes captured per packet
    #[clap(long, default_value = "65535")]
    snaplen: i32,

    /// Raw BPF expression, ANDed with the other filter options
    #[clap(long)]
    bpf: Option<String>,

    /// Protocol layer the packet must carry (repeatable), e.g. TCP
    #[clap(long)]
    proto: Vec<String>,

    /// Address on either side (repeatable)
    #[clap(long)]
    host: Vec<String>,

    #[clap(long)]
    src_host: Vec<String>,

    #[clap(long)]
    dst_host: Vec<String>,

    /// Port on either side (repeatable)
    #[clap(long)]
    port: Vec<u16>,

    #[clap(long)]
    src_port: Vec<u16>,

    #[clap(long)]
    dst_port: Vec<u16>,

    /// JSON filter tree, as written by --dump-filter
    #[clap(long)]
    filter_file: Option<PathBuf>,

    /// Evaluate the filter on each parsed packet instead of in libpcap
    #[clap(long)]
    live: bool,

    /// Print the combined filter as JSON and exit
    #[clap(long)]
    dump_filter: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting rustsniff v{}", env!("CARGO_PKG_VERSION"));

    if args.list_interfaces {
        for iface in list_interfaces() {
            println!("{}", iface);
        }
        return Ok(());
    }

    let filter = build_filter(&args)?;

    if args.dump_filter {
        match &filter {
            Some(filter) => println!("{}", serde_json::to_string_pretty(&filter::dump(filter)?)?),
            None => warn!("No filter options given, nothing to dump"),
        }
        return Ok(());
    }

    // Without --live the whole tree is handed to libpcap as text
    let bpf = match &filter {
        Some(filter) if !args.live => Some(filter.format()).filter(|text| !text.is_empty()),
        _ => None,
    };

    let config = SniffConfig {
        interface: args.interface.clone(),
        offline: args.offline.clone(),
        promiscuous: args.promiscuous,
        snaplen: args.snaplen,
        count: args.count,
        timeout_secs: args.timeout,
        filter: bpf,
        store: false,
        ..SniffConfig::default()
    };

    let sniffer = Arc::new(Sniffer::new(config.clone()));
    if args.live {
        if let Some(filter) = filter {
            info!("Evaluating filter per packet: {}", filter);
            sniffer.add_live_filter("cli", LiveFilter::from_filter(filter));
        }
    }

    let stop_handle = Arc::clone(&sniffer);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            stop_handle.stop();
        }
    });

    info!("Capturing from {}", config.source_name());
    let stats = match (&config.offline, &config.interface) {
        (Some(path), _) => {
            let source = PcapSource::open_file(path, config.filter.as_deref())?;
            stream(sniffer, source).await?
        }
        (None, Some(_)) => stream(sniffer, PcapSource::open_live(&config)?).await?,
        (None, None) => bail!("No packet source: pass --interface or --offline"),
    };

    info!(
        "Capture finished: {} frames, {} accepted, {} rejected, {} errors, {} bytes ({:.1} pkt/s)",
        stats.total_packets,
        stats.accepted_packets,
        stats.rejected_packets,
        stats.errors,
        stats.total_bytes,
        stats.packet_rate
    );
    for (protocol, count) in &stats.protocols {
        info!("  {}: {}", protocol, count);
    }

    Ok(())
}

/// Run the sniffer on a worker and print accepted packets as they arrive
async fn stream<S>(sniffer: Arc<Sniffer>, source: S) -> Result<CaptureStats>
where
    S: PacketSource + 'static,
{
    let (handle, mut rx) = sniffer.spawn(source);
    while let Some(packet) = rx.recv().await {
        println!("{}", packet.summary());
    }
    Ok(handle.await??)
}

/// AND together every filter option that was given
fn build_filter(args: &Args) -> Result<Option<Filter>> {
    let mut clauses = Vec::new();

    if !args.proto.is_empty() {
        clauses.push(Filter::from(ValueFilter::new().with_types(
            args.proto.iter().map(|p| p.to_uppercase()),
        )));
    }

    // Hosts and ports stay in separate clauses so they AND in both the
    // libpcap text and the per-packet check
    clauses.extend(either_side(host_values(&args.host)));
    clauses.extend(either_side(port_values(&args.port)));
    clauses.extend(source_side(host_values(&args.src_host)));
    clauses.extend(source_side(port_values(&args.src_port)));
    clauses.extend(destination_side(host_values(&args.dst_host)));
    clauses.extend(destination_side(port_values(&args.dst_port)));

    if let Some(bpf) = &args.bpf {
        clauses.push(Filter::static_filter(bpf.clone()));
    }
    if let Some(path) = &args.filter_file {
        clauses.push(filter::load_file(path)?);
    }

    Ok(filter::intersect_all(clauses))
}

fn host_values(hosts: &[String]) -> Vec<Value> {
    hosts.iter().map(|h| Value::from(h.as_str())).collect()
}

fn port_values(ports: &[u16]) -> Vec<Value> {
    ports.iter().map(|&p| Value::from(p)).collect()
}

fn source_side(values: Vec<Value>) -> Option<Filter> {
    if values.is_empty() {
        return None;
    }
    Some(Filter::from(ValueFilter::new().with_source_values(values)))
}

fn destination_side(values: Vec<Value>) -> Option<Filter> {
    if values.is_empty() {
        return None;
    }
    Some(Filter::from(ValueFilter::new().with_destination_values(values)))
}

/// `src X or dst X` for the given values
fn either_side(values: Vec<Value>) -> Option<Filter> {
    let src = source_side(values.clone())?;
    let dst = destination_side(values)?;
    Some(src | dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustsniff::models::packet::{Layer, Packet};
    use std::net::Ipv4Addr;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("rustsniff").chain(argv.iter().copied()))
    }

    #[test]
    fn test_no_filter_options() {
        assert_eq!(build_filter(&parse(&[])).unwrap(), None);
    }

    #[test]
    fn test_build_filter() {
        let args = parse(&["--proto", "tcp", "--dst-port", "80", "--host", "10.0.0.1"]);
        let filter = build_filter(&args).unwrap().unwrap();
        assert_eq!(
            filter.format(),
            "(tcp and (src host 10.0.0.1 or dst host 10.0.0.1) and dst port 80)"
        );
    }

    fn tcp_from(src: Ipv4Addr, sport: u16) -> Packet {
        Packet::from_layers(vec![
            Layer::new("IP")
                .with("src", src)
                .with("dst", Ipv4Addr::new(10, 0, 0, 2)),
            Layer::new("TCP").with("sport", sport).with("dport", 40000u16),
        ])
    }

    #[test]
    fn test_source_host_and_port_both_apply() {
        let args = parse(&["--src-host", "10.0.0.1", "--src-port", "80"]);
        let filter = build_filter(&args).unwrap().unwrap();
        assert_eq!(filter.format(), "(src host 10.0.0.1 and src port 80)");

        assert!(filter.matches(&tcp_from(Ipv4Addr::new(10, 0, 0, 1), 80)).unwrap());
        assert!(!filter.matches(&tcp_from(Ipv4Addr::new(10, 0, 0, 9), 80)).unwrap());
        assert!(!filter.matches(&tcp_from(Ipv4Addr::new(10, 0, 0, 1), 81)).unwrap());
    }

    #[test]
    fn test_destination_hosts_or_together() {
        let args = parse(&["--dst-host", "10.0.0.2", "--dst-host", "10.0.0.3"]);
        let filter = build_filter(&args).unwrap().unwrap();
        assert_eq!(filter.format(), "(dst host 10.0.0.2 or dst host 10.0.0.3)");
        assert!(filter.matches(&tcp_from(Ipv4Addr::new(10, 0, 0, 1), 80)).unwrap());
    }

    #[test]
    fn test_bpf_is_static() {
        let args = parse(&["--bpf", "icmp"]);
        assert_eq!(
            build_filter(&args).unwrap(),
            Some(Filter::static_filter("icmp"))
        );
    }
}
