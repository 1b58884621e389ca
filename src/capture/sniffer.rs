use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use log::{debug, error, info, log_enabled, trace, warn, Level};
use parking_lot::{Mutex, RwLock};
use pcap::{Activated, Active, Capture, Device, Offline};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::parser::PacketParser;
use crate::filter::LiveFilter;
use crate::models::config::SniffConfig;
use crate::models::packet::Packet;
use crate::models::stats::CaptureStats;
use crate::utils::error::{SniffError, SniffResult};

const MAX_CONSECUTIVE_ERRORS: usize = 5;

/// A raw frame read from a source
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of polling a packet source
#[derive(Debug)]
pub enum Next {
    Frame(Frame),

    /// Nothing arrived before the read timeout
    Idle,

    /// The source is exhausted
    Done,
}

/// Where the sniffer reads frames from
pub trait PacketSource: Send {
    fn name(&self) -> &str;

    fn next_frame(&mut self) -> SniffResult<Next>;
}

/// Frames read through libpcap, from an interface or a capture file
pub struct PcapSource<T: Activated> {
    capture: Capture<T>,
    name: String,
}

impl PcapSource<Active> {
    /// Open a live capture on `config.interface`, applying `config.filter`
    pub fn open_live(config: &SniffConfig) -> SniffResult<Self> {
        let interface_name = config
            .interface
            .clone()
            .ok_or_else(|| SniffError::Capture("No interface specified".to_string()))?;

        info!("Starting capture on interface: {}", interface_name);

        // Prefer the fully described device from the device list
        let device = match Device::list() {
            Ok(devices) => devices.into_iter().find(|d| d.name == interface_name),
            Err(e) => {
                warn!("Failed to list devices: {}, will open device by name", e);
                None
            }
        }
        .unwrap_or_else(|| Device::from(interface_name.as_str()));

        let mut capture = Capture::from_device(device)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.read_timeout_ms)
            .open()
            .map_err(|e| {
                error!("Failed to open capture: {}", e);
                SniffError::Capture(format!(
                    "Failed to open capture on {}: {}. \
                     Capturing usually needs elevated privileges.",
                    interface_name, e
                ))
            })?;

        if let Some(filter) = &config.filter {
            info!("Applying filter: {}", filter);
            capture.filter(filter, true)?;
        }

        Ok(Self {
            capture,
            name: interface_name,
        })
    }
}

impl PcapSource<Offline> {
    /// Open a pcap file, optionally restricted by a capture filter
    pub fn open_file(path: impl AsRef<Path>, filter: Option<&str>) -> SniffResult<Self> {
        let path = path.as_ref();
        info!("Reading packets from {}", path.display());

        let mut capture = Capture::from_file(path)?;
        if let Some(filter) = filter {
            info!("Applying filter: {}", filter);
            capture.filter(filter, true)?;
        }

        Ok(Self {
            capture,
            name: path.display().to_string(),
        })
    }
}

impl<T: Activated> PacketSource for PcapSource<T>
where
    Capture<T>: Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> SniffResult<Next> {
        match self.capture.next_packet() {
            Ok(packet) => {
                if packet.header.caplen as usize != packet.data.len() {
                    warn!(
                        "Packet length mismatch: header says {} but data is {} bytes",
                        packet.header.caplen,
                        packet.data.len()
                    );
                }
                let timestamp = Utc
                    .timestamp_opt(
                        packet.header.ts.tv_sec as i64,
                        (packet.header.ts.tv_usec as u32).saturating_mul(1000),
                    )
                    .single()
                    .unwrap_or_else(Utc::now);
                Ok(Next::Frame(Frame {
                    data: packet.data.to_vec(),
                    timestamp,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(Next::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(Next::Done),
            Err(e) => Err(e.into()),
        }
    }
}

/// Frames queued in memory, for replay
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: VecDeque::new(),
        }
    }

    pub fn from_frames<I>(name: impl Into<String>, frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut source = Self::new(name);
        for frame in frames {
            source.push(frame);
        }
        source
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.frames.push_back(Frame {
            data,
            timestamp: Utc::now(),
        });
    }
}

impl PacketSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> SniffResult<Next> {
        Ok(self.frames.pop_front().map_or(Next::Done, Next::Frame))
    }
}

/// Reads packets from a source, runs them through the live filters and
/// keeps the ones that pass
pub struct Sniffer {
    config: SniffConfig,
    parser: PacketParser,

    /// Named live filters; a packet is accepted when all of them pass
    live_filters: DashMap<String, Arc<LiveFilter>>,

    /// Ends the session once an accepted packet passes it
    stop_filter: RwLock<Option<Arc<LiveFilter>>>,

    stop_requested: AtomicBool,
    next_id: AtomicU64,
    packets: Mutex<VecDeque<Packet>>,
    stats: Mutex<CaptureStats>,
}

impl Sniffer {
    pub fn new(config: SniffConfig) -> Self {
        Self {
            config,
            parser: PacketParser::new(),
            live_filters: DashMap::new(),
            stop_filter: RwLock::new(None),
            stop_requested: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            packets: Mutex::new(VecDeque::new()),
            stats: Mutex::new(CaptureStats::default()),
        }
    }

    /// Register a live filter, replacing any filter with the same name.
    /// The returned handle toggles the registered filter.
    pub fn add_live_filter(&self, name: impl Into<String>, filter: LiveFilter) -> Arc<LiveFilter> {
        let name = name.into();
        let filter = Arc::new(filter);
        debug!("Registering live filter '{}'", name);
        self.live_filters.insert(name, Arc::clone(&filter));
        filter
    }

    pub fn live_filter(&self, name: &str) -> Option<Arc<LiveFilter>> {
        self.live_filters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove_live_filter(&self, name: &str) -> Option<Arc<LiveFilter>> {
        self.live_filters.remove(name).map(|(_, filter)| filter)
    }

    pub fn live_filter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live_filters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn set_stop_filter(&self, filter: LiveFilter) -> Arc<LiveFilter> {
        let filter = Arc::new(filter);
        *self.stop_filter.write() = Some(Arc::clone(&filter));
        filter
    }

    /// End the current session after the current packet. A stopped sniffer
    /// stays stopped, so a request made before `run` starts is not lost.
    pub fn stop(&self) {
        info!("Stopping sniffer");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.lock().clone()
    }

    /// Stored packets, oldest first
    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().iter().cloned().collect()
    }

    /// Read from `source` until a stop condition hits, calling `on_packet`
    /// for every accepted packet. Returns the stored packets.
    pub fn run<S, F>(&self, source: &mut S, mut on_packet: F) -> SniffResult<Vec<Packet>>
    where
        S: PacketSource + ?Sized,
        F: FnMut(&Packet),
    {
        self.packets.lock().clear();
        self.stats.lock().start();

        let deadline = self
            .config
            .timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut consecutive_errors = 0;
        let mut accepted = 0usize;

        info!("Starting capture loop for source: {}", source.name());

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("Stop requested");
                break;
            }
            if self.count_reached(accepted) {
                info!("Captured {} packets, stopping", accepted);
                break;
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                info!("Capture timeout reached");
                break;
            }

            let frame = match source.next_frame() {
                Ok(Next::Frame(frame)) => {
                    consecutive_errors = 0;
                    frame
                }
                Ok(Next::Idle) => {
                    trace!("Packet capture timed out, continuing");
                    continue;
                }
                Ok(Next::Done) => {
                    info!("Source {} exhausted", source.name());
                    break;
                }
                Err(e) => {
                    error!("Error capturing packet: {}", e);
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.stats.lock().finish();
                        return Err(SniffError::Capture(format!(
                            "Too many consecutive errors ({}), last: {}",
                            consecutive_errors, e
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            self.stats.lock().record_frame(frame.data.len());

            let mut packet = match self.parser.parse_packet(frame.data, source.name()) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Failed to parse packet: {}", e);
                    self.stats.lock().record_error();
                    continue;
                }
            };
            packet.timestamp = frame.timestamp;

            if !self.passes_live_filters(&packet) {
                self.stats.lock().record_rejected();
                continue;
            }

            packet.id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.stats.lock().record_accepted(packet.protocol());
            if log_enabled!(Level::Debug) {
                debug!("Accepted packet {}", packet.summary());
            }

            on_packet(&packet);
            accepted += 1;

            let stop_now = self.hits_stop_filter(&packet);
            if self.config.store {
                self.store(packet);
            }

            if stop_now {
                info!("Stop filter matched");
                break;
            }
            if self.count_reached(accepted) {
                info!("Captured {} packets, stopping", accepted);
                break;
            }
        }

        self.stats.lock().finish();
        info!("Capture loop stopped for source: {}", source.name());
        Ok(self.packets())
    }

    /// Run on a blocking worker, streaming accepted packets over a channel.
    /// Dropping the receiver stops the session.
    pub fn spawn<S>(
        self: Arc<Self>,
        mut source: S,
    ) -> (JoinHandle<SniffResult<CaptureStats>>, mpsc::Receiver<Packet>)
    where
        S: PacketSource + 'static,
    {
        let (tx, rx) = mpsc::channel(100);
        let handle = tokio::task::spawn_blocking(move || {
            self.run(&mut source, |packet| {
                if tx.blocking_send(packet.clone()).is_err() {
                    debug!("Packet receiver dropped");
                    self.stop();
                }
            })?;
            Ok(self.stats())
        });
        (handle, rx)
    }

    fn count_reached(&self, accepted: usize) -> bool {
        self.config.count.map_or(false, |count| accepted >= count)
    }

    fn passes_live_filters(&self, packet: &Packet) -> bool {
        for entry in self.live_filters.iter() {
            match entry.value().validate(packet) {
                Ok(true) => {}
                Ok(false) => {
                    if log_enabled!(Level::Trace) {
                        trace!("Live filter '{}' rejected packet", entry.key());
                    }
                    return false;
                }
                Err(e) => {
                    warn!("Live filter '{}' failed: {}", entry.key(), e);
                    self.stats.lock().record_error();
                    return false;
                }
            }
        }
        true
    }

    /// A disabled stop filter never ends the session
    fn hits_stop_filter(&self, packet: &Packet) -> bool {
        let guard = self.stop_filter.read();
        let Some(filter) = guard.as_ref() else {
            return false;
        };
        if !filter.is_enabled() {
            return false;
        }
        match filter.validate(packet) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Stop filter failed: {}", e);
                self.stats.lock().record_error();
                false
            }
        }
    }

    /// Keep a packet, dropping the oldest beyond the buffer size
    fn store(&self, packet: Packet) {
        let mut packets = self.packets.lock();
        packets.push_back(packet);
        while packets.len() > self.config.buffer_size {
            if let Some(dropped) = packets.pop_front() {
                debug!("Removed oldest packet ID {} to maintain buffer size", dropped.id);
            }
        }
    }
}
