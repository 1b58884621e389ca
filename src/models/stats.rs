use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics for a sniffer session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaptureStats {
    /// Frames read from the source
    pub total_packets: usize,

    /// Packets that passed every live filter
    pub accepted_packets: usize,

    /// Packets dropped by a live filter
    pub rejected_packets: usize,

    /// Total bytes read
    pub total_bytes: usize,

    /// Accepted packets per innermost protocol
    pub protocols: HashMap<String, usize>,

    /// Capture start time
    pub start_time: Option<DateTime<Utc>>,

    /// Capture end time (if stopped)
    pub end_time: Option<DateTime<Utc>>,

    /// Packet rate (packets per second)
    pub packet_rate: f64,

    /// Data rate (bytes per second)
    pub data_rate: f64,

    /// Parse and validator failures
    pub errors: usize,
}

impl CaptureStats {
    /// Reset counters and stamp the start time
    pub fn start(&mut self) {
        *self = CaptureStats {
            start_time: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn record_frame(&mut self, bytes: usize) {
        self.total_packets += 1;
        self.total_bytes += bytes;
        self.update_rates(Utc::now());
    }

    pub fn record_accepted(&mut self, protocol: &str) {
        self.accepted_packets += 1;
        *self.protocols.entry(protocol.to_string()).or_insert(0) += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected_packets += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        self.update_rates(now);
        self.end_time = Some(now);
    }

    fn update_rates(&mut self, now: DateTime<Utc>) {
        if let Some(start_time) = self.start_time {
            let elapsed = now.signed_duration_since(start_time);
            let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            if elapsed_secs > 0.0 {
                self.packet_rate = self.total_packets as f64 / elapsed_secs;
                self.data_rate = self.total_bytes as f64 / elapsed_secs;
            }
        }
    }
}
