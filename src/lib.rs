//! Packet filter algebra and live capture filtering on top of libpcap.

pub mod capture;
pub mod filter;
pub mod models;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use filter::{Filter, LiveFilter, PacketFilter, ValueFilter};
pub use utils::error::{SniffError, SniffResult};
