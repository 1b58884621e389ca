pub mod interfaces;
pub mod parser;
pub mod sniffer;

pub use interfaces::list_interfaces;
pub use parser::PacketParser;
pub use sniffer::{MemorySource, PacketSource, PcapSource, Sniffer};
