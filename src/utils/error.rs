use thiserror::Error;

/// Errors raised by filters, the packet parser and the sniffer
#[derive(Error, Debug)]
pub enum SniffError {
    /// Error from pcap library
    #[error("PCAP error: {0}")]
    Pcap(#[from] pcap::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from packet parsing
    #[error("Packet parsing error: {0}")]
    PacketParsing(String),

    /// Error from capture operations
    #[error("Capture error: {0}")]
    Capture(String),

    /// Malformed filter construction
    #[error("Filter error: {0}")]
    Filter(String),

    /// Structural filter decode failed
    #[error("Failed to decode filter: {0}")]
    Decode(String),

    /// A live filter validator refused to produce a verdict
    #[error("Validator error: {0}")]
    Validator(String),
}

/// Result type for the crate
pub type SniffResult<T> = Result<T, SniffError>;
