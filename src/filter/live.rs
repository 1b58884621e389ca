use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::filter::{Filter, PacketFilter};
use crate::models::packet::Packet;
use crate::utils::error::SniffResult;

/// Shared, stateless packet predicate
pub type Validator = Arc<dyn Fn(&Packet) -> SniffResult<bool> + Send + Sync>;

/// A predicate that can be switched off at runtime without removing it from
/// the capture pipeline. While disabled every packet passes.
pub struct LiveFilter {
    validator: Validator,
    disabled: AtomicBool,
}

impl LiveFilter {
    /// Wrap a validator; the filter starts enabled
    pub fn new<F>(validator: F) -> Self
    where
        F: Fn(&Packet) -> SniffResult<bool> + Send + Sync + 'static,
    {
        Self::from_validator(Arc::new(validator))
    }

    pub fn from_validator(validator: Validator) -> Self {
        Self {
            validator,
            disabled: AtomicBool::new(false),
        }
    }

    /// Evaluate a filter tree on every packet
    pub fn from_filter(filter: Filter) -> Self {
        Self::new(move |packet| filter.matches(packet))
    }

    /// Evaluate a positional per-layer filter on every packet
    pub fn from_packet_filter(filter: PacketFilter) -> Self {
        Self::new(move |packet| Ok(filter.matches(packet)))
    }

    pub fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    /// `Ok(true)` while disabled, the validator's verdict otherwise
    pub fn validate(&self, packet: &Packet) -> SniffResult<bool> {
        if !self.is_enabled() {
            return Ok(true);
        }
        (self.validator)(packet)
    }
}

impl From<Filter> for LiveFilter {
    fn from(filter: Filter) -> Self {
        LiveFilter::from_filter(filter)
    }
}

impl Clone for LiveFilter {
    /// The copy shares the validator but toggles independently
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
            disabled: AtomicBool::new(!self.is_enabled()),
        }
    }
}

impl fmt::Debug for LiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFilter")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
