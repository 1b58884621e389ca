use serde::{Deserialize, Serialize};

use crate::filter::format::join_group;
use crate::filter::ValueFilter;
use crate::models::packet::Packet;

/// Positional filter: entry `i` constrains layer `i` of the packet.
///
/// `None` entries accept any layer, and layers beyond the end of the list
/// are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketFilter {
    pub layers: Vec<Option<ValueFilter>>,
}

impl PacketFilter {
    pub fn new(layers: Vec<Option<ValueFilter>>) -> Self {
        Self { layers }
    }

    /// Append a constraint for the next layer position
    pub fn then(mut self, layer: Option<ValueFilter>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn matches(&self, packet: &Packet) -> bool {
        packet
            .layers
            .iter()
            .zip(&self.layers)
            .all(|(layer, filter)| filter.as_ref().map_or(true, |f| f.matches_layer(layer)))
    }

    /// AND of the present layer filters' text
    pub fn format(&self) -> String {
        join_group(self.layers.iter().flatten().map(ValueFilter::format), "and")
    }
}
