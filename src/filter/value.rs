use log::{log_enabled, trace, Level};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::filter::format::join_categories;
use crate::models::packet::{LayerFields, Packet, Value};

/// Leaf predicate matching per-layer values across a packet's layer stack.
///
/// Every field is optional; an absent or empty field places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueFilter {
    /// Layer type names, compared case-insensitively (`TCP`, `IP`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,

    /// Endpoint keywords, `host` and/or `port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,

    /// Values accepted on either side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,

    /// Values accepted as source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_values: Option<Vec<Value>>,

    /// Values accepted as destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_values: Option<Vec<Value>>,

    /// Arbitrary attribute name to accepted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Vec<Value>>>,
}

fn items<T>(field: &Option<Vec<T>>) -> &[T] {
    field.as_deref().unwrap_or(&[])
}

fn collect<T, I>(items: I) -> Option<Vec<T>>
where
    I: IntoIterator,
    I::Item: Into<T>,
{
    Some(items.into_iter().map(Into::into).collect())
}

impl ValueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = collect(types);
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = collect(names);
        self
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.values = collect(values);
        self
    }

    pub fn with_source_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.source_values = collect(values);
        self
    }

    pub fn with_destination_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.destination_values = collect(values);
        self
    }

    /// Require `name` to be present with one of `values`
    pub fn with_attribute<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// True when no field constrains anything
    pub fn is_empty(&self) -> bool {
        items(&self.types).is_empty()
            && items(&self.values).is_empty()
            && items(&self.source_values).is_empty()
            && items(&self.destination_values).is_empty()
            && self.attributes.as_ref().map_or(true, BTreeMap::is_empty)
    }

    /// Render as capture-filter text.
    ///
    /// Categories come out in the order types, plain values, source values,
    /// destination values. `attributes` have no textual form.
    pub fn format(&self) -> String {
        let types = items(&self.types)
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        join_categories(vec![
            types,
            self.value_tokens(None, &self.values),
            self.value_tokens(Some("src"), &self.source_values),
            self.value_tokens(Some("dst"), &self.destination_values),
        ])
    }

    fn value_tokens(&self, qualifier: Option<&str>, values: &Option<Vec<Value>>) -> Vec<String> {
        let names = items(&self.names);
        let mut tokens = Vec::new();
        for value in items(values) {
            let keywords: Vec<&str> = if names.is_empty() {
                vec![value.keyword()]
            } else {
                names.iter().map(String::as_str).collect()
            };
            for keyword in keywords {
                tokens.push(match qualifier {
                    Some(qualifier) => format!("{} {} {}", qualifier, keyword, value),
                    None => format!("{} {}", keyword, value),
                });
            }
        }
        tokens
    }

    /// Check a single layer against every constraint.
    ///
    /// A layer whose type is not listed in `types` fails outright.
    pub fn matches_layer<L: LayerFields + ?Sized>(&self, layer: &L) -> bool {
        self.type_allows(layer) && self.attributes_match(layer) && self.endpoints_match(layer)
    }

    /// Check a packet, outermost layer first.
    ///
    /// With `types` set only layers of those types are inspected and at least
    /// one must be present; otherwise every layer is inspected. Layers lacking
    /// endpoints are skipped by the endpoint check.
    pub fn matches(&self, packet: &Packet) -> bool {
        let mut inspected = 0usize;
        for layer in &packet.layers {
            if !self.type_allows(layer) {
                continue;
            }
            inspected += 1;
            if !(self.attributes_match(layer) && self.endpoints_match(layer)) {
                if log_enabled!(Level::Trace) {
                    trace!("Value filter rejected packet {} at layer {}", packet.id, layer.name);
                }
                return false;
            }
        }
        items(&self.types).is_empty() || inspected > 0
    }

    fn type_allows<L: LayerFields + ?Sized>(&self, layer: &L) -> bool {
        let types = items(&self.types);
        types.is_empty()
            || types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(layer.type_name()))
    }

    fn attributes_match<L: LayerFields + ?Sized>(&self, layer: &L) -> bool {
        self.attributes.iter().flatten().all(|(name, accepted)| {
            layer
                .attribute(name)
                .map_or(false, |actual| accepted.contains(actual))
        })
    }

    fn endpoints_match<L: LayerFields + ?Sized>(&self, layer: &L) -> bool {
        let Some(endpoints) = layer.endpoints() else {
            return true;
        };

        let names = items(&self.names);
        if !names.is_empty()
            && !names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(endpoints.keyword()))
        {
            return true;
        }

        accepts(&self.values, &self.source_values, endpoints.source())
            && accepts(&self.values, &self.destination_values, endpoints.destination())
    }
}

/// `actual` must be among `plain ∪ qualified`, counting only values of the
/// same kind; an empty accepted set allows anything.
fn accepts(plain: &Option<Vec<Value>>, qualified: &Option<Vec<Value>>, actual: &Value) -> bool {
    let mut accepted = items(plain)
        .iter()
        .chain(items(qualified))
        .filter(|v| v.kind() == actual.kind())
        .peekable();

    if accepted.peek().is_none() {
        return true;
    }
    accepted.any(|v| v == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packet::Layer;
    use std::net::Ipv4Addr;

    fn tcp_packet(dport: u16) -> Packet {
        Packet::from_layers(vec![
            Layer::new("Ether")
                .with("src", "00:11:22:33:44:55")
                .with("dst", "66:77:88:99:aa:bb"),
            Layer::new("IP")
                .with("src", Ipv4Addr::new(10, 0, 0, 1))
                .with("dst", Ipv4Addr::new(10, 0, 0, 2))
                .with("ttl", 64u8),
            Layer::new("TCP").with("sport", 40000u16).with("dport", dport),
        ])
    }

    fn udp_packet() -> Packet {
        Packet::from_layers(vec![
            Layer::new("IP")
                .with("src", Ipv4Addr::new(10, 0, 0, 9))
                .with("dst", Ipv4Addr::new(8, 8, 8, 8)),
            Layer::new("UDP").with("sport", 5353u16).with("dport", 53u16),
        ])
    }

    #[test]
    fn test_empty_filter() {
        let filter = ValueFilter::new();
        assert!(filter.is_empty());
        assert_eq!(filter.format(), "");
        assert!(filter.matches(&tcp_packet(80)));
        assert!(filter.matches(&udp_packet()));
        assert!(filter.matches(&Packet::from_layers(vec![])));
    }

    #[test]
    fn test_tcp_destination_port() {
        let filter = ValueFilter::new()
            .with_types(["TCP"])
            .with_destination_values([80u16]);

        assert!(filter.matches(&tcp_packet(80)));
        assert!(!filter.matches(&tcp_packet(443)));
        assert!(!filter.matches(&udp_packet()));
        assert_eq!(filter.format(), "(tcp) and (dst port 80)");
    }

    #[test]
    fn test_format_categories() {
        let filter = ValueFilter::new()
            .with_types(["TCP", "udp"])
            .with_values(["10.0.0.1"])
            .with_source_values([1024u16, 1025u16]);
        assert_eq!(
            filter.format(),
            "(tcp or udp) and (host 10.0.0.1) and (src port 1024 or src port 1025)"
        );

        let single = ValueFilter::new().with_types(["ARP"]);
        assert_eq!(single.format(), "arp");

        let named = ValueFilter::new()
            .with_names(["net"])
            .with_destination_values(["192.168.0.0/16"]);
        assert_eq!(named.format(), "dst net 192.168.0.0/16");
    }

    #[test]
    fn test_attributes_are_not_formatted() {
        let filter = ValueFilter::new().with_attribute("ttl", [64u8]);
        assert_eq!(filter.format(), "");
        assert!(!filter.is_empty());
    }

    #[test]
    fn test_type_match_is_case_insensitive() {
        let filter = ValueFilter::new().with_types(["tcp"]);
        assert!(filter.matches(&tcp_packet(22)));
        assert!(!filter.matches(&udp_packet()));
    }

    #[test]
    fn test_source_and_destination_addresses() {
        let filter = ValueFilter::new()
            .with_source_values(["10.0.0.1"])
            .with_destination_values(["10.0.0.2"]);
        assert!(filter.matches(&tcp_packet(80)));

        let reversed = ValueFilter::new()
            .with_source_values(["10.0.0.2"])
            .with_destination_values(["10.0.0.1"]);
        assert!(!reversed.matches(&tcp_packet(80)));
    }

    #[test]
    fn test_plain_values_apply_to_both_sides() {
        let filter = ValueFilter::new().with_values(["10.0.0.1"]);
        assert!(!filter.matches(&tcp_packet(80)));

        let both = ValueFilter::new().with_values(["10.0.0.1", "10.0.0.2"]);
        assert!(both.matches(&tcp_packet(80)));
    }

    #[test]
    fn test_names_restrict_endpoint_kind() {
        // The port constraint is ignored when only hosts are inspected
        let filter = ValueFilter::new()
            .with_names(["host"])
            .with_destination_values([443u16]);
        assert!(filter.matches(&tcp_packet(80)));

        let ports = ValueFilter::new()
            .with_names(["port"])
            .with_destination_values([443u16]);
        assert!(!ports.matches(&tcp_packet(80)));
    }

    #[test]
    fn test_attributes() {
        let filter = ValueFilter::new()
            .with_types(["IP"])
            .with_attribute("ttl", [64u8, 128u8]);
        assert!(filter.matches(&tcp_packet(80)));

        let wrong_ttl = ValueFilter::new()
            .with_types(["IP"])
            .with_attribute("ttl", [1u8]);
        assert!(!wrong_ttl.matches(&tcp_packet(80)));

        // Ether has no ttl, so an untyped attribute filter fails there
        let untyped = ValueFilter::new().with_attribute("ttl", [64u8]);
        assert!(!untyped.matches(&tcp_packet(80)));
    }

    #[test]
    fn test_matches_layer_rejects_other_types() {
        let filter = ValueFilter::new().with_types(["TCP"]);
        let packet = tcp_packet(80);
        assert!(!filter.matches_layer(&packet.layers[0]));
        assert!(filter.matches_layer(&packet.layers[2]));
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let filter = ValueFilter::new()
            .with_types(["TCP"])
            .with_destination_values([80u16]);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"types": ["TCP"], "destination_values": [80]})
        );

        let unknown = serde_json::json!({"types": ["TCP"], "port": 80});
        assert!(serde_json::from_value::<ValueFilter>(unknown).is_err());
    }
}
