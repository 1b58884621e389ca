//! Structural dump/load of filter trees.
//!
//! A dumped filter is a JSON object tagged by variant:
//!
//! ```json
//! {"type": "union", "data": [
//!     {"type": "static", "data": "udp port 53"},
//!     {"type": "value", "data": {"types": ["TCP"], "destination_values": [80]}}
//! ]}
//! ```

use log::debug;
use std::fs;
use std::path::Path;

use crate::filter::{Filter, ValueFilter};
use crate::utils::error::{SniffError, SniffResult};

/// Anything [`load`] accepts
#[derive(Debug, Clone)]
pub enum FilterSource {
    /// Already a filter; passed through
    Filter(Filter),

    /// Capture-filter text; becomes a static filter
    Text(String),

    /// Structural form produced by [`dump`]
    Json(serde_json::Value),
}

impl From<Filter> for FilterSource {
    fn from(filter: Filter) -> Self {
        FilterSource::Filter(filter)
    }
}

impl From<ValueFilter> for FilterSource {
    fn from(filter: ValueFilter) -> Self {
        FilterSource::Filter(Filter::Value(filter))
    }
}

impl From<&str> for FilterSource {
    fn from(text: &str) -> Self {
        FilterSource::Text(text.to_string())
    }
}

impl From<String> for FilterSource {
    fn from(text: String) -> Self {
        FilterSource::Text(text)
    }
}

impl From<serde_json::Value> for FilterSource {
    fn from(value: serde_json::Value) -> Self {
        FilterSource::Json(value)
    }
}

/// Dump a filter tree field by field
pub fn dump(filter: &Filter) -> SniffResult<serde_json::Value> {
    Ok(serde_json::to_value(filter)?)
}

/// Build a filter from a filter, capture-filter text, or a dumped tree
pub fn load(source: impl Into<FilterSource>) -> SniffResult<Filter> {
    match source.into() {
        FilterSource::Filter(filter) => Ok(filter),
        FilterSource::Text(text) => Ok(Filter::Static(text)),
        FilterSource::Json(serde_json::Value::String(text)) => Ok(Filter::Static(text)),
        FilterSource::Json(value) => {
            let filter: Filter =
                serde_json::from_value(value).map_err(|e| SniffError::Decode(e.to_string()))?;
            filter.validate()?;
            Ok(filter)
        }
    }
}

/// Load a dumped filter tree from a JSON file
pub fn load_file(path: impl AsRef<Path>) -> SniffResult<Filter> {
    let path = path.as_ref();
    debug!("Loading filter from {}", path.display());
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    load(value)
}
