//! Composable packet filters.
//!
//! A [`Filter`] is a boolean expression tree over packet predicates. Trees are
//! built with [`invert`], [`union`] and [`intersect`] (or `!`, `|` and `&`),
//! rendered to capture-filter text with [`Filter::format`] and evaluated
//! against parsed packets with [`Filter::matches`].
//!
//! ```
//! use rustsniff::filter::{Filter, ValueFilter};
//!
//! let web = Filter::from(ValueFilter::new().with_types(["TCP"]).with_destination_values([80u16]));
//! let dns = Filter::static_filter("udp port 53");
//! assert_eq!((web | dns).format(), "(((tcp) and (dst port 80)) or udp port 53)");
//! ```

pub mod codec;
mod format;
pub mod live;
pub mod packet_filter;
pub mod value;

use log::{debug, log_enabled, trace, Level};
use pcap::{BpfProgram, Capture, Linktype};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::models::packet::Packet;
use crate::utils::error::{SniffError, SniffResult};
use format::{embed, join_group};

pub use codec::{dump, load, load_file, FilterSource};
pub use live::LiveFilter;
pub use packet_filter::PacketFilter;
pub use value::ValueFilter;

/// A node in a boolean expression tree over packet predicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Filter {
    /// Literal capture-filter expression, evaluated by libpcap
    Static(String),

    /// Structured per-layer value predicate
    Value(ValueFilter),

    /// Matches when any child matches
    Union(Vec<Filter>),

    /// Matches when every child matches
    Intersection(Vec<Filter>),

    /// Rendered as `(not child)`
    Negation(Box<Filter>),
}

impl Filter {
    pub fn static_filter(expression: impl Into<String>) -> Self {
        Filter::Static(expression.into())
    }

    /// Union of a non-empty list of filters, kept as given
    pub fn any_of(children: Vec<Filter>) -> SniffResult<Self> {
        if children.is_empty() {
            return Err(SniffError::Filter("a union needs at least one filter".to_string()));
        }
        Ok(Filter::Union(children))
    }

    /// Intersection of a non-empty list of filters, kept as given
    pub fn all_of(children: Vec<Filter>) -> SniffResult<Self> {
        if children.is_empty() {
            return Err(SniffError::Filter(
                "an intersection needs at least one filter".to_string(),
            ));
        }
        Ok(Filter::Intersection(children))
    }

    /// Negate, cancelling an existing negation
    pub fn invert(self) -> Self {
        match self {
            Filter::Negation(child) => *child,
            other => Filter::Negation(Box::new(other)),
        }
    }

    /// OR with another filter, splicing the children of top-level unions
    pub fn union(self, other: Filter) -> Self {
        let mut children = Self::splice(self, |f| matches!(f, Filter::Union(_)));
        children.extend(Self::splice(other, |f| matches!(f, Filter::Union(_))));
        Filter::Union(children)
    }

    /// AND with another filter, splicing the children of top-level intersections
    pub fn intersect(self, other: Filter) -> Self {
        let mut children = Self::splice(self, |f| matches!(f, Filter::Intersection(_)));
        children.extend(Self::splice(other, |f| matches!(f, Filter::Intersection(_))));
        Filter::Intersection(children)
    }

    fn splice(filter: Filter, same_kind: fn(&Filter) -> bool) -> Vec<Filter> {
        if !same_kind(&filter) {
            return vec![filter];
        }
        match filter {
            Filter::Union(children) | Filter::Intersection(children) => children,
            other => vec![other],
        }
    }

    /// Render as capture-filter text; a filter without clauses renders empty
    pub fn format(&self) -> String {
        match self {
            Filter::Static(expression) => expression.clone(),
            Filter::Value(value) => value.format(),
            Filter::Union(children) => join_group(children.iter().map(Filter::format), "or"),
            Filter::Intersection(children) => {
                join_group(children.iter().map(Filter::format), "and")
            }
            Filter::Negation(child) => {
                let inner = child.format();
                if inner.is_empty() {
                    inner
                } else {
                    format!("(not {})", embed(inner))
                }
            }
        }
    }

    /// Evaluate against a parsed packet.
    ///
    /// Only static filters can fail, when libpcap rejects the expression.
    pub fn matches(&self, packet: &Packet) -> SniffResult<bool> {
        match self {
            Filter::Static(expression) => static_matches(expression, packet),
            Filter::Value(value) => Ok(value.matches(packet)),
            Filter::Union(children) => {
                for child in children {
                    if child.matches(packet)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Intersection(children) => {
                for child in children {
                    if !child.matches(packet)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            // Negation only shows up in the rendered text; the verdict is
            // the child's own.
            Filter::Negation(child) => child.matches(packet),
        }
    }

    /// Reject empty unions and intersections anywhere in the tree
    pub fn validate(&self) -> SniffResult<()> {
        match self {
            Filter::Static(_) | Filter::Value(_) => Ok(()),
            Filter::Union(children) | Filter::Intersection(children) => {
                if children.is_empty() {
                    let kind = match self {
                        Filter::Union(_) => "union",
                        _ => "intersection",
                    };
                    return Err(SniffError::Decode(format!("{} has no children", kind)));
                }
                children.iter().try_for_each(Filter::validate)
            }
            Filter::Negation(child) => child.validate(),
        }
    }
}

const MAX_CACHED_PROGRAMS: usize = 64;

thread_local! {
    /// Compiled static expressions, reused across packets on this thread
    static PROGRAMS: RefCell<HashMap<String, BpfProgram>> = RefCell::new(HashMap::new());
}

/// Run a literal capture-filter expression over the packet's raw frame.
///
/// Each expression is compiled once per thread; failed compilations are
/// not cached.
fn static_matches(expression: &str, packet: &Packet) -> SniffResult<bool> {
    let matched = PROGRAMS.with(|programs| -> SniffResult<bool> {
        let mut programs = programs.borrow_mut();
        if !programs.contains_key(expression) {
            if programs.len() >= MAX_CACHED_PROGRAMS {
                programs.clear();
            }
            let capture = Capture::dead(Linktype::ETHERNET)?;
            let program = capture.compile(expression, true)?;
            debug!("Compiled static filter '{}'", expression);
            programs.insert(expression.to_string(), program);
        }
        Ok(programs
            .get(expression)
            .map_or(false, |program| program.filter(&packet.raw_data)))
    })?;

    if log_enabled!(Level::Trace) {
        trace!(
            "Static filter '{}' on packet {} ({} bytes): {}",
            expression,
            packet.id,
            packet.raw_data.len(),
            matched
        );
    }
    Ok(matched)
}

/// Negate `filter`, cancelling double negation
pub fn invert(filter: Filter) -> Filter {
    filter.invert()
}

/// OR two filters, flattening top-level unions
pub fn union(left: Filter, right: Filter) -> Filter {
    left.union(right)
}

/// AND two filters, flattening top-level intersections
pub fn intersect(left: Filter, right: Filter) -> Filter {
    left.intersect(right)
}

impl From<ValueFilter> for Filter {
    fn from(value: ValueFilter) -> Self {
        Filter::Value(value)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        self.invert()
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.union(rhs)
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        self.intersect(rhs)
    }
}

/// Combine optional clauses with AND, skipping absent ones
pub fn intersect_all<I>(filters: I) -> Option<Filter>
where
    I: IntoIterator<Item = Filter>,
{
    let combined = filters.into_iter().reduce(intersect);
    if let Some(filter) = &combined {
        debug!("Combined filter: {}", filter);
    }
    combined
}
