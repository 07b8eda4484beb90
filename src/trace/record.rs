//! Completed trace records.

use super::exception::SymbolicException;
use super::marker::TraceMarker;
use crate::types::SymbolId;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

bitflags::bitflags! {
    /// Per-record flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u16 {
        /// The record is the root of a trace and owns a marker.
        const TRACE_BEGIN = 1 << 0;
        /// The record saw the exception of one of its children pass through unchanged.
        const EXCEPTION_PASS = 1 << 1;
        /// The record threw a new exception caused by one of its children's.
        const EXCEPTION_WRAP = 1 << 2;
        /// An uninformative parent of this record was elided.
        const DROPPED_PARENT = 1 << 3;
        /// The trace exceeded its record budget; the tree is truncated.
        const OVERFLOW = 1 << 4;
    }
}

/// An attribute value attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    Str(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// One method activation in a submitted trace tree.
///
/// A record exclusively owns its children. Counters include every descendant
/// activation, whether or not the descendant was retained in the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceRecord {
    /// Class symbol. Never null in a submitted tree.
    pub class_id: SymbolId,
    /// Method symbol.
    pub method_id: SymbolId,
    /// Signature symbol.
    pub signature_id: SymbolId,
    /// Activation duration in nanoseconds.
    pub time: u64,
    /// Activations of this method plus all descendants.
    pub calls: u64,
    /// Errors thrown by this method or any descendant.
    pub errors: u64,
    /// Record flags.
    pub flags: RecordFlags,
    /// Exception thrown out of this activation, if any.
    pub exception: Option<Arc<SymbolicException>>,
    /// Attributes keyed by attribute-name symbol.
    pub attrs: BTreeMap<SymbolId, AttrValue>,
    /// Retained child activations in call order.
    pub children: Vec<TraceRecord>,
    /// Marker, present only on trace roots.
    pub marker: Option<TraceMarker>,
}

impl TraceRecord {
    /// Creates a leaf record.
    #[must_use]
    pub fn new(class_id: SymbolId, method_id: SymbolId, signature_id: SymbolId) -> Self {
        Self {
            class_id,
            method_id,
            signature_id,
            ..Self::default()
        }
    }

    /// Returns true if this record does not hold an activation.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.class_id.is_null()
    }

    /// Returns true if the record carries all of `flags`.
    #[must_use]
    pub const fn has_flags(&self, flags: RecordFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Returns the number of records in this subtree, including this one.
    #[must_use]
    pub fn record_count(&self) -> usize {
        1 + self.children.iter().map(Self::record_count).sum::<usize>()
    }

    /// Returns the depth of the subtree (a leaf has depth 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }

    /// Visits every record of the subtree in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Returns the attribute stored under `key`.
    #[must_use]
    pub fn attr(&self, key: SymbolId) -> Option<&AttrValue> {
        self.attrs.get(&key)
    }
}
