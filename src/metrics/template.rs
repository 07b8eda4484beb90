//! Metric templates.

use crate::types::SymbolId;
use serde::{Deserialize, Serialize};

/// How raw readings of a metric turn into reported values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Report the reading as is.
    RawData,
    /// Report the change since the previous reading.
    RawDelta,
    /// Report the change per second since the previous reading.
    TimedDelta,
    /// Report the change per second over a sliding window.
    WindowedRate {
        /// Window length in milliseconds.
        window_ms: u64,
    },
    /// Report the share of wall time spent busy. Readings are cumulative busy
    /// milliseconds.
    Utilization,
}

/// Shared description of a family of metrics.
///
/// Every [`Metric`](super::Metric) is created from a template, which fixes its
/// kind, its unit and the scale applied to evaluated values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTemplate {
    /// Template id, unique within a [`MetricRegistry`](super::MetricRegistry).
    pub id: u32,
    /// Evaluation kind.
    pub kind: MetricKind,
    /// Template name symbol.
    pub name: SymbolId,
    /// Unit symbol.
    pub units: SymbolId,
    /// Scale numerator.
    pub multiplier: f64,
    /// Scale denominator.
    pub divider: f64,
    /// Attribute keys every metric of this template carries.
    pub attrs: Vec<SymbolId>,
}

impl MetricTemplate {
    /// Creates an unscaled template without attributes. The id is assigned on
    /// registration.
    #[must_use]
    pub fn new(kind: MetricKind, name: SymbolId, units: SymbolId) -> Self {
        Self {
            id: 0,
            kind,
            name,
            units,
            multiplier: 1.0,
            divider: 1.0,
            attrs: Vec::new(),
        }
    }

    /// Sets the scale applied to evaluated values.
    #[must_use]
    pub fn with_scale(mut self, multiplier: f64, divider: f64) -> Self {
        self.multiplier = multiplier;
        self.divider = divider;
        self
    }

    /// Adds an attribute key.
    #[must_use]
    pub fn with_attr(mut self, key: SymbolId) -> Self {
        self.attrs.push(key);
        self
    }

    /// Returns the combined scale factor. A zero divider disables scaling.
    #[must_use]
    pub fn scale(&self) -> f64 {
        if self.divider == 0.0 {
            self.multiplier
        } else {
            self.multiplier / self.divider
        }
    }

    /// Visits every symbol the template names.
    pub fn for_each_symbol(&self, visit: &mut impl FnMut(SymbolId)) {
        visit(self.name);
        visit(self.units);
        for key in &self.attrs {
            visit(*key);
        }
    }
}
