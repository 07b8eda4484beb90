//! Performance records and the scanner that produces them.

use super::metric::{Metric, MetricDef};
use crate::types::SymbolId;
use std::collections::BTreeMap;

/// One evaluated metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfSample {
    /// Metric the value belongs to.
    pub metric_id: u32,
    /// Evaluated value.
    pub value: f64,
    /// Per-sample attributes keyed by attribute symbol.
    pub attrs: BTreeMap<SymbolId, String>,
}

impl PerfSample {
    /// Creates a sample without attributes.
    #[must_use]
    pub const fn new(metric_id: u32, value: f64) -> Self {
        Self {
            metric_id,
            value,
            attrs: BTreeMap::new(),
        }
    }
}

/// A batch of samples taken by one scanner at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfRecord {
    /// Wall-clock time of the scan in milliseconds since the Unix epoch.
    pub clock: u64,
    /// Scanner name symbol.
    pub scanner_id: SymbolId,
    /// Samples, in metric order.
    pub samples: Vec<PerfSample>,
}

impl PerfRecord {
    /// Creates an empty record.
    #[must_use]
    pub const fn new(clock: u64, scanner_id: SymbolId) -> Self {
        Self {
            clock,
            scanner_id,
            samples: Vec::new(),
        }
    }

    /// Returns true if the record holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A named group of metrics read together.
#[derive(Debug, Clone)]
pub struct Scanner {
    id: SymbolId,
    metrics: Vec<Metric>,
}

impl Scanner {
    /// Creates a scanner with no metrics.
    #[must_use]
    pub const fn new(id: SymbolId) -> Self {
        Self {
            id,
            metrics: Vec::new(),
        }
    }

    /// Adds a metric.
    pub fn add(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    /// Returns the number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the scanner has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Reads every metric through `read` and evaluates the readings.
    ///
    /// Metrics without a reading, or without enough history to produce a
    /// value, are left out of the record.
    pub fn scan(
        &mut self,
        clock: u64,
        mut read: impl FnMut(&MetricDef) -> Option<f64>,
    ) -> PerfRecord {
        let mut record = PerfRecord::new(clock, self.id);
        for metric in &mut self.metrics {
            let Some(raw) = read(metric.def()) else {
                continue;
            };
            if let Some(value) = metric.evaluate(clock, raw) {
                record.samples.push(PerfSample::new(metric.id(), value));
            }
        }
        record
    }
}
