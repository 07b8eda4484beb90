//! Performance metrics.
//!
//! Metrics are grouped by [`MetricTemplate`], which fixes how raw readings are
//! evaluated ([`MetricKind`]) and scaled. A [`Scanner`] reads its metrics
//! periodically and produces a [`PerfRecord`], which travels through the same
//! sink and stream as traces.

pub mod metric;
pub mod registry;
pub mod sample;
pub mod template;

pub use metric::{Metric, MetricDef, MetricState};
pub use registry::MetricRegistry;
pub use sample::{PerfRecord, PerfSample, Scanner};
pub use template::{MetricKind, MetricTemplate};
