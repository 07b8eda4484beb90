//! Metric instances and their evaluation state.

use super::template::{MetricKind, MetricTemplate};
use crate::types::SymbolId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Stateless definition of a metric, as disclosed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDef {
    /// Metric id, unique within a [`MetricRegistry`](super::MetricRegistry).
    pub id: u32,
    /// Template the metric was created from.
    pub template_id: u32,
    /// Metric name symbol.
    pub name: SymbolId,
    /// Attribute values keyed by attribute symbol.
    pub attrs: BTreeMap<SymbolId, String>,
}

impl MetricDef {
    /// Visits every symbol the definition names.
    pub fn for_each_symbol(&self, visit: &mut impl FnMut(SymbolId)) {
        visit(self.name);
        for key in self.attrs.keys() {
            visit(*key);
        }
    }
}

/// Evaluation state, one variant per [`MetricKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricState {
    /// No state.
    RawData,
    /// Previous reading.
    RawDelta {
        /// Last reading seen.
        last: Option<f64>,
    },
    /// Previous reading and its clock.
    TimedDelta {
        /// Last `(clock, reading)` seen.
        last: Option<(u64, f64)>,
    },
    /// Readings inside the window.
    WindowedRate {
        /// Window length in milliseconds.
        window_ms: u64,
        /// `(clock, reading)` pairs, oldest first.
        history: VecDeque<(u64, f64)>,
    },
    /// Previous busy-time reading and its clock.
    Utilization {
        /// Last `(clock, reading)` seen.
        last: Option<(u64, f64)>,
    },
}

impl MetricState {
    /// Returns the initial state for `kind`.
    #[must_use]
    pub fn for_kind(kind: MetricKind) -> Self {
        match kind {
            MetricKind::RawData => Self::RawData,
            MetricKind::RawDelta => Self::RawDelta { last: None },
            MetricKind::TimedDelta => Self::TimedDelta { last: None },
            MetricKind::WindowedRate { window_ms } => Self::WindowedRate {
                window_ms,
                history: VecDeque::new(),
            },
            MetricKind::Utilization => Self::Utilization { last: None },
        }
    }

    /// Feeds a raw reading taken at `clock` (ms) and returns the unscaled
    /// value, or `None` while there is not enough history.
    ///
    /// A reading below the previous one is treated as a counter reset: the
    /// state restarts from it and nothing is reported.
    pub fn evaluate(&mut self, clock: u64, raw: f64) -> Option<f64> {
        match self {
            Self::RawData => Some(raw),
            Self::RawDelta { last } => {
                let prev = last.replace(raw)?;
                (raw >= prev).then(|| raw - prev)
            }
            Self::TimedDelta { last } => {
                let (prev_clock, prev) = last.replace((clock, raw))?;
                per_second(prev_clock, prev, clock, raw)
            }
            Self::WindowedRate { window_ms, history } => {
                if history.back().is_some_and(|(_, prev)| raw < *prev) {
                    history.clear();
                }
                while history.len() > 1
                    && history
                        .get(1)
                        .is_some_and(|(c, _)| clock.saturating_sub(*c) >= *window_ms)
                {
                    history.pop_front();
                }
                let value = history
                    .front()
                    .and_then(|(c, prev)| per_second(*c, *prev, clock, raw));
                history.push_back((clock, raw));
                value
            }
            Self::Utilization { last } => {
                let (prev_clock, prev) = last.replace((clock, raw))?;
                if clock <= prev_clock || raw < prev {
                    return None;
                }
                Some((raw - prev) / (clock - prev_clock) as f64)
            }
        }
    }
}

fn per_second(prev_clock: u64, prev: f64, clock: u64, raw: f64) -> Option<f64> {
    if clock <= prev_clock || raw < prev {
        return None;
    }
    Some((raw - prev) * 1000.0 / (clock - prev_clock) as f64)
}

/// A metric with its evaluation state.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    def: MetricDef,
    scale: f64,
    state: MetricState,
}

impl Metric {
    /// Creates a metric from its definition and template.
    #[must_use]
    pub fn new(def: MetricDef, template: &MetricTemplate) -> Self {
        Self {
            def,
            scale: template.scale(),
            state: MetricState::for_kind(template.kind),
        }
    }

    /// Returns the metric id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.def.id
    }

    /// Returns the definition.
    #[must_use]
    pub const fn def(&self) -> &MetricDef {
        &self.def
    }

    /// Evaluates a raw reading taken at `clock` (ms) and applies the
    /// template's scale.
    pub fn evaluate(&mut self, clock: u64, raw: f64) -> Option<f64> {
        self.state.evaluate(clock, raw).map(|v| v * self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(kind: MetricKind, multiplier: f64, divider: f64) -> Metric {
        let template = MetricTemplate::new(kind, SymbolId::new(1), SymbolId::new(2))
            .with_scale(multiplier, divider);
        let def = MetricDef {
            id: 1,
            template_id: template.id,
            name: SymbolId::new(3),
            attrs: BTreeMap::new(),
        };
        Metric::new(def, &template)
    }

    #[test]
    fn raw_data_is_scaled() {
        let mut m = metric(MetricKind::RawData, 1.0, 1024.0);
        assert_eq!(m.evaluate(0, 2048.0), Some(2.0));
        assert_eq!(m.evaluate(1, 1024.0), Some(1.0));
    }

    #[test]
    fn raw_delta_needs_two_readings() {
        let mut m = metric(MetricKind::RawDelta, 1.0, 1.0);
        assert_eq!(m.evaluate(0, 10.0), None);
        assert_eq!(m.evaluate(1, 15.0), Some(5.0));
        assert_eq!(m.evaluate(2, 15.0), Some(0.0));
        // Counter reset.
        assert_eq!(m.evaluate(3, 2.0), None);
        assert_eq!(m.evaluate(4, 3.0), Some(1.0));
    }

    #[test]
    fn timed_delta_is_per_second() {
        let mut m = metric(MetricKind::TimedDelta, 1.0, 1.0);
        assert_eq!(m.evaluate(1_000, 0.0), None);
        assert_eq!(m.evaluate(3_000, 50.0), Some(25.0));
        assert_eq!(m.evaluate(3_000, 60.0), None);
    }

    #[test]
    fn windowed_rate_slides() {
        let mut m = metric(MetricKind::WindowedRate { window_ms: 2_000 }, 1.0, 1.0);
        assert_eq!(m.evaluate(0, 0.0), None);
        assert_eq!(m.evaluate(1_000, 10.0), Some(10.0));
        assert_eq!(m.evaluate(2_000, 30.0), Some(15.0));
        // Reading at 0 has left the window; rate is over [1000, 3000].
        assert_eq!(m.evaluate(3_000, 30.0), Some(10.0));
    }

    #[test]
    fn utilization_is_a_fraction() {
        let mut m = metric(MetricKind::Utilization, 100.0, 1.0);
        assert_eq!(m.evaluate(0, 0.0), None);
        assert_eq!(m.evaluate(1_000, 250.0), Some(25.0));
    }
}
