//! In-memory sink.

use super::TraceSink;
use crate::metrics::PerfRecord;
use crate::trace::TraceRecord;
use parking_lot::Mutex;

/// Collects submitted items in memory.
///
/// An optional capacity makes it reject traces once full, which is how tests
/// exercise a builder's rejection path.
#[derive(Debug, Default)]
pub struct MemorySink {
    traces: Mutex<Vec<TraceRecord>>,
    perf: Mutex<Vec<PerfRecord>>,
    capacity: Option<usize>,
}

impl MemorySink {
    /// Creates an unbounded sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that accepts at most `capacity` traces.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Returns a copy of the collected traces.
    pub fn traces(&self) -> Vec<TraceRecord> {
        self.traces.lock().clone()
    }

    /// Removes and returns the collected traces.
    pub fn take(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.traces.lock())
    }

    /// Removes and returns the collected performance records.
    pub fn take_perf(&self) -> Vec<PerfRecord> {
        std::mem::take(&mut *self.perf.lock())
    }

    /// Returns the number of collected traces.
    pub fn len(&self) -> usize {
        self.traces.lock().len()
    }

    /// Returns true if no trace was collected.
    pub fn is_empty(&self) -> bool {
        self.traces.lock().is_empty()
    }
}

impl TraceSink for MemorySink {
    fn submit(&self, record: TraceRecord) -> bool {
        let mut traces = self.traces.lock();
        if self.capacity.is_some_and(|cap| traces.len() >= cap) {
            return false;
        }
        traces.push(record);
        true
    }

    fn submit_perf(&self, record: PerfRecord) -> bool {
        self.perf.lock().push(record);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolId;

    fn record(class: u32) -> TraceRecord {
        TraceRecord::new(SymbolId::new(class), SymbolId::new(1), SymbolId::new(2))
    }

    #[test]
    fn collects_in_order() {
        let sink = MemorySink::new();
        assert!(sink.submit(record(3)));
        assert!(sink.submit(record(4)));
        assert_eq!(sink.len(), 2);
        let taken = sink.take();
        assert_eq!(taken[1].class_id, SymbolId::new(4));
        assert!(sink.is_empty());
    }

    #[test]
    fn bounded_rejects_when_full() {
        let sink = MemorySink::bounded(1);
        assert!(sink.submit(record(3)));
        assert!(!sink.submit(record(4)));
        assert_eq!(sink.traces().len(), 1);
    }

    #[test]
    fn collects_perf() {
        let sink = MemorySink::new();
        assert!(sink.submit_perf(PerfRecord::new(10, SymbolId::new(1))));
        assert_eq!(sink.take_perf().len(), 1);
    }
}
