//! Destinations for finished traces.
//!
//! Trace builders hand completed trees to a [`TraceSink`]. Submission is best
//! effort and must never block the instrumented thread: a sink that cannot
//! take an item returns `false` and the item is gone.
//!
//! - [`MemorySink`]: keeps everything in memory
//! - [`AsyncSink`]: bounded queue drained by a dedicated writer thread
//! - [`output`]: byte destinations the writer thread writes streams to

pub mod async_sink;
pub mod memory;
pub mod output;

pub use async_sink::{AsyncSink, SinkOptions, SinkStats};
pub use memory::MemorySink;
pub use output::{NullOutput, RotatingFileOutput, StreamOutput, TraceOutput};

use crate::metrics::PerfRecord;
use crate::trace::TraceRecord;

/// Receiver of completed traces and performance records.
pub trait TraceSink: Send + Sync {
    /// Offers a finished trace tree. Returns false if it was not accepted.
    fn submit(&self, record: TraceRecord) -> bool;

    /// Offers a performance-metric record. Sinks that do not carry metrics
    /// reject it.
    fn submit_perf(&self, _record: PerfRecord) -> bool {
        false
    }
}

/// Sink that accepts and discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl TraceSink for DiscardSink {
    fn submit(&self, _record: TraceRecord) -> bool {
        true
    }

    fn submit_perf(&self, _record: PerfRecord) -> bool {
        true
    }
}
