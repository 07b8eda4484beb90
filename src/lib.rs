//! Calltrace: per-thread call-tree tracing core.
//!
//! # Overview
//!
//! Instrumented code reports method activations (enter, return, error,
//! attributes and trace-boundary markers) to a per-thread
//! [`TraceBuilder`]. The builder assembles them into bounded call trees and
//! hands finished trees to a [`TraceSink`]. The [`AsyncSink`] encodes trees
//! and performance records into a compact stream on a background thread,
//! sending every symbol definition once per stream.
//!
//! # Core Guarantees
//!
//! - **Bounded trees**: every trace has a record budget; frames past it are
//!   counted and rolled up but never kept
//! - **Tolerant of bad input**: unbalanced or out-of-order events are logged,
//!   counted and healed, never a panic
//! - **Never blocks the application**: sink submission is a lock-free push;
//!   a full queue drops the item
//! - **Self-contained streams**: each stream, rotated file or reconnection
//!   starts a fresh disclosure scope
//!
//! # Module Structure
//!
//! - [`types`]: Symbol ids and timestamps
//! - [`symbol`]: Concurrent name interning
//! - [`trace`](mod@trace): Trace data model and the per-thread builder
//! - [`metrics`]: Metric templates, evaluation and perf records
//! - [`wire`]: Stream format, writer and reader
//! - [`sink`]: Sinks and byte outputs
//! - [`tracer`]: Shared state and builder factory
//! - [`config`]: Configuration and live tunables
//! - [`error`](mod@error): Error types
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod sink;
pub mod symbol;
pub mod trace;
pub mod tracer;
pub mod tracing_compat;
pub mod types;
pub mod wire;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use config::{OutputConfig, SinkConfig, TracerConfig, Tunables};
pub use error::{Error, Result};
pub use metrics::{MetricKind, MetricRegistry, MetricTemplate, PerfRecord, Scanner};
pub use sink::{AsyncSink, MemorySink, SinkOptions, SinkStats, TraceOutput, TraceSink};
pub use symbol::SymbolRegistry;
pub use trace::{
    AttrValue, BuilderStats, MarkerFlags, RecordFlags, SymbolicException, Throwable,
    TraceBuilder, TraceMarker, TraceRecord,
};
pub use tracer::Tracer;
pub use types::{SymbolId, Time};
pub use wire::{Framing, TraceItem, TraceReader, TraceWriter};
