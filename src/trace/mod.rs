//! Call-tree construction.
//!
//! A [`TraceBuilder`] consumes method-activation events for one thread and
//! assembles them into bounded [`TraceRecord`] trees. Trees whose root carries
//! a [`TraceMarker`] are handed to a [`TraceSink`](crate::sink::TraceSink)
//! when the root closes.
//!
//! - [`record`]: Submitted tree nodes and attribute values
//! - [`marker`]: Trace-root markers and their flags
//! - [`exception`]: Live and symbolic exceptions
//! - [`arena`]: Frame slots used while a tree is under construction
//! - [`builder`]: The per-thread state machine

pub mod arena;
pub mod builder;
pub mod exception;
pub mod marker;
pub mod record;

pub use arena::{RecordArena, RecordHandle};
pub use builder::{BuilderStats, TraceBuilder};
pub use exception::{ExceptionInterner, StackFrame, SymbolicException, Throwable, ThrownFrame};
pub use marker::{MarkerFlags, TraceMarker};
pub use record::{AttrValue, RecordFlags, TraceRecord};
