//! Trace markers.
//!
//! A marker turns the frame it is attached to into the root of a trace. It
//! carries the thresholds that decide whether the finished tree is worth
//! submitting and the policy flags applied while the tree is assembled.

use crate::types::SymbolId;

bitflags::bitflags! {
    /// Marker policy and status flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MarkerFlags: u16 {
        /// Collapse uninformative single-child wrapper frames.
        const DROP_INTERIM = 1 << 0;
        /// Retain every method in the tree regardless of duration.
        const ALL_METHODS = 1 << 1;
        /// Submit the trace even if it is shorter than the minimum time.
        const SUBMIT_TRACE = 1 << 2;
        /// Never submit the trace.
        const DROP_TRACE = 1 << 3;
        /// The record budget was exceeded; the tree is truncated.
        const OVERFLOW_FLAG = 1 << 4;
        /// An error was thrown somewhere inside the trace.
        const ERROR_MARK = 1 << 5;
        /// Call counting was requested for this trace.
        const TRACE_CALLS = 1 << 6;
    }
}

impl MarkerFlags {
    /// Flags describing what happened during the trace rather than how it is
    /// configured. They never pass from a parent marker to a nested one.
    pub const STATUS: Self = Self::ERROR_MARK;

    /// Flags a closing nested marker reports to its parent.
    pub const PROPAGATED: Self = Self::OVERFLOW_FLAG.union(Self::ERROR_MARK);
}

/// Marker attached to the root record of a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceMarker {
    /// Trace name symbol.
    pub trace_id: SymbolId,
    /// Wall-clock start of the trace in milliseconds since the Unix epoch.
    pub clock: u64,
    /// Minimum root duration, in nanoseconds, for the trace to be submitted.
    pub minimum_time: u64,
    /// Live-record budget for the trace.
    pub max_records: usize,
    /// Marker flags.
    pub flags: MarkerFlags,
}

impl TraceMarker {
    /// Creates a marker.
    #[must_use]
    pub const fn new(
        trace_id: SymbolId,
        clock: u64,
        minimum_time: u64,
        max_records: usize,
        flags: MarkerFlags,
    ) -> Self {
        Self {
            trace_id,
            clock,
            minimum_time,
            max_records,
            flags,
        }
    }

    /// Returns true if the marker carries all of `flags`.
    #[must_use]
    pub const fn has_flags(&self, flags: MarkerFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Returns true if the trace should be submitted after running for
    /// `elapsed` nanoseconds.
    #[must_use]
    pub const fn should_submit(&self, elapsed: u64) -> bool {
        if self.flags.contains(MarkerFlags::DROP_TRACE) {
            return false;
        }
        elapsed >= self.minimum_time || self.flags.contains(MarkerFlags::SUBMIT_TRACE)
    }

    /// Returns the configuration a nested marker inherits from this one.
    #[must_use]
    pub const fn inheritable_flags(&self) -> MarkerFlags {
        self.flags.difference(MarkerFlags::STATUS)
    }
}
