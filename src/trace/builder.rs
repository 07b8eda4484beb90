//! Per-thread call-tree builder.
//!
//! A [`TraceBuilder`] is the execution context for one instrumented thread.
//! Every event is an explicit method call on it, so the builder can be driven
//! directly from tests without thread-local state.
//!
//! # Frames
//!
//! The builder keeps a stack of open frames in a [`RecordArena`]. The bottom
//! frame has no parent and is never removed: when it closes it is emptied and
//! reused. A frame that closes without being kept anywhere is emptied in place
//! and stays on top so the next `enter` reuses it; at most one such empty frame
//! exists, and it is always the top.
//!
//! # Budget
//!
//! Each trace has a record budget. The live-record count of a trace is the
//! number of arena slots in use above the trace's base, so it covers retained
//! children as well as the open stack. A frame entered while the count is over
//! budget is still counted and rolled up, but it is never kept as a child.
//!
//! # Event protocol
//!
//! Instrumented code is expected to send balanced `enter` / `return_` or
//! `error` pairs, `attr` while a frame is open and at most one `begin` per
//! frame. Anything else is logged, counted in [`BuilderStats`] and healed;
//! the builder never panics on bad input.

use super::arena::{RecordArena, RecordHandle};
use super::exception::{ExceptionInterner, Throwable};
use super::marker::{MarkerFlags, TraceMarker};
use super::record::{AttrValue, RecordFlags};
use crate::config::Tunables;
use crate::sink::TraceSink;
use crate::symbol::{SymbolRegistry, UNKNOWN_SYMBOL_NAME};
use crate::tracing_compat::{debug, warn};
use crate::types::{SymbolId, Time};
use core::fmt;
use std::sync::Arc;

/// Counters of what a builder did and what it had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderStats {
    /// Traces accepted by the sink.
    pub submitted: u64,
    /// Traces the sink refused.
    pub rejected: u64,
    /// Traces closed below their minimum time or marked `DROP_TRACE`.
    pub dropped_traces: u64,
    /// Close events that found no open frame.
    pub extra_closes: u64,
    /// `begin` on a frame that already owns a marker.
    pub duplicate_begins: u64,
    /// `begin` with no frame open.
    pub begins_without_frame: u64,
    /// `attr` with no frame open.
    pub orphan_attrs: u64,
    /// `enter` with the null class symbol.
    pub unnamed_enters: u64,
    /// Marker stack found out of step with the closing frame.
    pub marker_mismatches: u64,
    /// Traces that ran out of record budget.
    pub overflows: u64,
}

#[derive(Debug)]
struct MarkerState {
    marker: TraceMarker,
    /// Frame the marker is attached to.
    root: RecordHandle,
    /// Arena slots in use before the trace started.
    base: usize,
}

/// Assembles method-activation events into trace trees.
pub struct TraceBuilder {
    registry: Arc<SymbolRegistry>,
    tunables: Arc<Tunables>,
    sink: Arc<dyn TraceSink>,
    arena: RecordArena,
    top: RecordHandle,
    markers: Vec<MarkerState>,
    exceptions: ExceptionInterner,
    stats: BuilderStats,
}

impl TraceBuilder {
    /// Creates a builder with an empty stack.
    pub fn new(
        registry: Arc<SymbolRegistry>,
        tunables: Arc<Tunables>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let mut arena = RecordArena::new();
        let top = arena.alloc(None);
        Self {
            registry,
            tunables,
            sink,
            arena,
            top,
            markers: Vec::new(),
            exceptions: ExceptionInterner::new(),
            stats: BuilderStats::default(),
        }
    }

    /// Opens a frame for a method activation starting at `t`.
    pub fn enter(
        &mut self,
        class_id: SymbolId,
        method_id: SymbolId,
        signature_id: SymbolId,
        t: Time,
    ) {
        let class_id = if class_id.is_null() {
            warn!(method = %method_id, "enter with null class symbol");
            self.stats.unnamed_enters += 1;
            self.registry.id_of(UNKNOWN_SYMBOL_NAME)
        } else {
            class_id
        };

        let handle = if self.arena.get(self.top).is_empty() {
            self.top
        } else {
            self.arena.alloc(Some(self.top))
        };
        self.top = handle;

        let over_budget = self.charge_record();
        let slot = self.arena.get_mut(handle);
        slot.class_id = class_id;
        slot.method_id = method_id;
        slot.signature_id = signature_id;
        slot.time = t.as_nanos();
        slot.calls += 1;
        slot.over_budget = over_budget;
    }

    /// Counts the frame just entered against the current budget. Returns true
    /// if the frame is over budget.
    fn charge_record(&mut self) -> bool {
        let live = self.arena.live();
        let Some(state) = self.markers.last_mut() else {
            return live > self.tunables.max_records();
        };
        if state.marker.has_flags(MarkerFlags::OVERFLOW_FLAG) {
            return true;
        }
        let count = live.saturating_sub(state.base);
        if count <= state.marker.max_records {
            return false;
        }
        state.marker.flags |= MarkerFlags::OVERFLOW_FLAG;
        self.stats.overflows += 1;
        debug!(
            trace = %state.marker.trace_id,
            budget = state.marker.max_records,
            "trace over record budget"
        );
        true
    }

    /// Makes the innermost open frame the root of a trace.
    pub fn begin(&mut self, trace_id: SymbolId, clock: u64, flags: MarkerFlags) {
        let Some(handle) = self.current() else {
            warn!(trace = %trace_id, "begin without an open frame");
            self.stats.begins_without_frame += 1;
            return;
        };
        if self.arena.get(handle).flags.contains(RecordFlags::TRACE_BEGIN) {
            warn!(trace = %trace_id, "duplicate begin on the same frame ignored");
            self.stats.duplicate_begins += 1;
            return;
        }

        let (marker, base) = match self.markers.last() {
            Some(parent) => (
                TraceMarker::new(
                    trace_id,
                    clock,
                    parent.marker.minimum_time,
                    parent.marker.max_records,
                    parent.marker.inheritable_flags() | flags,
                ),
                parent.base,
            ),
            None => {
                let mut flags = flags;
                if self.tunables.all_methods() {
                    flags |= MarkerFlags::ALL_METHODS;
                }
                // The root and, if present, the empty top above it.
                let open = if handle == self.top { 1 } else { 2 };
                (
                    TraceMarker::new(
                        trace_id,
                        clock,
                        self.tunables.min_trace_time(),
                        self.tunables.max_records(),
                        flags,
                    ),
                    self.arena.live().saturating_sub(open),
                )
            }
        };

        let index = self.markers.len();
        self.markers.push(MarkerState {
            marker,
            root: handle,
            base,
        });
        let slot = self.arena.get_mut(handle);
        slot.marker = Some(index);
        slot.flags |= RecordFlags::TRACE_BEGIN;
    }

    /// ORs `flags` into the innermost trace's marker.
    pub fn set_trace_flags(&mut self, flags: MarkerFlags) {
        match self.markers.last_mut() {
            Some(state) => state.marker.flags |= flags,
            None => warn!(?flags, "set_trace_flags outside of a trace"),
        }
    }

    /// Overrides the innermost trace's minimum time (ns).
    pub fn set_minimum_trace_time(&mut self, nanos: u64) {
        match self.markers.last_mut() {
            Some(state) => state.marker.minimum_time = nanos,
            None => warn!(nanos, "set_minimum_trace_time outside of a trace"),
        }
    }

    /// Attaches an attribute to the innermost open frame.
    pub fn attr(&mut self, key: SymbolId, value: impl Into<AttrValue>) {
        let Some(handle) = self.current() else {
            warn!(key = %key, "attribute without an open frame");
            self.stats.orphan_attrs += 1;
            return;
        };
        self.arena.get_mut(handle).attrs.insert(key, value.into());
    }

    /// Closes the innermost open frame normally at `t`.
    pub fn return_(&mut self, t: Time) {
        self.close(t, None);
    }

    /// Closes the innermost open frame at `t` with an exception.
    pub fn error(&mut self, exc: &Arc<Throwable>, t: Time) {
        self.close(t, Some(exc));
    }

    /// Returns true while a trace is being assembled.
    pub fn is_in_trace(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Returns the number of open frames.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = Some(self.top);
        while let Some(handle) = cursor {
            let slot = self.arena.get(handle);
            if !slot.is_empty() {
                depth += 1;
            }
            cursor = slot.parent;
        }
        depth
    }

    /// Returns the builder's counters.
    pub fn stats(&self) -> BuilderStats {
        self.stats
    }

    /// Returns the number of arena slots in use.
    pub fn live_records(&self) -> usize {
        self.arena.live()
    }

    /// Innermost non-empty frame, without modifying the stack.
    fn current(&self) -> Option<RecordHandle> {
        let mut cursor = Some(self.top);
        while let Some(handle) = cursor {
            let slot = self.arena.get(handle);
            if !slot.is_empty() {
                return Some(handle);
            }
            cursor = slot.parent;
        }
        None
    }

    /// Drops empty frames off the top until a busy one is found. Never goes
    /// past the bottom frame.
    fn unwind_empty(&mut self) -> Option<RecordHandle> {
        loop {
            let slot = self.arena.get(self.top);
            if !slot.is_empty() {
                return Some(self.top);
            }
            let parent = slot.parent?;
            self.arena.release(self.top);
            self.top = parent;
        }
    }

    fn close(&mut self, t: Time, exc: Option<&Arc<Throwable>>) {
        let Some(handle) = self.unwind_empty() else {
            warn!(at = %t, "close event with no open frame ignored");
            self.stats.extra_closes += 1;
            return;
        };

        if let Some(exc) = exc {
            self.record_error(handle, exc);
        }

        let slot = self.arena.get_mut(handle);
        let elapsed = t.as_nanos().saturating_sub(slot.time);
        slot.time = elapsed;
        let parent = slot.parent;
        let owns_marker = slot.flags.contains(RecordFlags::TRACE_BEGIN);

        let mut submit = false;
        let all_methods = if owns_marker {
            match self.pop_marker(handle) {
                Some(marker) => {
                    let all_methods = marker.has_flags(MarkerFlags::ALL_METHODS);
                    if marker.should_submit(elapsed) {
                        submit = true;
                    } else {
                        self.stats.dropped_traces += 1;
                    }
                    let slot = self.arena.get_mut(handle);
                    if marker.has_flags(MarkerFlags::OVERFLOW_FLAG) {
                        slot.flags |= RecordFlags::OVERFLOW;
                    }
                    slot.closed_marker = Some(marker);
                    all_methods
                }
                None => false,
            }
        } else {
            self.markers
                .last()
                .is_some_and(|state| state.marker.has_flags(MarkerFlags::ALL_METHODS))
        };

        let slot = self.arena.get(handle);
        let (calls, errors) = (slot.calls, slot.errors);
        let retain = parent.is_some()
            && !slot.over_budget
            && (elapsed > self.tunables.min_method_time() || errors > 0 || all_methods);

        if let Some(parent) = parent {
            let parent_slot = self.arena.get_mut(parent);
            parent_slot.calls += calls;
            parent_slot.errors += errors;
        }

        if submit {
            let record = if retain {
                self.arena.snapshot(handle)
            } else {
                self.arena.detach(handle)
            };
            let trace = record.marker.as_ref().map(|m| m.trace_id);
            if self.sink.submit(record) {
                self.stats.submitted += 1;
                debug!(trace = ?trace, elapsed, "trace submitted");
            } else {
                self.stats.rejected += 1;
                debug!(trace = ?trace, "trace rejected by sink");
            }
        }

        match parent {
            Some(parent) if retain => {
                self.attach_child(parent, handle);
                self.top = parent;
            }
            Some(parent) if submit => self.top = parent,
            None if submit => self.top = self.arena.alloc(None),
            _ => {
                self.arena.recycle(handle);
                self.top = handle;
            }
        }

        if parent.is_none() {
            self.settle_at_bottom();
        } else if self.markers.is_empty() {
            // No trace is open, so no later record can share these.
            self.exceptions.clear();
        }
    }

    fn record_error(&mut self, handle: RecordHandle, exc: &Arc<Throwable>) {
        let sym = self.exceptions.symbolize(&self.registry, exc);
        let mut flags = RecordFlags::empty();
        for child in &self.arena.get(handle).children {
            if let Some(seen) = &self.arena.get(*child).exception {
                if Arc::ptr_eq(seen, &sym) {
                    flags |= RecordFlags::EXCEPTION_PASS;
                } else if sym.is_caused_by(seen) {
                    flags |= RecordFlags::EXCEPTION_WRAP;
                }
            }
        }
        let slot = self.arena.get_mut(handle);
        slot.flags |= flags;
        slot.errors += 1;
        slot.exception = Some(sym);
        if let Some(state) = self.markers.last_mut() {
            state.marker.flags |= MarkerFlags::ERROR_MARK;
        }
    }

    /// Pops the marker owned by `handle`, repairing the stack if markers of
    /// frames that never closed are still above it.
    fn pop_marker(&mut self, handle: RecordHandle) -> Option<TraceMarker> {
        let position = match self.markers.last() {
            Some(state) if state.root == handle => self.markers.len() - 1,
            _ => {
                self.stats.marker_mismatches += 1;
                let found = self.markers.iter().rposition(|state| state.root == handle);
                warn!(
                    expected = ?self.arena.get(handle).marker,
                    found = ?found,
                    depth = self.markers.len(),
                    "marker stack out of step with closing frame"
                );
                found?
            }
        };
        let discarded = self.markers.len() - position - 1;
        if discarded > 0 {
            debug!(discarded, "discarding markers of unclosed frames");
        }
        self.markers.truncate(position + 1);
        let state = self.markers.pop()?;

        if let Some(parent) = self.markers.last_mut() {
            parent.marker.flags |= state.marker.flags & MarkerFlags::PROPAGATED;
        }
        Some(state.marker)
    }

    /// Keeps `child` under `parent`, eliding it if it is a wrapper around a
    /// single child that adds no information.
    fn attach_child(&mut self, parent: RecordHandle, child: RecordHandle) {
        let drop_interim = self
            .markers
            .last()
            .is_some_and(|state| state.marker.has_flags(MarkerFlags::DROP_INTERIM));

        if drop_interim {
            if let Some(only) = self.collapsible_child(child) {
                let (calls, errors) = {
                    let slot = self.arena.get_mut(child);
                    slot.children.clear();
                    (slot.calls, slot.errors)
                };
                let promoted = self.arena.get_mut(only);
                promoted.flags |= RecordFlags::DROPPED_PARENT;
                promoted.calls = calls;
                promoted.errors = errors;
                promoted.parent = Some(parent);
                self.arena.release(child);
                self.arena.get_mut(parent).children.push(only);
                return;
            }
        }

        self.arena.get_mut(parent).children.push(child);
    }

    fn collapsible_child(&self, handle: RecordHandle) -> Option<RecordHandle> {
        let slot = self.arena.get(handle);
        if slot.exception.is_some()
            || !slot.attrs.is_empty()
            || slot.flags.contains(RecordFlags::TRACE_BEGIN)
        {
            return None;
        }
        let [only] = slot.children.as_slice() else {
            return None;
        };
        let self_time = slot.time.saturating_sub(self.arena.get(*only).time);
        (self_time <= self.tunables.min_method_time()).then_some(*only)
    }

    /// The stack is back at its bottom frame: nothing of the last trace may
    /// linger.
    fn settle_at_bottom(&mut self) {
        if !self.markers.is_empty() {
            warn!(
                remaining = self.markers.len(),
                "markers left after the bottom frame closed"
            );
            self.stats.marker_mismatches += 1;
            self.markers.clear();
        }
        self.exceptions.clear();
    }
}

impl fmt::Debug for TraceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceBuilder")
            .field("depth", &self.depth())
            .field("markers", &self.markers.len())
            .field("live_records", &self.arena.live())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
