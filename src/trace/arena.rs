//! Frame slots for records under construction.
//!
//! While a tree is being assembled its records live in a thread-confined
//! arena and refer to each other by [`RecordHandle`]. Discarded frames go back
//! on a free list and are reused by later `enter` events, so a steady stream
//! of short calls allocates nothing. A finished tree is copied or moved out
//! into owned [`TraceRecord`] values before it leaves the thread.

use super::exception::SymbolicException;
use super::marker::TraceMarker;
use super::record::{AttrValue, RecordFlags, TraceRecord};
use crate::types::SymbolId;
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Index of a slot in a [`RecordArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHandle(u32);

impl RecordHandle {
    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordHandle({})", self.0)
    }
}

/// A record under construction.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) class_id: SymbolId,
    pub(crate) method_id: SymbolId,
    pub(crate) signature_id: SymbolId,
    /// Start timestamp while open, duration once closed.
    pub(crate) time: u64,
    pub(crate) calls: u64,
    pub(crate) errors: u64,
    pub(crate) flags: RecordFlags,
    pub(crate) exception: Option<Arc<SymbolicException>>,
    pub(crate) attrs: BTreeMap<SymbolId, AttrValue>,
    pub(crate) children: Vec<RecordHandle>,
    pub(crate) parent: Option<RecordHandle>,
    /// Position on the builder's marker stack of the marker this slot owns.
    pub(crate) marker: Option<usize>,
    /// Marker owned by this slot, filled in once the marker is popped.
    pub(crate) closed_marker: Option<TraceMarker>,
    /// Entered after the trace ran out of record budget; never retained.
    pub(crate) over_budget: bool,
}

impl Slot {
    pub(crate) const fn is_empty(&self) -> bool {
        self.class_id.is_null()
    }

    fn reset(&mut self) {
        self.class_id = SymbolId::NULL;
        self.method_id = SymbolId::NULL;
        self.signature_id = SymbolId::NULL;
        self.time = 0;
        self.calls = 0;
        self.errors = 0;
        self.flags = RecordFlags::empty();
        self.exception = None;
        self.attrs.clear();
        self.children.clear();
        self.parent = None;
        self.marker = None;
        self.closed_marker = None;
        self.over_budget = false;
    }
}

/// Arena of record slots with an explicit free list.
#[derive(Debug, Default)]
pub struct RecordArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl RecordArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an empty slot under `parent`, reusing a freed one if possible.
    pub(crate) fn alloc(&mut self, parent: Option<RecordHandle>) -> RecordHandle {
        let handle = if let Some(index) = self.free.pop() {
            RecordHandle(index)
        } else {
            self.slots.push(Slot::default());
            RecordHandle((self.slots.len() - 1) as u32)
        };
        self.slots[handle.index()].parent = parent;
        handle
    }

    /// Returns the slot behind `handle`.
    pub(crate) fn get(&self, handle: RecordHandle) -> &Slot {
        &self.slots[handle.index()]
    }

    /// Returns the slot behind `handle` mutably.
    pub(crate) fn get_mut(&mut self, handle: RecordHandle) -> &mut Slot {
        &mut self.slots[handle.index()]
    }

    /// Returns the number of slots in use.
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns the number of slots ever allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Frees `handle` and its whole retained subtree. Returns the number of
    /// slots freed.
    pub(crate) fn release(&mut self, handle: RecordHandle) -> usize {
        let mut pending = vec![handle];
        let mut freed = 0;
        while let Some(h) = pending.pop() {
            let slot = &mut self.slots[h.index()];
            pending.append(&mut slot.children);
            slot.reset();
            self.free.push(h.0);
            freed += 1;
        }
        freed
    }

    /// Empties `handle` in place for reuse by the next `enter`, freeing its
    /// retained subtree. The slot keeps its parent link.
    pub(crate) fn recycle(&mut self, handle: RecordHandle) -> usize {
        let slot = &mut self.slots[handle.index()];
        let parent = slot.parent;
        let children = std::mem::take(&mut slot.children);
        slot.reset();
        slot.parent = parent;
        children.into_iter().map(|c| self.release(c)).sum()
    }

    /// Copies the subtree rooted at `handle` into an owned tree, leaving the
    /// arena untouched.
    pub(crate) fn snapshot(&self, handle: RecordHandle) -> TraceRecord {
        let slot = self.get(handle);
        TraceRecord {
            class_id: slot.class_id,
            method_id: slot.method_id,
            signature_id: slot.signature_id,
            time: slot.time,
            calls: slot.calls,
            errors: slot.errors,
            flags: slot.flags,
            exception: slot.exception.clone(),
            attrs: slot.attrs.clone(),
            children: slot.children.iter().map(|c| self.snapshot(*c)).collect(),
            marker: slot.closed_marker.clone(),
        }
    }

    /// Moves the subtree rooted at `handle` out of the arena and frees its
    /// slots.
    pub(crate) fn detach(&mut self, handle: RecordHandle) -> TraceRecord {
        let slot = &mut self.slots[handle.index()];
        let children = std::mem::take(&mut slot.children);
        let mut record = TraceRecord {
            class_id: slot.class_id,
            method_id: slot.method_id,
            signature_id: slot.signature_id,
            time: slot.time,
            calls: slot.calls,
            errors: slot.errors,
            flags: slot.flags,
            exception: slot.exception.take(),
            attrs: std::mem::take(&mut slot.attrs),
            children: Vec::with_capacity(children.len()),
            marker: slot.closed_marker.take(),
        };
        slot.reset();
        self.free.push(handle.0);
        record.children = children.into_iter().map(|c| self.detach(c)).collect();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy(arena: &mut RecordArena, parent: Option<RecordHandle>, class: u32) -> RecordHandle {
        let h = arena.alloc(parent);
        arena.get_mut(h).class_id = SymbolId::new(class);
        if let Some(p) = parent {
            arena.get_mut(p).children.push(h);
        }
        h
    }

    #[test]
    fn free_list_reuses_slots() {
        let mut arena = RecordArena::new();
        let a = busy(&mut arena, None, 1);
        let b = busy(&mut arena, Some(a), 2);
        assert_eq!(arena.live(), 2);

        assert_eq!(arena.release(a), 2);
        assert_eq!(arena.live(), 0);

        let c = arena.alloc(None);
        assert!(c == a || c == b);
        assert!(arena.get(c).is_empty());
        assert_eq!(arena.capacity(), 2);
    }

    #[test]
    fn recycle_keeps_slot_and_parent() {
        let mut arena = RecordArena::new();
        let root = busy(&mut arena, None, 1);
        let mid = busy(&mut arena, Some(root), 2);
        busy(&mut arena, Some(mid), 3);
        busy(&mut arena, Some(mid), 4);

        assert_eq!(arena.recycle(mid), 2);
        assert_eq!(arena.live(), 2);
        let slot = arena.get(mid);
        assert!(slot.is_empty());
        assert!(slot.children.is_empty());
        assert_eq!(slot.parent, Some(root));
    }

    #[test]
    fn snapshot_keeps_arena() {
        let mut arena = RecordArena::new();
        let root = busy(&mut arena, None, 1);
        busy(&mut arena, Some(root), 2);
        busy(&mut arena, Some(root), 3);

        let tree = arena.snapshot(root);
        assert_eq!(tree.record_count(), 3);
        assert_eq!(tree.children[1].class_id, SymbolId::new(3));
        assert_eq!(arena.live(), 3);
    }

    #[test]
    fn detach_frees_subtree() {
        let mut arena = RecordArena::new();
        let root = busy(&mut arena, None, 1);
        let mid = busy(&mut arena, Some(root), 2);
        busy(&mut arena, Some(mid), 3);

        let tree = arena.detach(root);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.children[0].children[0].class_id, SymbolId::new(3));
        assert_eq!(arena.live(), 0);
    }
}
