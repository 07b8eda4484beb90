//! Exceptions.
//!
//! Instrumented code reports errors as [`Throwable`] values shared through an
//! `Arc`; the `Arc` is the exception's identity. Before an exception is stored
//! in a trace it is converted to a [`SymbolicException`], whose names are all
//! interned symbols. The conversion goes through an [`ExceptionInterner`] so
//! that one live exception seen by several frames becomes one shared symbolic
//! value, which the wire layer then writes in full only once.

use crate::symbol::SymbolRegistry;
use crate::types::SymbolId;
use std::sync::Arc;

/// Causes deeper than this are cut off during conversion.
pub const MAX_CAUSE_DEPTH: usize = 32;

/// A stack frame of a live exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrownFrame {
    /// Declaring class name.
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Source file name, if known.
    pub file_name: Option<String>,
    /// Source line, or a negative value if unknown.
    pub line: i32,
}

impl ThrownFrame {
    /// Creates a frame.
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        file_name: Option<&str>,
        line: i32,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: file_name.map(str::to_string),
            line,
        }
    }
}

/// A live exception as reported by instrumented code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    /// Exception class name.
    pub class_name: String,
    /// Exception message.
    pub message: Option<String>,
    /// Stack trace, innermost frame first.
    pub frames: Vec<ThrownFrame>,
    /// The exception this one wraps.
    pub cause: Option<Arc<Throwable>>,
}

impl Throwable {
    /// Creates an exception without frames or cause.
    pub fn new(class_name: impl Into<String>, message: Option<&str>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.map(str::to_string),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: ThrownFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Sets the cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Arc<Self>) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// A stack frame with interned names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StackFrame {
    /// Declaring class symbol.
    pub class_id: SymbolId,
    /// Method symbol.
    pub method_id: SymbolId,
    /// Source file symbol (null if unknown).
    pub file_id: SymbolId,
    /// Source line.
    pub line: i32,
}

/// An exception with interned names, ready for the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicException {
    /// Exception class symbol.
    pub class_id: SymbolId,
    /// Exception message.
    pub message: String,
    /// Stack trace, innermost frame first.
    pub frames: Vec<StackFrame>,
    /// The wrapped exception.
    pub cause: Option<Arc<SymbolicException>>,
}

impl SymbolicException {
    /// Visits every symbol this exception and its causes reference.
    pub fn for_each_symbol(&self, visit: &mut impl FnMut(SymbolId)) {
        visit(self.class_id);
        for frame in &self.frames {
            visit(frame.class_id);
            visit(frame.method_id);
            visit(frame.file_id);
        }
        if let Some(cause) = &self.cause {
            cause.for_each_symbol(visit);
        }
    }

    /// Returns true if `other` is this exception's direct cause.
    #[must_use]
    pub fn is_caused_by(&self, other: &Arc<Self>) -> bool {
        self.cause.as_ref().is_some_and(|c| Arc::ptr_eq(c, other))
    }
}

/// Identity-preserving converter from live to symbolic exceptions.
///
/// Holds one entry per distinct live exception seen since the last
/// [`clear`](Self::clear); a trace builder clears it whenever its stack
/// unwinds to the base frame.
#[derive(Debug, Default)]
pub struct ExceptionInterner {
    seen: Vec<(Arc<Throwable>, Arc<SymbolicException>)>,
}

impl ExceptionInterner {
    /// Creates an empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts `exc`, returning the same symbolic value for the same live
    /// exception.
    pub fn symbolize(
        &mut self,
        registry: &SymbolRegistry,
        exc: &Arc<Throwable>,
    ) -> Arc<SymbolicException> {
        self.symbolize_at(registry, exc, 0)
    }

    fn symbolize_at(
        &mut self,
        registry: &SymbolRegistry,
        exc: &Arc<Throwable>,
        depth: usize,
    ) -> Arc<SymbolicException> {
        if let Some((_, sym)) = self.seen.iter().find(|(live, _)| Arc::ptr_eq(live, exc)) {
            return Arc::clone(sym);
        }

        let cause = match &exc.cause {
            Some(cause) if depth < MAX_CAUSE_DEPTH => {
                Some(self.symbolize_at(registry, cause, depth + 1))
            }
            _ => None,
        };

        let frames = exc
            .frames
            .iter()
            .map(|f| StackFrame {
                class_id: registry.id(f.class_name.as_str()),
                method_id: registry.id(f.method_name.as_str()),
                file_id: registry.id(f.file_name.as_deref()),
                line: f.line,
            })
            .collect();

        let sym = Arc::new(SymbolicException {
            class_id: registry.id(exc.class_name.as_str()),
            message: exc.message.clone().unwrap_or_default(),
            frames,
            cause,
        });
        self.seen.push((Arc::clone(exc), Arc::clone(&sym)));
        sym
    }

    /// Returns the number of distinct exceptions seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if no exception was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forgets every exception.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error() -> Arc<Throwable> {
        Arc::new(
            Throwable::new("java.io.IOException", Some("disk full"))
                .with_frame(ThrownFrame::new("com.acme.Store", "flush", Some("Store.java"), 42))
                .with_frame(ThrownFrame::new("com.acme.Store", "close", None, -1)),
        )
    }

    #[test]
    fn conversion_interns_names() {
        let registry = SymbolRegistry::new();
        let mut interner = ExceptionInterner::new();
        let sym = interner.symbolize(&registry, &io_error());

        assert_eq!(registry.name(sym.class_id), "java.io.IOException");
        assert_eq!(sym.message, "disk full");
        assert_eq!(sym.frames.len(), 2);
        assert_eq!(registry.name(sym.frames[0].file_id), "Store.java");
        assert!(sym.frames[1].file_id.is_null());
        assert_eq!(sym.frames[0].line, 42);
    }

    #[test]
    fn same_instance_same_symbolic_value() {
        let registry = SymbolRegistry::new();
        let mut interner = ExceptionInterner::new();
        let exc = io_error();
        let a = interner.symbolize(&registry, &exc);
        let b = interner.symbolize(&registry, &exc);
        assert!(Arc::ptr_eq(&a, &b));

        let twin = io_error();
        let c = interner.symbolize(&registry, &twin);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(*a, *c);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn cause_identity_is_shared() {
        let registry = SymbolRegistry::new();
        let mut interner = ExceptionInterner::new();
        let root = io_error();
        let wrapper = Arc::new(
            Throwable::new("java.lang.RuntimeException", None).with_cause(Arc::clone(&root)),
        );

        let inner = interner.symbolize(&registry, &root);
        let outer = interner.symbolize(&registry, &wrapper);
        assert!(outer.is_caused_by(&inner));
        assert!(outer.message.is_empty());

        interner.clear();
        assert!(interner.is_empty());
    }

    #[test]
    fn symbol_walk_covers_causes() {
        let registry = SymbolRegistry::new();
        let mut interner = ExceptionInterner::new();
        let wrapper = Arc::new(
            Throwable::new("java.lang.RuntimeException", None).with_cause(io_error()),
        );
        let sym = interner.symbolize(&registry, &wrapper);

        let mut ids = Vec::new();
        sym.for_each_symbol(&mut |id| ids.push(id));
        assert!(ids.contains(&registry.id("java.io.IOException")));
        assert!(ids.contains(&registry.id("Store.java")));
    }
}
