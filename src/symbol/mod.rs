//! Symbol interning.
//!
//! Every class, method, signature, attribute key, file name and trace name
//! that reaches the wire is interned to a compact [`SymbolId`]. The registry
//! is process-wide and shared by every trace builder and the writer thread.

pub mod registry;

pub use registry::{NULL_SYMBOL_NAME, SymbolRegistry, UNKNOWN_SYMBOL_NAME};
