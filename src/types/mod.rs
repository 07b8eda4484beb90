//! Core value types for the tracer.
//!
//! - [`id`]: Identifier and time types (`SymbolId`, `Time`)

pub mod id;

pub use id::{SymbolId, Time};
