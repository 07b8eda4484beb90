//! Metadata-disclosing stream format.
//!
//! Records reference symbols, metrics and templates by integer id. A writer
//! sends each definition once per disclosure scope, immediately before the
//! first record that needs it; a reader installs definitions as they arrive
//! and rejects references to anything not yet disclosed. A scope ends at
//! every handshake, so a rotated file or a new connection is self-contained.
//!
//! - [`format`]: Envelope, magic tags and record layout
//! - [`disclosure`]: Bit-vector backed "already sent" sets
//! - [`writer`]: [`TraceWriter`]
//! - [`reader`]: [`TraceReader`]

pub mod disclosure;
pub mod format;
pub mod reader;
pub mod writer;

pub use disclosure::{BitVector, Disclosure};
pub use format::{
    COMPRESSED_MAGIC, Framing, PLAIN_MAGIC, PROTOCOL_VERSION, WireException, WireFrame,
    WireHandshake, WireMarker, WirePerf, WireRecord, WireSample, WireTrace,
};
pub use reader::{MAX_STREAM_ID, TraceItem, TraceReader};
pub use writer::TraceWriter;
