//! Error types.
//!
//! Trace construction itself never returns errors: protocol violations from
//! the event source are logged and healed in place. The variants here cover
//! the serialization layer, the sink's I/O and configuration loading.

use crate::types::SymbolId;
use std::io;
use thiserror::Error;

/// Errors raised by encoding, decoding, output and configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A record could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The stream did not start with a known magic tag.
    #[error("bad stream magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// The stream selects a framing this build cannot read.
    #[error("unsupported stream framing: {0}")]
    UnsupportedFraming(&'static str),

    /// A record referenced a symbol that was never disclosed in this stream.
    #[error("record references undisclosed symbol {0}")]
    UndisclosedSymbol(SymbolId),

    /// A record referenced a metric that was never disclosed in this stream.
    #[error("record references undisclosed metric {0}")]
    UndisclosedMetric(u32),

    /// A metric definition referenced a template never disclosed in this stream.
    #[error("metric definition references undisclosed template {0}")]
    UndisclosedTemplate(u32),

    /// A definition carried an id above what a reader will index.
    #[error("stream id {0} exceeds the reader limit")]
    IdOutOfRange(u32),

    /// An exception back-reference pointed at an identity not seen in the trace.
    #[error("exception reference {0} does not match any earlier exception")]
    UnknownIdentity(u32),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if this error came from the underlying transport.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if the stream content itself is malformed.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::BadMagic(_)
                | Self::UndisclosedSymbol(_)
                | Self::UndisclosedMetric(_)
                | Self::UndisclosedTemplate(_)
                | Self::UnknownIdentity(_)
                | Self::IdOutOfRange(_)
        )
    }
}

/// Result alias for fallible calltrace operations.
pub type Result<T> = std::result::Result<T, Error>;
