//! Stream envelope and record layout.
//!
//! A stream is a 4-byte magic tag followed by a sequence of MessagePack
//! encoded [`WireRecord`] values. With [`PLAIN_MAGIC`] the records follow the
//! tag directly; with [`COMPRESSED_MAGIC`] they are wrapped in one LZ4 frame.

use crate::error::{Error, Result};
use crate::metrics::{MetricDef, MetricTemplate};
use crate::trace::AttrValue;
use crate::types::SymbolId;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Magic tag of an uncompressed stream.
pub const PLAIN_MAGIC: [u8; 4] = *b"CTR1";
/// Magic tag of an LZ4-frame compressed stream.
pub const COMPRESSED_MAGIC: [u8; 4] = *b"CTZ1";
/// Record layout version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Body framing selected by the magic tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Records follow the magic tag directly.
    #[default]
    Plain,
    /// Records are wrapped in an LZ4 frame.
    Compressed,
}

impl Framing {
    /// Returns the magic tag announcing this framing.
    #[must_use]
    pub const fn magic(self) -> [u8; 4] {
        match self {
            Self::Plain => PLAIN_MAGIC,
            Self::Compressed => COMPRESSED_MAGIC,
        }
    }

    /// Recognizes a magic tag.
    pub fn from_magic(magic: [u8; 4]) -> Result<Self> {
        match magic {
            PLAIN_MAGIC => Ok(Self::Plain),
            COMPRESSED_MAGIC => Ok(Self::Compressed),
            other => Err(Error::BadMagic(other)),
        }
    }
}

/// One record of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireRecord {
    /// Start of a disclosure scope.
    Handshake(WireHandshake),
    /// Symbol definition.
    Symbol {
        /// Symbol id.
        id: SymbolId,
        /// Symbol name.
        name: String,
    },
    /// Metric template definition.
    MetricTemplate(MetricTemplate),
    /// Metric definition.
    Metric(MetricDef),
    /// A complete trace tree.
    Trace(WireTrace),
    /// A batch of metric samples.
    Perf(WirePerf),
}

/// Stream preamble. Every handshake resets disclosure on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireHandshake {
    /// Sending agent name.
    pub agent: String,
    /// Record layout version.
    pub version: u32,
    /// Wall-clock time of the handshake in milliseconds since the Unix epoch.
    pub clock: u64,
}

/// Encoded trace record.
///
/// The exception comes after the children so that, within one trace, the
/// innermost record observing an exception is the one carrying it in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTrace {
    pub class_id: SymbolId,
    pub method_id: SymbolId,
    pub signature_id: SymbolId,
    pub time: u64,
    pub calls: u64,
    pub errors: u64,
    pub flags: u16,
    pub attrs: Vec<(SymbolId, AttrValue)>,
    pub marker: Option<WireMarker>,
    pub children: Vec<WireTrace>,
    pub exception: Option<WireException>,
}

/// Encoded trace marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMarker {
    pub trace_id: SymbolId,
    pub clock: u64,
    pub minimum_time: u64,
    pub max_records: u64,
    pub flags: u16,
}

/// Encoded exception: in full on first occurrence within a trace, by identity
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireException {
    /// Complete exception.
    Full {
        /// Per-trace identity later occurrences refer to.
        identity: u32,
        class_id: SymbolId,
        message: String,
        frames: Vec<WireFrame>,
        cause: Option<Box<WireException>>,
    },
    /// Repeat of an exception written earlier in the same trace.
    Ref(u32),
}

/// Encoded stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    pub class_id: SymbolId,
    pub method_id: SymbolId,
    pub file_id: SymbolId,
    pub line: i32,
}

/// Encoded performance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePerf {
    pub clock: u64,
    pub scanner_id: SymbolId,
    pub samples: Vec<WireSample>,
}

/// Encoded metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSample {
    pub metric_id: u32,
    pub value: f64,
    pub attrs: Vec<(SymbolId, String)>,
}

/// Byte sink behind the magic tag.
pub(crate) enum BodyWriter<W: Write> {
    Plain(W),
    #[cfg(feature = "trace-compression")]
    Lz4(lz4_flex::frame::FrameEncoder<W>),
}

impl<W: Write> BodyWriter<W> {
    /// Writes the magic tag for `framing` and returns the body writer.
    pub(crate) fn start(mut out: W, framing: Framing) -> Result<Self> {
        out.write_all(&framing.magic())?;
        match framing {
            Framing::Plain => Ok(Self::Plain(out)),
            #[cfg(feature = "trace-compression")]
            Framing::Compressed => Ok(Self::Lz4(lz4_flex::frame::FrameEncoder::new(out))),
            #[cfg(not(feature = "trace-compression"))]
            Framing::Compressed => Err(Error::UnsupportedFraming(
                "lz4 (build without trace-compression)",
            )),
        }
    }

    /// Ends the body and returns the underlying writer.
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(mut out) => {
                out.flush()?;
                Ok(out)
            }
            #[cfg(feature = "trace-compression")]
            Self::Lz4(encoder) => {
                let mut out = encoder.finish().map_err(io::Error::other)?;
                out.flush()?;
                Ok(out)
            }
        }
    }

    pub(crate) fn get_ref(&self) -> &W {
        match self {
            Self::Plain(out) => out,
            #[cfg(feature = "trace-compression")]
            Self::Lz4(encoder) => encoder.get_ref(),
        }
    }
}

impl<W: Write> Write for BodyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(out) => out.write(buf),
            #[cfg(feature = "trace-compression")]
            Self::Lz4(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(out) => out.flush(),
            #[cfg(feature = "trace-compression")]
            Self::Lz4(encoder) => encoder.flush(),
        }
    }
}

/// Byte source behind the magic tag.
pub(crate) enum BodyReader<R: Read> {
    Plain(R),
    #[cfg(feature = "trace-compression")]
    Lz4(lz4_flex::frame::FrameDecoder<R>),
}

impl<R: Read> BodyReader<R> {
    /// Reads the magic tag and returns the body reader.
    pub(crate) fn start(mut input: R) -> Result<Self> {
        let mut magic = [0_u8; 4];
        input.read_exact(&mut magic)?;
        match Framing::from_magic(magic)? {
            Framing::Plain => Ok(Self::Plain(input)),
            #[cfg(feature = "trace-compression")]
            Framing::Compressed => Ok(Self::Lz4(lz4_flex::frame::FrameDecoder::new(input))),
            #[cfg(not(feature = "trace-compression"))]
            Framing::Compressed => Err(Error::UnsupportedFraming(
                "lz4 (build without trace-compression)",
            )),
        }
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(input) => input.read(buf),
            #[cfg(feature = "trace-compression")]
            Self::Lz4(decoder) => decoder.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_selects_framing() {
        assert_eq!(Framing::from_magic(*b"CTR1").unwrap(), Framing::Plain);
        assert_eq!(Framing::from_magic(*b"CTZ1").unwrap(), Framing::Compressed);
        assert!(matches!(
            Framing::from_magic(*b"JFR\0"),
            Err(Error::BadMagic(m)) if &m == b"JFR\0"
        ));
    }

    #[test]
    fn plain_body_starts_with_magic() {
        let body = BodyWriter::start(Vec::new(), Framing::Plain).unwrap();
        assert_eq!(body.get_ref().as_slice(), b"CTR1");
        let out = body.finish().unwrap();
        let mut reader = BodyReader::start(out.as_slice()).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[cfg(feature = "trace-compression")]
    #[test]
    fn compressed_body_roundtrips() {
        let mut body = BodyWriter::start(Vec::new(), Framing::Compressed).unwrap();
        body.write_all(&[7_u8; 4096]).unwrap();
        let out = body.finish().unwrap();
        assert_eq!(&out[..4], b"CTZ1");
        assert!(out.len() < 4096);

        let mut reader = BodyReader::start(out.as_slice()).unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![7_u8; 4096]);
    }
}
