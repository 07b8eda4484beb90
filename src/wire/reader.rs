//! Stream decoder.

use super::disclosure::Disclosure;
use super::format::{BodyReader, WireException, WireHandshake, WirePerf, WireRecord, WireTrace};
use crate::error::{Error, Result};
use crate::metrics::{MetricRegistry, PerfRecord, PerfSample};
use crate::symbol::SymbolRegistry;
use crate::trace::{
    MarkerFlags, RecordFlags, StackFrame, SymbolicException, TraceMarker, TraceRecord,
};
use crate::types::SymbolId;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

/// Largest symbol, template or metric id a stream may define. Disclosure is
/// tracked in dense bitsets indexed by id.
pub const MAX_STREAM_ID: u32 = 1 << 24;

fn check_id(id: u32) -> Result<()> {
    if id > MAX_STREAM_ID {
        return Err(Error::IdOutOfRange(id));
    }
    Ok(())
}

/// A decoded stream item. Definitions are consumed by the reader and never
/// surface as items.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceItem {
    /// Start of a disclosure scope.
    Handshake(WireHandshake),
    /// A trace tree.
    Trace(TraceRecord),
    /// A batch of metric samples.
    Perf(PerfRecord),
}

/// Reads a stream written by a [`TraceWriter`](super::TraceWriter).
///
/// Symbol and metric definitions are installed into the given registries as
/// they arrive, so decoded records can be resolved against them. Every
/// reference is checked against what the stream disclosed so far.
pub struct TraceReader<R: Read> {
    body: BodyReader<R>,
    symbols: Arc<SymbolRegistry>,
    metrics: Arc<MetricRegistry>,
    disclosure: Disclosure,
}

impl<R: Read> TraceReader<R> {
    /// Opens a stream, checking its magic tag.
    pub fn open(
        input: R,
        symbols: Arc<SymbolRegistry>,
        metrics: Arc<MetricRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            body: BodyReader::start(input)?,
            symbols,
            metrics,
            disclosure: Disclosure::new(),
        })
    }

    /// Returns the next item, or `None` at the end of the stream.
    pub fn next_item(&mut self) -> Result<Option<TraceItem>> {
        loop {
            let Some(record) = self.read_record()? else {
                return Ok(None);
            };
            match record {
                WireRecord::Handshake(handshake) => {
                    self.disclosure.reset();
                    return Ok(Some(TraceItem::Handshake(handshake)));
                }
                WireRecord::Symbol { id, name } => {
                    check_id(id.as_u32())?;
                    self.symbols.put(id, &name);
                    self.disclosure.disclose_symbol(id);
                }
                WireRecord::MetricTemplate(template) => {
                    check_id(template.id)?;
                    let mut names = Vec::new();
                    template.for_each_symbol(&mut |s| names.push(s));
                    self.require_symbols(names)?;
                    self.disclosure.disclose_template(template.id);
                    self.metrics.put_template(template);
                }
                WireRecord::Metric(def) => {
                    check_id(def.id)?;
                    if !self.disclosure.knows_template(def.template_id) {
                        return Err(Error::UndisclosedTemplate(def.template_id));
                    }
                    let mut names = Vec::new();
                    def.for_each_symbol(&mut |s| names.push(s));
                    self.require_symbols(names)?;
                    self.disclosure.disclose_metric(def.id);
                    self.metrics.put_metric(def);
                }
                WireRecord::Trace(wire) => {
                    let mut identities = HashMap::new();
                    let trace = self.decode_trace(wire, &mut identities)?;
                    return Ok(Some(TraceItem::Trace(trace)));
                }
                WireRecord::Perf(wire) => {
                    return self.decode_perf(wire).map(|p| Some(TraceItem::Perf(p)));
                }
            }
        }
    }

    /// Reads every remaining item.
    pub fn read_all(&mut self) -> Result<Vec<TraceItem>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item()? {
            items.push(item);
        }
        Ok(items)
    }

    fn read_record(&mut self) -> Result<Option<WireRecord>> {
        match rmp_serde::from_read(&mut self.body) {
            Ok(record) => Ok(Some(record)),
            Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
                if e.kind() == io::ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn require_symbol(&self, id: SymbolId) -> Result<()> {
        if self.disclosure.knows_symbol(id) {
            Ok(())
        } else {
            Err(Error::UndisclosedSymbol(id))
        }
    }

    fn require_symbols(&self, ids: impl IntoIterator<Item = SymbolId>) -> Result<()> {
        ids.into_iter().try_for_each(|id| self.require_symbol(id))
    }

    fn decode_trace(
        &self,
        wire: WireTrace,
        identities: &mut HashMap<u32, Arc<SymbolicException>>,
    ) -> Result<TraceRecord> {
        self.require_symbols([wire.class_id, wire.method_id, wire.signature_id])?;
        self.require_symbols(wire.attrs.iter().map(|(k, _)| *k))?;

        let marker = match wire.marker {
            Some(m) => {
                self.require_symbol(m.trace_id)?;
                Some(TraceMarker::new(
                    m.trace_id,
                    m.clock,
                    m.minimum_time,
                    usize::try_from(m.max_records).unwrap_or(usize::MAX),
                    MarkerFlags::from_bits_truncate(m.flags),
                ))
            }
            None => None,
        };

        let children = wire
            .children
            .into_iter()
            .map(|c| self.decode_trace(c, identities))
            .collect::<Result<Vec<_>>>()?;
        let exception = wire
            .exception
            .map(|e| self.decode_exception(e, identities))
            .transpose()?;

        Ok(TraceRecord {
            class_id: wire.class_id,
            method_id: wire.method_id,
            signature_id: wire.signature_id,
            time: wire.time,
            calls: wire.calls,
            errors: wire.errors,
            flags: RecordFlags::from_bits_truncate(wire.flags),
            exception,
            attrs: wire.attrs.into_iter().collect(),
            children,
            marker,
        })
    }

    fn decode_exception(
        &self,
        wire: WireException,
        identities: &mut HashMap<u32, Arc<SymbolicException>>,
    ) -> Result<Arc<SymbolicException>> {
        match wire {
            WireException::Ref(identity) => identities
                .get(&identity)
                .cloned()
                .ok_or(Error::UnknownIdentity(identity)),
            WireException::Full {
                identity,
                class_id,
                message,
                frames,
                cause,
            } => {
                self.require_symbol(class_id)?;
                let frames = frames
                    .into_iter()
                    .map(|f| -> Result<StackFrame> {
                        self.require_symbols([f.class_id, f.method_id, f.file_id])?;
                        Ok(StackFrame {
                            class_id: f.class_id,
                            method_id: f.method_id,
                            file_id: f.file_id,
                            line: f.line,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let cause = cause
                    .map(|c| self.decode_exception(*c, identities))
                    .transpose()?;
                let exception = Arc::new(SymbolicException {
                    class_id,
                    message,
                    frames,
                    cause,
                });
                identities.insert(identity, Arc::clone(&exception));
                Ok(exception)
            }
        }
    }

    fn decode_perf(&self, wire: WirePerf) -> Result<PerfRecord> {
        self.require_symbol(wire.scanner_id)?;
        let mut record = PerfRecord::new(wire.clock, wire.scanner_id);
        for sample in wire.samples {
            if !self.disclosure.knows_metric(sample.metric_id) {
                return Err(Error::UndisclosedMetric(sample.metric_id));
            }
            self.require_symbols(sample.attrs.iter().map(|(k, _)| *k))?;
            record.samples.push(PerfSample {
                metric_id: sample.metric_id,
                value: sample.value,
                attrs: sample.attrs.into_iter().collect(),
            });
        }
        Ok(record)
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}
