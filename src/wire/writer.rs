//! Stream encoder.

use super::disclosure::Disclosure;
use super::format::{
    BodyWriter, Framing, PROTOCOL_VERSION, WireException, WireFrame, WireHandshake,
    WireMarker, WirePerf, WireRecord, WireSample, WireTrace,
};
use crate::error::Result;
use crate::metrics::{MetricRegistry, PerfRecord};
use crate::symbol::{SymbolRegistry, UNKNOWN_SYMBOL_NAME};
use crate::trace::{SymbolicException, TraceRecord};
use crate::tracing_compat::{debug, warn};
use crate::types::SymbolId;
use std::io::Write;
use std::sync::Arc;

/// Writes traces and performance records to one stream, disclosing every
/// definition they need the first time it is referenced.
pub struct TraceWriter<W: Write> {
    body: BodyWriter<W>,
    symbols: Arc<SymbolRegistry>,
    metrics: Arc<MetricRegistry>,
    disclosure: Disclosure,
    agent: String,
    records: u64,
}

impl<W: Write> TraceWriter<W> {
    /// Starts a stream on `out`: writes the magic tag and a handshake.
    pub fn start(
        out: W,
        framing: Framing,
        agent: impl Into<String>,
        clock: u64,
        symbols: Arc<SymbolRegistry>,
        metrics: Arc<MetricRegistry>,
    ) -> Result<Self> {
        let mut writer = Self {
            body: BodyWriter::start(out, framing)?,
            symbols,
            metrics,
            disclosure: Disclosure::new(),
            agent: agent.into(),
            records: 0,
        };
        writer.handshake(clock)?;
        Ok(writer)
    }

    /// Starts a new disclosure scope in the same stream: writes a fresh
    /// handshake and forgets everything disclosed so far.
    pub fn reset(&mut self, clock: u64) -> Result<()> {
        self.disclosure.reset();
        self.handshake(clock)
    }

    fn handshake(&mut self, clock: u64) -> Result<()> {
        let handshake = WireHandshake {
            agent: self.agent.clone(),
            version: PROTOCOL_VERSION,
            clock,
        };
        self.emit(&WireRecord::Handshake(handshake))
    }

    /// Writes one trace tree, preceded by the symbols it introduces.
    pub fn write_trace(&mut self, trace: &TraceRecord) -> Result<()> {
        let mut fresh = Vec::new();
        trace.walk(&mut |record| {
            let mut visit = |id: SymbolId| {
                if self.disclosure.disclose_symbol(id) {
                    fresh.push(id);
                }
            };
            visit(record.class_id);
            visit(record.method_id);
            visit(record.signature_id);
            for key in record.attrs.keys() {
                visit(*key);
            }
            if let Some(marker) = &record.marker {
                visit(marker.trace_id);
            }
            if let Some(exception) = &record.exception {
                exception.for_each_symbol(&mut visit);
            }
        });
        for id in fresh {
            self.emit_symbol(id)?;
        }

        let mut identities = Identities::default();
        let wire = encode_trace(trace, &mut identities);
        self.emit(&WireRecord::Trace(wire))
    }

    /// Writes one performance record, preceded by the templates, metrics and
    /// symbols it introduces. Samples of metrics the registry does not know
    /// are left out.
    pub fn write_perf(&mut self, perf: &PerfRecord) -> Result<()> {
        let mut samples = Vec::with_capacity(perf.samples.len());
        self.disclose_symbol(perf.scanner_id)?;
        for sample in &perf.samples {
            if !self.disclose_metric(sample.metric_id)? {
                continue;
            }
            for key in sample.attrs.keys() {
                self.disclose_symbol(*key)?;
            }
            samples.push(WireSample {
                metric_id: sample.metric_id,
                value: sample.value,
                attrs: sample
                    .attrs
                    .iter()
                    .map(|(k, v)| (*k, v.clone()))
                    .collect(),
            });
        }
        self.emit(&WireRecord::Perf(WirePerf {
            clock: perf.clock,
            scanner_id: perf.scanner_id,
            samples,
        }))
    }

    /// Discloses a metric and its template if needed. Returns false if the
    /// metric is unknown.
    fn disclose_metric(&mut self, id: u32) -> Result<bool> {
        if self.disclosure.knows_metric(id) {
            return Ok(true);
        }
        let Some(def) = self.metrics.metric(id) else {
            warn!(metric = id, "sample of unregistered metric dropped");
            return Ok(false);
        };
        if !self.disclosure.knows_template(def.template_id) {
            let Some(template) = self.metrics.template(def.template_id) else {
                warn!(
                    metric = id,
                    template = def.template_id,
                    "metric of unregistered template dropped"
                );
                return Ok(false);
            };
            let mut names = Vec::new();
            template.for_each_symbol(&mut |s| names.push(s));
            for s in names {
                self.disclose_symbol(s)?;
            }
            self.disclosure.disclose_template(template.id);
            self.emit(&WireRecord::MetricTemplate(template))?;
        }
        let mut names = Vec::new();
        def.for_each_symbol(&mut |s| names.push(s));
        for s in names {
            self.disclose_symbol(s)?;
        }
        self.disclosure.disclose_metric(id);
        self.emit(&WireRecord::Metric(def))?;
        Ok(true)
    }

    fn disclose_symbol(&mut self, id: SymbolId) -> Result<()> {
        if self.disclosure.disclose_symbol(id) {
            self.emit_symbol(id)?;
        }
        Ok(())
    }

    fn emit_symbol(&mut self, id: SymbolId) -> Result<()> {
        let name = match self.symbols.lookup(id) {
            Some(name) => name.to_string(),
            None => {
                debug!(symbol = %id, "disclosing symbol unknown to the registry");
                UNKNOWN_SYMBOL_NAME.to_string()
            }
        };
        self.emit(&WireRecord::Symbol { id, name })
    }

    fn emit(&mut self, record: &WireRecord) -> Result<()> {
        rmp_serde::encode::write(&mut self.body, record)?;
        self.records += 1;
        Ok(())
    }

    /// Returns the number of records written, definitions included.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Returns the number of symbols disclosed in the current scope.
    pub fn symbols_disclosed(&self) -> usize {
        self.disclosure.symbol_count()
    }

    /// Returns the underlying writer.
    pub fn get_ref(&self) -> &W {
        self.body.get_ref()
    }

    /// Flushes buffered output.
    pub fn flush(&mut self) -> Result<()> {
        self.body.flush()?;
        Ok(())
    }

    /// Ends the stream and returns the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.body.finish()?)
    }
}

/// Per-trace exception identities, keyed by the symbolic exception's `Arc`.
#[derive(Default)]
struct Identities {
    seen: Vec<(Arc<SymbolicException>, u32)>,
}

impl Identities {
    fn encode(&mut self, exception: &Arc<SymbolicException>) -> WireException {
        if let Some((_, identity)) = self.seen.iter().find(|(e, _)| Arc::ptr_eq(e, exception)) {
            return WireException::Ref(*identity);
        }
        let identity = self.seen.len() as u32;
        self.seen.push((Arc::clone(exception), identity));
        WireException::Full {
            identity,
            class_id: exception.class_id,
            message: exception.message.clone(),
            frames: exception
                .frames
                .iter()
                .map(|f| WireFrame {
                    class_id: f.class_id,
                    method_id: f.method_id,
                    file_id: f.file_id,
                    line: f.line,
                })
                .collect(),
            cause: exception.cause.as_ref().map(|c| Box::new(self.encode(c))),
        }
    }
}

fn encode_trace(record: &TraceRecord, identities: &mut Identities) -> WireTrace {
    // Children before the record's own exception.
    let children = record
        .children
        .iter()
        .map(|c| encode_trace(c, identities))
        .collect();
    let exception = record.exception.as_ref().map(|e| identities.encode(e));
    WireTrace {
        class_id: record.class_id,
        method_id: record.method_id,
        signature_id: record.signature_id,
        time: record.time,
        calls: record.calls,
        errors: record.errors,
        flags: record.flags.bits(),
        attrs: record.attrs.iter().map(|(k, v)| (*k, v.clone())).collect(),
        marker: record.marker.as_ref().map(|m| WireMarker {
            trace_id: m.trace_id,
            clock: m.clock,
            minimum_time: m.minimum_time,
            max_records: m.max_records as u64,
            flags: m.flags.bits(),
        }),
        children,
        exception,
    }
}
