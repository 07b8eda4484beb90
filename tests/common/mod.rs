//! Helpers shared by the integration tests.

#![allow(dead_code, unused_imports)]

use calltrace::{MetricRegistry, SymbolRegistry, TraceItem, TraceReader, TraceRecord};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

pub use calltrace::test_utils::{init_test, init_test_logging, memory_builder};

/// A cloneable in-memory writer whose clones share one buffer.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    /// Copies the bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decodes a whole stream into a fresh receiver registry.
pub fn read_stream(bytes: &[u8]) -> (Vec<TraceItem>, Arc<SymbolRegistry>) {
    let symbols = Arc::new(SymbolRegistry::new());
    let mut reader = TraceReader::open(
        bytes,
        Arc::clone(&symbols),
        Arc::new(MetricRegistry::new()),
    )
    .expect("stream header");
    let items = reader.read_all().expect("stream body");
    (items, symbols)
}

/// The trace items of a decoded stream, in order.
pub fn traces(items: &[TraceItem]) -> Vec<&TraceRecord> {
    items
        .iter()
        .filter_map(|item| match item {
            TraceItem::Trace(trace) => Some(trace),
            _ => None,
        })
        .collect()
}
