//! Helpers shared by unit and integration tests.

use crate::config::Tunables;
use crate::sink::{MemorySink, TraceSink};
use crate::symbol::SymbolRegistry;
use crate::trace::TraceBuilder;
use std::sync::{Arc, Once};

static INIT_LOGGING: Once = Once::new();

/// Installs a test subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `calltrace=debug`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("calltrace=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Logs the start of a named test after making sure logging is set up.
pub fn init_test(name: &str) {
    init_test_logging();
    tracing::info!(test = name, "test start");
}

/// A builder wired to an in-memory sink with zero time thresholds, so every
/// closed frame is kept and every trace is submitted.
pub fn memory_builder(max_records: usize) -> (TraceBuilder, Arc<MemorySink>, Arc<SymbolRegistry>) {
    let registry = Arc::new(SymbolRegistry::new());
    let tunables = Arc::new(Tunables::new(0, 0, max_records, false));
    let sink = Arc::new(MemorySink::new());
    let builder = TraceBuilder::new(
        Arc::clone(&registry),
        tunables,
        Arc::clone(&sink) as Arc<dyn TraceSink>,
    );
    (builder, sink, registry)
}
