//! Process-wide tracer state.
//!
//! A [`Tracer`] owns what every instrumented thread shares: the symbol
//! registry, the metric registry, the tunables and the sink. Each thread asks
//! it for its own [`TraceBuilder`].

use crate::config::{TracerConfig, Tunables};
use crate::error::Result;
use crate::metrics::{MetricRegistry, PerfRecord, Scanner};
use crate::sink::{AsyncSink, TraceSink};
use crate::symbol::SymbolRegistry;
use crate::trace::TraceBuilder;
use crate::tracing_compat::info;
use std::sync::Arc;

/// Shared tracer state and builder factory.
#[derive(Clone)]
pub struct Tracer {
    config: TracerConfig,
    symbols: Arc<SymbolRegistry>,
    metrics: Arc<MetricRegistry>,
    tunables: Arc<Tunables>,
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    /// Creates a tracer that submits to `sink`.
    pub fn new(config: TracerConfig, sink: Arc<dyn TraceSink>) -> Result<Self> {
        Self::with_registries(
            config,
            sink,
            Arc::new(SymbolRegistry::new()),
            Arc::new(MetricRegistry::new()),
        )
    }

    fn with_registries(
        config: TracerConfig,
        sink: Arc<dyn TraceSink>,
        symbols: Arc<SymbolRegistry>,
        metrics: Arc<MetricRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let tunables = Arc::new(Tunables::from_config(&config));
        Ok(Self {
            config,
            symbols,
            metrics,
            tunables,
            sink,
        })
    }

    /// Creates a tracer together with the background sink its config
    /// describes. The returned sink handle is the one to shut down.
    pub fn start(config: TracerConfig) -> Result<(Self, Arc<AsyncSink>)> {
        config.validate()?;
        let symbols = Arc::new(SymbolRegistry::new());
        let metrics = Arc::new(MetricRegistry::new());
        let sink = Arc::new(AsyncSink::from_config(
            &config,
            Arc::clone(&symbols),
            Arc::clone(&metrics),
        )?);
        info!(agent = %config.agent_name, "tracer started");
        let tracer = Self::with_registries(
            config,
            Arc::clone(&sink) as Arc<dyn TraceSink>,
            symbols,
            metrics,
        )?;
        Ok((tracer, sink))
    }

    /// Returns a new builder for the calling thread.
    pub fn builder(&self) -> TraceBuilder {
        TraceBuilder::new(
            Arc::clone(&self.symbols),
            Arc::clone(&self.tunables),
            Arc::clone(&self.sink),
        )
    }

    /// Creates a scanner whose name is interned in the symbol registry.
    pub fn scanner(&self, name: &str) -> Scanner {
        Scanner::new(self.symbols.id_of(name))
    }

    /// Hands a perf record to the sink. Empty records are not sent.
    pub fn submit_perf(&self, record: PerfRecord) -> bool {
        if record.is_empty() {
            return false;
        }
        self.sink.submit_perf(record)
    }

    /// The config the tracer was created from.
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// The shared symbol registry.
    pub fn symbols(&self) -> &Arc<SymbolRegistry> {
        &self.symbols
    }

    /// The shared metric registry.
    pub fn metrics(&self) -> &Arc<MetricRegistry> {
        &self.metrics
    }

    /// The live thresholds. Changes apply to every builder on its next event.
    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("agent", &self.config.agent_name)
            .field("symbols", &self.symbols.len())
            .field("tunables", &self.tunables)
            .finish_non_exhaustive()
    }
}
