//! Tracer configuration.
//!
//! [`TracerConfig`] is the plain, deserializable description of a tracer:
//! thresholds, record budget and where finished traces go. The thresholds
//! that trace builders consult on every event are copied into [`Tunables`],
//! a set of atomics shared by `Arc` so they can be adjusted at runtime
//! without locking the instrumented threads.
//!
//! With the `config-file` feature a config can be loaded from TOML:
//!
//! ```toml
//! agent_name = "checkout-service"
//! min_method_time_ns = 100000
//! min_trace_time_ms = 20
//! max_records = 2048
//!
//! [sink]
//! queue_capacity = 512
//! compress = true
//!
//! [sink.output]
//! kind = "file"
//! path = "/var/log/traces/trace.ctr"
//! max_size = 16777216
//! max_archives = 4
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Default minimum duration for a method to stay in a tree (250us).
pub const DEFAULT_MIN_METHOD_TIME_NS: u64 = 250_000;
/// Default minimum duration for a trace to be submitted.
pub const DEFAULT_MIN_TRACE_TIME_MS: u64 = 50;
/// Default per-trace record budget.
pub const DEFAULT_MAX_RECORDS: usize = 4096;
/// Default capacity of the sink queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default rotation size for file output (8 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 8 * 1024 * 1024;
/// Default number of rotated archives kept next to a trace file.
pub const DEFAULT_MAX_ARCHIVES: usize = 8;

/// Where the sink writes finished traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Serialize and discard. Useful for overhead measurements.
    Null,
    /// Rotating trace file.
    File {
        /// Active file; archives are written next to it as `<path>.N`.
        path: PathBuf,
        /// Size in bytes after which the file is rotated.
        #[serde(default = "default_max_size")]
        max_size: u64,
        /// Number of archives to keep.
        #[serde(default = "default_max_archives")]
        max_archives: usize,
    },
}

const fn default_max_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

const fn default_max_archives() -> usize {
    DEFAULT_MAX_ARCHIVES
}

/// Output sink selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Output destination.
    pub output: OutputConfig,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Compress the stream body with LZ4 framing.
    pub compress: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::Null,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            compress: false,
        }
    }
}

/// Complete tracer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Name announced in each stream's handshake.
    pub agent_name: String,
    /// Methods running at most this long (ns) are dropped from trees.
    pub min_method_time_ns: u64,
    /// Traces shorter than this (ms) are not submitted.
    pub min_trace_time_ms: u64,
    /// Live-record budget per trace.
    pub max_records: usize,
    /// Retain every method regardless of duration.
    pub all_methods: bool,
    /// Output sink.
    pub sink: SinkConfig,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            agent_name: "calltrace".to_string(),
            min_method_time_ns: DEFAULT_MIN_METHOD_TIME_NS,
            min_trace_time_ms: DEFAULT_MIN_TRACE_TIME_MS,
            max_records: DEFAULT_MAX_RECORDS,
            all_methods: false,
            sink: SinkConfig::default(),
        }
    }
}

impl TracerConfig {
    /// Checks the config for values the tracer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(Error::Config("max_records must be at least 1".into()));
        }
        if self.sink.queue_capacity == 0 {
            return Err(Error::Config("sink.queue_capacity must be at least 1".into()));
        }
        if let OutputConfig::File { path, max_size, .. } = &self.sink.output {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("sink.output.path must not be empty".into()));
            }
            if *max_size == 0 {
                return Err(Error::Config("sink.output.max_size must be non-zero".into()));
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML config.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Returns the minimum trace time in nanoseconds.
    #[must_use]
    pub const fn min_trace_time_ns(&self) -> u64 {
        self.min_trace_time_ms.saturating_mul(1_000_000)
    }
}

/// Thresholds read by trace builders on every event.
///
/// Reads are lock-free; updates are rare and take effect for the next event
/// on every thread.
#[derive(Debug)]
pub struct Tunables {
    min_method_time: AtomicU64,
    min_trace_time: AtomicU64,
    max_records: AtomicUsize,
    all_methods: AtomicBool,
}

impl Tunables {
    /// Creates tunables from explicit values. Times are in nanoseconds.
    #[must_use]
    pub const fn new(
        min_method_time: u64,
        min_trace_time: u64,
        max_records: usize,
        all_methods: bool,
    ) -> Self {
        Self {
            min_method_time: AtomicU64::new(min_method_time),
            min_trace_time: AtomicU64::new(min_trace_time),
            max_records: AtomicUsize::new(max_records),
            all_methods: AtomicBool::new(all_methods),
        }
    }

    /// Creates tunables from a config.
    #[must_use]
    pub fn from_config(config: &TracerConfig) -> Self {
        Self::new(
            config.min_method_time_ns,
            config.min_trace_time_ns(),
            config.max_records,
            config.all_methods,
        )
    }

    /// Minimum method time in nanoseconds.
    #[inline]
    pub fn min_method_time(&self) -> u64 {
        self.min_method_time.load(Ordering::Relaxed)
    }

    /// Minimum trace time in nanoseconds, for root markers.
    #[inline]
    pub fn min_trace_time(&self) -> u64 {
        self.min_trace_time.load(Ordering::Relaxed)
    }

    /// Record budget for root markers and for frames outside any trace.
    #[inline]
    pub fn max_records(&self) -> usize {
        self.max_records.load(Ordering::Relaxed)
    }

    /// Whether root markers get `ALL_METHODS` by default.
    #[inline]
    pub fn all_methods(&self) -> bool {
        self.all_methods.load(Ordering::Relaxed)
    }

    /// Sets the minimum method time (ns).
    pub fn set_min_method_time(&self, nanos: u64) {
        self.min_method_time.store(nanos, Ordering::Relaxed);
    }

    /// Sets the minimum trace time (ns).
    pub fn set_min_trace_time(&self, nanos: u64) {
        self.min_trace_time.store(nanos, Ordering::Relaxed);
    }

    /// Sets the record budget. Zero is raised to one.
    pub fn set_max_records(&self, max: usize) {
        self.max_records.store(max.max(1), Ordering::Relaxed);
    }

    /// Sets the default all-methods flag.
    pub fn set_all_methods(&self, enabled: bool) {
        self.all_methods.store(enabled, Ordering::Relaxed);
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from_config(&TracerConfig::default())
    }
}
