//! Queue-backed sink with a dedicated writer thread.
//!
//! Application threads push finished items into a bounded lock-free queue and
//! return immediately; a full queue drops the item. A single writer thread
//! drains the queue, encodes items with a [`TraceWriter`] and writes them to a
//! [`TraceOutput`].
//!
//! Delivery is at most once. When a write fails the item is lost, the stream
//! is abandoned, and the next item opens the output again with a fresh
//! stream. When a stream reaches the output's rotation threshold it is
//! finished and the output rotated; the next item starts a new stream, so
//! every definition is disclosed again.

use super::TraceSink;
use super::output::{NullOutput, RotatingFileOutput, TraceOutput};
use crate::config::{OutputConfig, SinkConfig, TracerConfig};
use crate::error::Result;
use crate::metrics::{MetricRegistry, PerfRecord};
use crate::symbol::SymbolRegistry;
use crate::trace::TraceRecord;
use crate::tracing_compat::{debug, error, info};
use crate::wire::{Framing, TraceWriter};
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex, RwLock};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest time the writer sleeps without checking the queue.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Snapshot of a sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Items accepted into the queue.
    pub submitted: u64,
    /// Items refused because the queue was full or the sink shut down.
    pub dropped: u64,
    /// Items written to the output.
    pub written: u64,
    /// Items lost to encoding or I/O failures.
    pub errors: u64,
    /// Completed output rotations.
    pub rotations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    errors: AtomicU64,
    rotations: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SinkStats {
        SinkStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }
}

enum SinkItem {
    Trace(TraceRecord),
    Perf(PerfRecord),
}

struct Shared {
    queue: ArrayQueue<SinkItem>,
    running: AtomicBool,
    /// Held shared while pushing, exclusively while stopping, so no push can
    /// land after the writer's last drain.
    gate: RwLock<()>,
    idle: Mutex<()>,
    wakeup: Condvar,
    counters: Counters,
}

/// Options for an [`AsyncSink`].
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Queue capacity.
    pub capacity: usize,
    /// Stream body framing.
    pub framing: Framing,
    /// Agent name announced in each stream's handshake.
    pub agent: String,
}

impl Default for SinkOptions {
    fn default() -> Self {
        let config = SinkConfig::default();
        Self {
            capacity: config.queue_capacity,
            framing: Framing::Plain,
            agent: TracerConfig::default().agent_name,
        }
    }
}

/// Sink that hands items to a background writer thread.
pub struct AsyncSink {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    describe: String,
}

impl AsyncSink {
    /// Starts the writer thread for `output`.
    pub fn spawn(
        output: Box<dyn TraceOutput>,
        options: SinkOptions,
        symbols: Arc<SymbolRegistry>,
        metrics: Arc<MetricRegistry>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(options.capacity.max(1)),
            running: AtomicBool::new(true),
            gate: RwLock::new(()),
            idle: Mutex::new(()),
            wakeup: Condvar::new(),
            counters: Counters::default(),
        });
        let describe = output.describe();
        let state = WriterState {
            output,
            writer: None,
            framing: options.framing,
            agent: options.agent,
            symbols,
            metrics,
        };

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("calltrace-writer".to_string())
            .spawn(move || writer_loop(&worker_shared, state))?;

        info!(output = %describe, capacity = options.capacity, "trace sink started");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            describe,
        })
    }

    /// Starts a sink as described by `config`.
    pub fn from_config(
        config: &TracerConfig,
        symbols: Arc<SymbolRegistry>,
        metrics: Arc<MetricRegistry>,
    ) -> Result<Self> {
        let output: Box<dyn TraceOutput> = match &config.sink.output {
            OutputConfig::Null => Box::new(NullOutput),
            OutputConfig::File {
                path,
                max_size,
                max_archives,
            } => Box::new(RotatingFileOutput::new(path, *max_size, *max_archives)),
        };
        let options = SinkOptions {
            capacity: config.sink.queue_capacity,
            framing: if config.sink.compress {
                Framing::Compressed
            } else {
                Framing::Plain
            },
            agent: config.agent_name.clone(),
        };
        Ok(Self::spawn(output, options, symbols, metrics)?)
    }

    fn enqueue(&self, item: SinkItem) -> bool {
        let counters = &self.shared.counters;
        let _open = self.shared.gate.read();
        if !self.shared.running.load(Ordering::Acquire) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.shared.queue.push(item) {
            Ok(()) => {
                counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.shared.wakeup.notify_one();
                true
            }
            Err(_) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Returns the number of items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SinkStats {
        self.shared.counters.snapshot()
    }

    /// Returns true until [`shutdown`](Self::shutdown) is called.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops accepting items, writes everything already queued, ends the
    /// stream and joins the writer thread. Calling it again does nothing.
    pub fn shutdown(&self) -> SinkStats {
        {
            let _closed = self.shared.gate.write();
            self.shared.running.store(false, Ordering::Release);
        }
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(output = %self.describe, "trace writer thread panicked");
            }
        }
        self.stats()
    }
}

impl TraceSink for AsyncSink {
    fn submit(&self, record: TraceRecord) -> bool {
        self.enqueue(SinkItem::Trace(record))
    }

    fn submit_perf(&self, record: PerfRecord) -> bool {
        self.enqueue(SinkItem::Perf(record))
    }
}

impl Drop for AsyncSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSink")
            .field("output", &self.describe)
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn writer_loop(shared: &Shared, mut state: WriterState) {
    loop {
        let mut wrote = false;
        while let Some(item) = shared.queue.pop() {
            state.write(item, &shared.counters);
            wrote = true;
        }
        if wrote {
            state.flush(&shared.counters);
        }
        if !shared.running.load(Ordering::Acquire) {
            // Items pushed before the gate closed.
            while let Some(item) = shared.queue.pop() {
                state.write(item, &shared.counters);
            }
            break;
        }
        let mut idle = shared.idle.lock();
        if shared.queue.is_empty() && shared.running.load(Ordering::Acquire) {
            shared.wakeup.wait_for(&mut idle, IDLE_WAIT);
        }
    }
    state.finish(&shared.counters);
    debug!("trace writer stopped");
}

/// Counts bytes written through it.
struct CountingWriter {
    inner: Box<dyn Write + Send>,
    bytes: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct WriterState {
    output: Box<dyn TraceOutput>,
    writer: Option<TraceWriter<CountingWriter>>,
    framing: Framing,
    agent: String,
    symbols: Arc<SymbolRegistry>,
    metrics: Arc<MetricRegistry>,
}

impl WriterState {
    fn stream(&mut self) -> Result<&mut TraceWriter<CountingWriter>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                let inner = self.output.open()?;
                debug!(output = %self.output.describe(), "trace stream opened");
                TraceWriter::start(
                    CountingWriter { inner, bytes: 0 },
                    self.framing,
                    self.agent.clone(),
                    now_millis(),
                    Arc::clone(&self.symbols),
                    Arc::clone(&self.metrics),
                )?
            }
        };
        Ok(self.writer.insert(writer))
    }

    fn write(&mut self, item: SinkItem, counters: &Counters) {
        let result = self.stream().and_then(|writer| match &item {
            SinkItem::Trace(record) => writer.write_trace(record),
            SinkItem::Perf(record) => writer.write_perf(record),
        });
        match result {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                self.rotate_if_full(counters);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(output = %self.output.describe(), error = %e, "trace write failed, reopening");
                self.writer = None;
            }
        }
    }

    fn rotate_if_full(&mut self, counters: &Counters) {
        let Some(threshold) = self.output.rotation_threshold() else {
            return;
        };
        let full = self
            .writer
            .as_ref()
            .is_some_and(|w| w.get_ref().bytes >= threshold);
        if !full {
            return;
        }
        self.finish(counters);
        match self.output.rotate() {
            Ok(()) => {
                counters.rotations.fetch_add(1, Ordering::Relaxed);
                debug!(output = %self.output.describe(), "trace output rotated");
            }
            Err(e) => {
                error!(output = %self.output.describe(), error = %e, "trace output rotation failed");
            }
        }
    }

    fn flush(&mut self, counters: &Counters) {
        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.flush() {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(output = %self.output.describe(), error = %e, "trace flush failed, reopening");
                self.writer = None;
            }
        }
    }

    fn finish(&mut self, counters: &Counters) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(output = %self.output.describe(), error = %e, "trace stream did not close cleanly");
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StreamOutput;
    use crate::types::SymbolId;
    use crate::wire::{TraceItem, TraceReader};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn spawn_into(buf: &SharedBuf, symbols: &Arc<SymbolRegistry>) -> AsyncSink {
        let target = buf.clone();
        AsyncSink::spawn(
            Box::new(StreamOutput::new("buffer", move || Ok(target.clone()))),
            SinkOptions {
                capacity: 16,
                ..SinkOptions::default()
            },
            Arc::clone(symbols),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn writes_submitted_traces() {
        let symbols = Arc::new(SymbolRegistry::new());
        let buf = SharedBuf::default();
        let sink = spawn_into(&buf, &symbols);

        let record = TraceRecord::new(symbols.id("A"), symbols.id("run"), SymbolId::NULL);
        assert!(sink.submit(record.clone()));
        assert!(sink.submit(record));
        let stats = sink.shutdown();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.errors, 0);

        let bytes = buf.0.lock().clone();
        let mut reader = TraceReader::open(
            bytes.as_slice(),
            Arc::new(SymbolRegistry::new()),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();
        let items = reader.read_all().unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], TraceItem::Handshake(_)));
    }

    #[test]
    fn submit_after_shutdown_is_dropped() {
        let symbols = Arc::new(SymbolRegistry::new());
        let sink = spawn_into(&SharedBuf::default(), &symbols);
        sink.shutdown();
        assert!(!sink.is_running());
        assert!(!sink.submit(TraceRecord::default()));
        assert_eq!(sink.stats().dropped, 1);
        // Idempotent.
        sink.shutdown();
    }

    #[test]
    fn failed_open_is_counted_and_retried() {
        let symbols = Arc::new(SymbolRegistry::new());
        let target = SharedBuf::default();
        let out = target.clone();
        let mut attempts = 0;
        let output = StreamOutput::new("flaky", move || {
            attempts += 1;
            if attempts == 1 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "down"))
            } else {
                Ok(out.clone())
            }
        });
        let sink = AsyncSink::spawn(
            Box::new(output),
            SinkOptions::default(),
            Arc::clone(&symbols),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();

        let record = TraceRecord::new(symbols.id("A"), SymbolId::NULL, SymbolId::NULL);
        sink.submit(record.clone());
        sink.submit(record);
        let stats = sink.shutdown();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.written, 1);
        assert!(target.0.lock().starts_with(b"CTR1"));
    }

    #[test]
    fn submits_racing_shutdown_are_written_or_refused() {
        crate::test_utils::init_test_logging();
        let symbols = Arc::new(SymbolRegistry::new());
        let buf = SharedBuf::default();
        let sink = spawn_into(&buf, &symbols);
        let record = TraceRecord::new(symbols.id("A"), SymbolId::NULL, SymbolId::NULL);

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while sink.is_running() {
                        sink.submit(record.clone());
                    }
                    // Refused once the sink is stopped.
                    assert!(!sink.submit(record.clone()));
                });
            }
            thread::sleep(Duration::from_millis(20));
            sink.shutdown();
        });
        let stats = sink.stats();
        assert!(stats.submitted > 0);
        assert_eq!(stats.submitted, stats.written + stats.errors);
        assert_eq!(sink.pending(), 0);

        let bytes = buf.0.lock().clone();
        let mut reader = TraceReader::open(
            bytes.as_slice(),
            Arc::new(SymbolRegistry::new()),
            Arc::new(MetricRegistry::new()),
        )
        .unwrap();
        let traces = reader
            .read_all()
            .unwrap()
            .into_iter()
            .filter(|item| matches!(item, TraceItem::Trace(_)))
            .count();
        assert_eq!(traces as u64, stats.written);
    }
}
