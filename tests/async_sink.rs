//! Background sink behavior against real outputs.

mod common;

use calltrace::sink::{RotatingFileOutput, StreamOutput};
use calltrace::{
    AsyncSink, MarkerFlags, MetricRegistry, OutputConfig, SinkConfig, SinkOptions, SymbolId,
    SymbolRegistry, Time, TraceRecord, TraceSink, Tracer, TracerConfig,
};
use common::{SharedBuf, init_test, read_stream, traces};
use std::fs;
use std::sync::Arc;
use std::sync::mpsc;

fn record(symbols: &SymbolRegistry, class: &str) -> TraceRecord {
    TraceRecord::new(symbols.id_of(class), symbols.id_of("handle"), SymbolId::NULL)
}

#[test]
fn rotation_starts_self_contained_files() {
    init_test("rotation_starts_self_contained_files");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.ctr");
    let symbols = Arc::new(SymbolRegistry::new());
    // Every item fills the file.
    let output = RotatingFileOutput::new(&path, 1, 3);
    let probe = output.clone();
    let sink = AsyncSink::spawn(
        Box::new(output),
        SinkOptions::default(),
        Arc::clone(&symbols),
        Arc::new(MetricRegistry::new()),
    )
    .unwrap();

    assert!(sink.submit(record(&symbols, "First")));
    assert!(sink.submit(record(&symbols, "Second")));
    let stats = sink.shutdown();
    assert_eq!(stats.written, 2);
    assert_eq!(stats.rotations, 2);
    assert_eq!(stats.errors, 0);

    assert!(!path.exists());
    let newest = fs::read(probe.archive_path(1)).unwrap();
    let oldest = fs::read(probe.archive_path(2)).unwrap();

    // Each file decodes on its own, so the shared `handle` symbol was sent
    // again after rotation.
    let (items, receiver) = read_stream(&newest);
    let second = traces(&items);
    assert_eq!(second.len(), 1);
    assert_eq!(receiver.name(second[0].class_id), "Second");
    assert_eq!(receiver.name(second[0].method_id), "handle");

    let (items, receiver) = read_stream(&oldest);
    let first = traces(&items);
    assert_eq!(receiver.name(first[0].class_id), "First");
    assert_eq!(receiver.name(first[0].method_id), "handle");
}

#[test]
fn full_queue_drops_and_counts() {
    init_test("full_queue_drops_and_counts");
    let symbols = Arc::new(SymbolRegistry::new());
    let (opened_tx, opened_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let buf = SharedBuf::default();
    let target = buf.clone();
    let output = StreamOutput::new("gated", move || {
        let _ = opened_tx.send(());
        let _ = gate_rx.recv();
        Ok(target.clone())
    });
    let sink = AsyncSink::spawn(
        Box::new(output),
        SinkOptions {
            capacity: 2,
            ..SinkOptions::default()
        },
        Arc::clone(&symbols),
        Arc::new(MetricRegistry::new()),
    )
    .unwrap();

    assert!(sink.submit(record(&symbols, "A")));
    // The writer holds the first item and is stuck opening the output.
    opened_rx.recv().unwrap();
    assert!(sink.submit(record(&symbols, "B")));
    assert!(sink.submit(record(&symbols, "C")));
    assert!(!sink.submit(record(&symbols, "D")));
    assert_eq!(sink.pending(), 2);

    gate_tx.send(()).unwrap();
    let stats = sink.shutdown();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.written, 3);

    let (items, receiver) = read_stream(&buf.bytes());
    let names: Vec<String> = traces(&items)
        .iter()
        .map(|t| receiver.name(t.class_id))
        .collect();
    assert_eq!(names, ["A", "B", "C"]);
}

#[test]
fn tracer_writes_to_configured_file() {
    init_test("tracer_writes_to_configured_file");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("agent.ctr");
    let config = TracerConfig {
        agent_name: "e2e".to_string(),
        min_method_time_ns: 0,
        min_trace_time_ms: 0,
        sink: SinkConfig {
            output: OutputConfig::File {
                path: path.clone(),
                max_size: 1 << 20,
                max_archives: 2,
            },
            ..SinkConfig::default()
        },
        ..TracerConfig::default()
    };
    let (tracer, sink) = Tracer::start(config).unwrap();

    let symbols = tracer.symbols();
    let mut b = tracer.builder();
    b.enter(symbols.id_of("Job"), symbols.id_of("run"), SymbolId::NULL, Time::from_nanos(0));
    b.begin(symbols.id_of("nightly"), 0, MarkerFlags::empty());
    b.enter(symbols.id_of("Step"), symbols.id_of("exec"), SymbolId::NULL, Time::from_nanos(5));
    b.return_(Time::from_nanos(20));
    b.return_(Time::from_nanos(30));
    assert_eq!(b.stats().submitted, 1);

    let stats = sink.shutdown();
    assert_eq!(stats.written, 1);

    let (items, receiver) = read_stream(&fs::read(&path).unwrap());
    let tree = traces(&items)[0];
    assert_eq!(receiver.name(tree.class_id), "Job");
    assert_eq!(receiver.name(tree.children[0].class_id), "Step");
    assert_eq!(tree.calls, 2);
}
