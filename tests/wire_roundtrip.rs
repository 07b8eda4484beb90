//! Builder output through the stream writer and back through the reader.

mod common;

use calltrace::trace::ThrownFrame;
use calltrace::wire::{PLAIN_MAGIC, WireRecord};
use calltrace::{
    Framing, MarkerFlags, MetricKind, MetricRegistry, MetricTemplate, RecordFlags, Scanner,
    SymbolId, SymbolRegistry, Throwable, Time, TraceItem, TraceReader, TraceRecord, TraceWriter,
};
use common::{init_test, memory_builder, read_stream, traces};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Root `Service.handle` with one child `Dao.load` that throws an
/// `IOException`; the root wraps it in a `ServiceException`.
fn failing_request() -> (TraceRecord, Arc<SymbolRegistry>) {
    let (mut b, sink, symbols) = memory_builder(100);
    let io = Arc::new(
        Throwable::new("java.io.IOException", Some("disk gone"))
            .with_frame(ThrownFrame::new("Dao", "load", Some("Dao.java"), 42))
            .with_frame(ThrownFrame::new("Service", "handle", None, -1)),
    );
    let wrapped = Arc::new(
        Throwable::new("ServiceException", Some("load failed")).with_cause(Arc::clone(&io)),
    );

    b.enter(
        symbols.id_of("Service"),
        symbols.id_of("handle"),
        symbols.id_of("()V"),
        Time::from_nanos(0),
    );
    b.begin(symbols.id_of("HTTP /orders"), 1_700_000_000_000, MarkerFlags::empty());
    b.attr(symbols.id_of("http.status"), 500_i64);
    b.attr(symbols.id_of("http.path"), "/orders");
    b.attr(symbols.id_of("load"), 0.75);
    b.attr(symbols.id_of("cached"), false);
    b.enter(
        symbols.id_of("Dao"),
        symbols.id_of("load"),
        symbols.id_of("(J)V"),
        Time::from_nanos(10),
    );
    b.error(&io, Time::from_nanos(900));
    b.error(&wrapped, Time::from_nanos(1_000));

    let mut traces = sink.take();
    assert_eq!(traces.len(), 1);
    (traces.remove(0), symbols)
}

fn encode(
    trees: &[&TraceRecord],
    framing: Framing,
    symbols: &Arc<SymbolRegistry>,
) -> Vec<u8> {
    let mut writer = TraceWriter::start(
        Vec::new(),
        framing,
        "roundtrip",
        0,
        Arc::clone(symbols),
        Arc::new(MetricRegistry::new()),
    )
    .unwrap();
    for tree in trees {
        writer.write_trace(tree).unwrap();
    }
    writer.finish().unwrap()
}

/// Raw records of a plain stream, definitions included.
fn raw_records(bytes: &[u8]) -> Vec<WireRecord> {
    assert_eq!(&bytes[..4], &PLAIN_MAGIC);
    let mut body = &bytes[4..];
    let mut records = Vec::new();
    while !body.is_empty() {
        records.push(rmp_serde::from_read(&mut body).unwrap());
    }
    records
}

#[test]
fn tree_survives_the_wire() {
    init_test("tree_survives_the_wire");
    let (tree, symbols) = failing_request();
    let bytes = encode(&[&tree], Framing::Plain, &symbols);

    let (items, receiver) = read_stream(&bytes);
    assert!(matches!(&items[0], TraceItem::Handshake(h) if h.agent == "roundtrip"));
    let decoded = traces(&items);
    assert_eq!(decoded.len(), 1);
    let decoded = decoded[0];
    assert_eq!(decoded, &tree);

    assert_eq!(receiver.name(decoded.class_id), "Service");
    assert_eq!(receiver.name(decoded.children[0].method_id), "load");
    assert_eq!(
        receiver.name(decoded.marker.as_ref().unwrap().trace_id),
        "HTTP /orders"
    );
}

#[test]
fn exception_identity_is_rebuilt() {
    init_test("exception_identity_is_rebuilt");
    let (tree, symbols) = failing_request();
    let bytes = encode(&[&tree], Framing::Plain, &symbols);

    let records = raw_records(&bytes);
    let WireRecord::Trace(wire) = records.last().unwrap() else {
        panic!("last record is not a trace");
    };
    assert!(matches!(
        wire.children[0].exception,
        Some(calltrace::wire::WireException::Full { identity: 0, .. })
    ));

    let (items, _) = read_stream(&bytes);
    let root = traces(&items)[0];
    let inner = root.children[0].exception.as_ref().unwrap();
    let outer = root.exception.as_ref().unwrap();
    assert!(root.has_flags(RecordFlags::EXCEPTION_WRAP));
    assert!(outer.is_caused_by(inner));
    assert_eq!(inner.frames.len(), 2);
    assert_eq!(inner.frames[0].line, 42);
    assert!(inner.frames[1].file_id.is_null());
}

#[test]
fn rethrown_exception_is_sent_once() {
    init_test("rethrown_exception_is_sent_once");
    let (mut b, sink, symbols) = memory_builder(100);
    let e = Arc::new(Throwable::new("RuntimeException", Some("x")));
    b.enter(symbols.id_of("Outer"), symbols.id_of("run"), SymbolId::NULL, Time::from_nanos(0));
    b.begin(symbols.id_of("job"), 0, MarkerFlags::empty());
    b.enter(symbols.id_of("Inner"), symbols.id_of("run"), SymbolId::NULL, Time::from_nanos(1));
    b.error(&e, Time::from_nanos(5));
    b.error(&e, Time::from_nanos(9));
    let tree = sink.take().remove(0);

    let bytes = encode(&[&tree], Framing::Plain, &symbols);
    let records = raw_records(&bytes);
    let WireRecord::Trace(wire) = records.last().unwrap() else {
        panic!("last record is not a trace");
    };
    assert_eq!(wire.exception, Some(calltrace::wire::WireException::Ref(0)));
    assert!(RecordFlags::from_bits_truncate(wire.flags).contains(RecordFlags::EXCEPTION_PASS));

    let (items, _) = read_stream(&bytes);
    let root = traces(&items)[0];
    assert!(Arc::ptr_eq(
        root.exception.as_ref().unwrap(),
        root.children[0].exception.as_ref().unwrap()
    ));
}

#[test]
fn symbols_are_defined_once_per_stream() {
    init_test("symbols_are_defined_once_per_stream");
    let symbols = Arc::new(SymbolRegistry::new());
    let a = TraceRecord::new(symbols.id_of("A"), symbols.id_of("run"), SymbolId::NULL);
    let b = TraceRecord::new(symbols.id_of("B"), symbols.id_of("run"), SymbolId::NULL);
    let run = symbols.id_of("run");

    let mut writer = TraceWriter::start(
        Vec::new(),
        Framing::Plain,
        "once",
        0,
        Arc::clone(&symbols),
        Arc::new(MetricRegistry::new()),
    )
    .unwrap();
    writer.write_trace(&a).unwrap();
    writer.write_trace(&b).unwrap();
    writer.reset(1).unwrap();
    writer.write_trace(&b).unwrap();
    let bytes = writer.finish().unwrap();

    let definitions_of_run: Vec<usize> = raw_records(&bytes)
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, WireRecord::Symbol { id, .. } if *id == run))
        .map(|(i, _)| i)
        .collect();
    // Once before the first trace, again after the reset.
    assert_eq!(definitions_of_run.len(), 2);

    let (items, receiver) = read_stream(&bytes);
    assert_eq!(traces(&items).len(), 3);
    assert_eq!(receiver.name(run), "run");
}

#[cfg(feature = "trace-compression")]
#[test]
fn compressed_stream_round_trips() {
    init_test("compressed_stream_round_trips");
    let (tree, symbols) = failing_request();
    let bytes = encode(&[&tree, &tree], Framing::Compressed, &symbols);
    assert_eq!(&bytes[..4], b"CTZ1");

    let (items, _) = read_stream(&bytes);
    let decoded = traces(&items);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[1], &tree);
}

#[test]
fn perf_records_carry_their_definitions() {
    init_test("perf_records_carry_their_definitions");
    let symbols = Arc::new(SymbolRegistry::new());
    let metrics = Arc::new(MetricRegistry::new());
    let template = metrics.register_template(
        MetricTemplate::new(
            MetricKind::RawDelta,
            symbols.id_of("gc.count"),
            symbols.id_of("collections"),
        )
        .with_attr(symbols.id_of("gc.name")),
    );
    let mut attrs = BTreeMap::new();
    attrs.insert(symbols.id_of("gc.name"), "G1 Young".to_string());
    let metric = metrics
        .register_metric(template.id, symbols.id_of("gc.count.young"), attrs)
        .unwrap();
    let mut scanner = Scanner::new(symbols.id_of("jvm"));
    scanner.add(metric);

    let first = scanner.scan(1_000, |_| Some(10.0));
    assert!(first.is_empty());
    let second = scanner.scan(2_000, |_| Some(14.0));
    assert_eq!(second.samples[0].value, 4.0);

    let mut writer = TraceWriter::start(
        Vec::new(),
        Framing::Plain,
        "perf",
        0,
        Arc::clone(&symbols),
        Arc::clone(&metrics),
    )
    .unwrap();
    writer.write_perf(&second).unwrap();
    writer.write_perf(&second).unwrap();
    let bytes = writer.finish().unwrap();

    let templates = raw_records(&bytes)
        .iter()
        .filter(|r| matches!(r, WireRecord::MetricTemplate(_)))
        .count();
    assert_eq!(templates, 1);

    let receiver_metrics = Arc::new(MetricRegistry::new());
    let mut reader = TraceReader::open(
        bytes.as_slice(),
        Arc::new(SymbolRegistry::new()),
        Arc::clone(&receiver_metrics),
    )
    .unwrap();
    let items = reader.read_all().unwrap();
    let perf: Vec<_> = items
        .iter()
        .filter_map(|i| match i {
            TraceItem::Perf(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(perf.len(), 2);
    assert_eq!(perf[0], &second);
    assert_eq!(receiver_metrics.template_count(), 1);
    assert_eq!(receiver_metrics.metric_count(), 1);
}
