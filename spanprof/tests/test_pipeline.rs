use spanprof::activator::Pipeline;
use spanprof::config::{Configuration, DataFormat};
use spanprof::context::SpanRegistry;
use spanprof::domain::{SpanContext, SpanId, ThreadId, TraceId};
use spanprof::export::pprof::{decode_profile, SPAN_ID_LABEL, TRACE_ID_LABEL};
use spanprof::export::{
    DATA_FORMAT, DATA_TYPE, MEMORY_ALLOCATED, MEMORY_ALLOCATION_TYPE, SOURCE_EVENT_NAME,
};
use spanprof::logs::{InMemorySink, JsonLinesSink, LogSink};
use spanprof::native::{BufferedProfiler, NativeProfiler, RecordingRequest};
use spanprof_common::{
    RawAllocation, RawContextChange, RawEvent, RawFrame, RawThreadSample, RecordingHeader,
    RecordingWriter, ALLOCATION_SAMPLED, THREAD_STATE_RUNNABLE,
};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TRACE: [u8; 16] = [0x4b; 16];
const SPAN: [u8; 8] = [0x5c; 8];

fn thread(id: u64, name: &str) -> RawThreadSample {
    RawThreadSample {
        thread_id: id,
        thread_name: name.to_string(),
        state: THREAD_STATE_RUNNABLE,
        frames: vec![
            RawFrame::new("myapp::db::query").with_location("src/db.rs", 88),
            RawFrame::new("core::ops::function::FnOnce::call_once"),
            RawFrame::new("myapp::handler::process").with_location("src/handler.rs", 12),
        ],
    }
}

fn context(time: u64, thread_id: u64, entering: bool) -> RawEvent {
    RawEvent::ContextAttached(RawContextChange {
        timestamp_nanos: time,
        thread_id,
        trace_id: TRACE,
        span_id: SPAN,
        trace_flags: 1,
        entering,
    })
}

/// Thread 7 runs inside a span during the first dump; thread 8 never does.
fn sample_events() -> Vec<RawEvent> {
    vec![
        context(1_000, 7, true),
        RawEvent::ThreadDump { timestamp_nanos: 2_000, threads: vec![thread(7, "worker-7"), thread(8, "worker-8")] },
        RawEvent::Allocation(RawAllocation {
            timestamp_nanos: 2_500,
            thread_id: 7,
            thread_name: "worker-7".to_string(),
            kind: ALLOCATION_SAMPLED,
            object_type: "Vec<u8>".to_string(),
            allocation_size: 512,
            tlab_size: 0,
            weight: 4096,
            frames: thread(7, "worker-7").frames,
        }),
        context(3_000, 7, false),
        RawEvent::ThreadDump { timestamp_nanos: 4_000, threads: vec![thread(7, "worker-7")] },
    ]
}

fn write_recording(path: &Path, events: &[RawEvent]) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut writer = RecordingWriter::new(file, RecordingHeader::new(0)).unwrap();
    for event in events {
        writer.write_event(event).unwrap();
    }
    writer.finish().unwrap();
}

fn config(cpu: DataFormat, allocation: DataFormat) -> Configuration {
    Configuration {
        enabled: true,
        memory_enabled: true,
        cpu_data_format: cpu,
        allocation_data_format: allocation,
        ..Configuration::default()
    }
}

fn run_pipeline(config: &Configuration, sink: Arc<dyn LogSink>, paths: &[PathBuf]) -> Vec<PathBuf> {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let seen = finished.clone();
    let pipeline = Pipeline::new(config, sink, Arc::new(SpanRegistry::new())).unwrap();
    let (mut handler, pipeline) =
        pipeline.into_path_handler(Box::new(move |path| seen.lock().unwrap().push(path.to_path_buf())));
    for path in paths {
        handler.accept(path);
    }
    pipeline.shutdown();
    let finished = finished.lock().unwrap().clone();
    finished
}

#[test]
fn test_text_records_carry_span_of_sampled_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    write_recording(&path, &sample_events());

    let sink = Arc::new(InMemorySink::new());
    let finished = run_pipeline(&config(DataFormat::Text, DataFormat::Text), sink.clone(), &[path.clone()]);
    assert_eq!(finished, vec![path]);

    let records = sink.records();
    let cpu: Vec<_> =
        records.iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).collect();
    assert_eq!(cpu.len(), 3);
    assert!(cpu.iter().all(|r| r.attributes.get_str(DATA_FORMAT) == Some("text")));

    let in_span: Vec<_> = cpu.iter().filter(|r| r.span_context.is_some()).collect();
    assert_eq!(in_span.len(), 1);
    assert!(in_span[0].body.starts_with("\"worker-7\" #7 RUNNABLE"));
    assert_eq!(in_span[0].span_context.unwrap().span_id.0, SPAN);
    // runtime frames are filtered by default
    assert!(!in_span[0].body.contains("core::ops"));
    assert!(in_span[0].body.contains("myapp::db::query(src/db.rs:88)"));

    let allocation: Vec<_> =
        records.iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("allocation")).collect();
    assert_eq!(allocation.len(), 1);
    assert_eq!(allocation[0].attributes.get_int(MEMORY_ALLOCATED), Some(4096));
    assert!(allocation[0].span_context.is_some());
}

#[test]
fn test_tracing_stacks_only_drops_unlinked_threads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    write_recording(&path, &sample_events());

    let sink = Arc::new(InMemorySink::new());
    let config = Configuration { tracing_stacks_only: true, ..config(DataFormat::Text, DataFormat::Text) };
    run_pipeline(&config, sink.clone(), &[path]);

    let cpu: Vec<_> =
        sink.records().into_iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).collect();
    assert_eq!(cpu.len(), 1);
    assert!(cpu[0].span_context.is_some());
}

#[test]
fn test_damaged_tail_exports_readable_prefix_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_2_20240229T134527.sprec");
    write_recording(&path, &sample_events());

    // cut into the last thread dump
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 10).unwrap();
    drop(file);

    let missing = dir.path().join("spanprof_3_20240229T134547.sprec");
    let sink = Arc::new(InMemorySink::new());
    let finished = run_pipeline(
        &config(DataFormat::Text, DataFormat::Text),
        sink.clone(),
        &[path.clone(), missing.clone()],
    );
    assert_eq!(finished, vec![path, missing]);

    let cpu = sink.records().into_iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).count();
    assert_eq!(cpu, 2);
}

#[test]
fn test_pprof_cpu_profile_decodes_with_trace_labels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    write_recording(&path, &sample_events());

    let sink = Arc::new(InMemorySink::new());
    run_pipeline(&config(DataFormat::PprofGzipBase64, DataFormat::Text), sink.clone(), &[path]);

    let cpu: Vec<_> =
        sink.records().into_iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).collect();
    // one file, one profile
    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].attributes.get_str(DATA_FORMAT), Some("pprof-gzip-base64"));
    assert_eq!(cpu[0].attributes.get_str(SOURCE_EVENT_NAME), Some("spanprof.ThreadDump"));

    let profile = decode_profile(&cpu[0].body).unwrap();
    assert_eq!(profile.sample.len(), 3);
    assert!(profile.sample.iter().all(|s| s.value == vec![1]));

    let trace_key = profile.string_table.iter().position(|s| s == TRACE_ID_LABEL).unwrap();
    let span_key = profile.string_table.iter().position(|s| s == SPAN_ID_LABEL).unwrap();
    let linked: Vec<_> = profile
        .sample
        .iter()
        .filter(|s| s.label.iter().any(|l| l.key == trace_key as i64))
        .collect();
    assert_eq!(linked.len(), 1);
    let span_label = linked[0].label.iter().find(|l| l.key == span_key as i64).unwrap();
    assert_eq!(profile.string_table[span_label.str as usize], "5c".repeat(8));
}

#[test]
fn test_json_lines_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    write_recording(&path, &sample_events());
    let output = dir.path().join("records.jsonl");

    let sink = Arc::new(JsonLinesSink::append_to(&output).unwrap());
    run_pipeline(&config(DataFormat::Text, DataFormat::Text), sink, &[path]);

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 4);
    let linked: Vec<_> = lines.iter().filter(|l| l.get("traceId").is_some()).collect();
    assert_eq!(linked.len(), 2);
    assert!(linked.iter().all(|l| l["traceId"] == "4b".repeat(16)));
    assert!(lines.iter().all(|l| l["attributes"]["com.splunk.sourcetype"] == "otel.profiling"));
}

/// Record one stack inside a span that ends long before the thread dump is
/// due, then export the recording with the live profiler's event settings.
fn record_stack_then_end_span(config: &Configuration, path: &Path) {
    let profiler = BufferedProfiler::new();
    let samples = profiler.sink();
    let id = profiler
        .start(&RecordingRequest { settings: config.event_settings(), max_age: Duration::from_secs(600) })
        .unwrap();
    {
        let _scope = samples.enter_span(SpanContext::new(TraceId(TRACE), SpanId(SPAN), 1));
        samples.record_thread_sample(RawThreadSample {
            thread_id: ThreadId::current().0,
            ..thread(7, "worker-7")
        });
        std::thread::sleep(Duration::from_millis(2));
    }
    std::thread::sleep(Duration::from_millis(2));
    profiler.stop(id, path).unwrap();
}

#[test]
fn test_buffered_stack_keeps_span_that_ended_before_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    let config = Configuration {
        enabled: true,
        call_stack_interval: Duration::from_secs(60),
        ..Configuration::default()
    };
    record_stack_then_end_span(&config, &path);

    let sink = Arc::new(InMemorySink::new());
    run_pipeline(&config, sink.clone(), &[path]);

    let cpu: Vec<_> =
        sink.records().into_iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).collect();
    assert_eq!(cpu.len(), 1);
    let span = cpu[0].span_context.unwrap();
    assert_eq!(span.trace_id.0, TRACE);
    assert_eq!(span.span_id.0, SPAN);
}

#[test]
fn test_buffered_stack_survives_tracing_stacks_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    let config = Configuration {
        enabled: true,
        call_stack_interval: Duration::from_secs(60),
        tracing_stacks_only: true,
        ..Configuration::default()
    };
    record_stack_then_end_span(&config, &path);

    let sink = Arc::new(InMemorySink::new());
    run_pipeline(&config, sink.clone(), &[path]);

    let cpu: Vec<_> =
        sink.records().into_iter().filter(|r| r.attributes.get_str(DATA_TYPE) == Some("cpu")).collect();
    assert_eq!(cpu.len(), 1);
    assert!(cpu[0].span_context.is_some());
}

#[test]
fn test_pprof_allocation_samples_label_object_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spanprof_1_20240229T134507.sprec");
    write_recording(&path, &sample_events());

    let sink = Arc::new(InMemorySink::new());
    run_pipeline(&config(DataFormat::Text, DataFormat::PprofGzipBase64), sink.clone(), &[path]);

    let allocation: Vec<_> = sink
        .records()
        .into_iter()
        .filter(|r| r.attributes.get_str(DATA_TYPE) == Some("allocation"))
        .collect();
    assert_eq!(allocation.len(), 1);
    let profile = decode_profile(&allocation[0].body).unwrap();
    assert_eq!(profile.sample.len(), 1);

    let table = &profile.string_table;
    let label = |key: &str| {
        profile.sample[0]
            .label
            .iter()
            .find(|l| table[usize::try_from(l.key).unwrap()] == key)
            .map(|l| table[usize::try_from(l.str).unwrap()].clone())
    };
    assert_eq!(label(MEMORY_ALLOCATION_TYPE).as_deref(), Some("Vec<u8>"));
    assert_eq!(label(SOURCE_EVENT_NAME).as_deref(), Some("spanprof.ObjectAllocationSample"));
}
