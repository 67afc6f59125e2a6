use spanprof::activator::ProfilerActivator;
use spanprof::config::Configuration;
use spanprof::domain::{SpanContext, SpanId, TraceId};
use spanprof::events::{EventSettings, THREAD_DUMP_EVENT_NAME};
use spanprof::logs::JsonLinesSink;
use spanprof::native::{BufferedProfiler, NativeProfiler};
use spanprof::recording::{Recorder, RecordingFileNamingConvention, RecordingSequencer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn recorder(dir: &std::path::Path, duration: Duration) -> (Recorder, Arc<Mutex<Vec<PathBuf>>>) {
    let files = Arc::new(Mutex::new(Vec::new()));
    let seen = files.clone();
    let mut settings = EventSettings::new();
    settings.set_enabled(THREAD_DUMP_EVENT_NAME, true);
    let profiler: Arc<dyn NativeProfiler> = Arc::new(BufferedProfiler::new());
    let recorder = Recorder::new(
        profiler,
        RecordingFileNamingConvention::new(dir),
        settings,
        duration,
        64,
        Box::new(move |path| seen.lock().unwrap().push(path.to_path_buf())),
    );
    (recorder, files)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_sequencer_rotates_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let (recorder, files) = recorder(dir.path(), Duration::from_millis(30));

    let mut sequencer =
        RecordingSequencer::new(recorder, Box::new(|| true), Duration::from_millis(30));
    sequencer.start().unwrap();
    assert!(wait_until(Duration::from_secs(10), || files.lock().unwrap().len() >= 3));

    let recorder = sequencer.stop().unwrap();
    assert!(!recorder.is_recording());
    assert!(!sequencer.is_running());

    let files = files.lock().unwrap().clone();
    assert_eq!(recorder.files_written(), files.len() as u64);
    // every rotation produced a distinct, complete file
    let mut unique = files.clone();
    unique.dedup();
    assert_eq!(unique.len(), files.len());
    assert!(files.iter().all(|f| f.exists()));
    assert!(files.iter().all(|f| f.extension().is_some_and(|e| e == "sprec")));
}

#[test]
fn test_escape_hatch_finalizes_and_stops_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let (recorder, files) = recorder(dir.path(), Duration::from_millis(20));

    let checks = Arc::new(AtomicUsize::new(0));
    let counted = checks.clone();
    let hatch = move || counted.fetch_add(1, Ordering::SeqCst) < 2;

    let mut sequencer = RecordingSequencer::new(recorder, Box::new(hatch), Duration::from_millis(20));
    sequencer.start().unwrap();
    assert!(wait_until(Duration::from_secs(10), || !sequencer.is_running()));

    // start, one rotation, then the refused check finalizes the last recording
    assert_eq!(checks.load(Ordering::SeqCst), 3);
    assert_eq!(files.lock().unwrap().len(), 2);

    let recorder = sequencer.stop().unwrap();
    assert!(!recorder.is_recording());
}

#[test]
fn test_hatch_refusing_up_front_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (recorder, files) = recorder(dir.path(), Duration::from_millis(20));

    let mut sequencer = RecordingSequencer::new(recorder, Box::new(|| false), Duration::from_millis(20));
    sequencer.start().unwrap();
    let recorder = sequencer.stop().unwrap();
    assert_eq!(recorder.files_written(), 0);
    assert!(files.lock().unwrap().is_empty());
}

#[test]
fn test_session_exports_span_linked_stacks_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let recordings = dir.path().join("recordings");
    let output = dir.path().join("records.jsonl");

    let config = Configuration {
        enabled: true,
        directory: recordings.clone(),
        recording_duration: Duration::from_millis(100),
        call_stack_interval: Duration::from_millis(10),
        include_agent_internal_stacks: true,
        ..Configuration::default()
    };
    let profiler = BufferedProfiler::new();
    let samples = profiler.sink();
    let sink = Arc::new(JsonLinesSink::append_to(&output).unwrap());
    let mut session = ProfilerActivator::new(config, sink, Arc::new(profiler))
        .with_escape_hatch(Box::new(|| true))
        .activate()
        .unwrap()
        .expect("profiling is enabled");

    assert!(wait_until(Duration::from_secs(10), || samples.is_recording()));

    let span = SpanContext::new(TraceId([0x11; 16]), SpanId([0x22; 8]), 1);
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let samples = samples.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("traced-worker".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let _scope = samples.enter_span(span);
                    for _ in 0..5 {
                        samples.capture_stack();
                        std::thread::sleep(Duration::from_millis(3));
                    }
                }
            })
            .unwrap()
    };

    std::thread::sleep(Duration::from_millis(350));
    stop.store(true, Ordering::Release);
    worker.join().unwrap();
    assert!(session.is_recording());
    session.shutdown();

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert!(!lines.is_empty());
    assert!(lines
        .iter()
        .any(|l| l["traceId"] == "11".repeat(16) && l["spanId"] == "22".repeat(8)));
    assert!(lines.iter().all(|l| l["attributes"]["profiling.data.type"] == "cpu"));
    assert!(lines.iter().any(|l| l["body"].as_str().is_some_and(|b| b.starts_with("\"traced-worker\""))));

    // processed recordings are deleted when files are not kept
    let leftovers = RecordingFileNamingConvention::new(&recordings).list_matching().unwrap();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
}
