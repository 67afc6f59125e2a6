//! # spanprof - Main Entry Point
//!
//! Supports two operational modes:
//! - **Process** (`spanprof process <FILES>`): export recordings written earlier
//! - **Demo** (`spanprof demo --for 30s`): profile a synthetic span-heavy
//!   workload with the in-process buffered profiler
//!
//! Records go to stdout as JSON lines unless `--output` names a file.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spanprof::activator::{Pipeline, ProfilerActivator};
use spanprof::cli::{Args, Command};
use spanprof::config::Configuration;
use spanprof::context::SpanRegistry;
use spanprof::domain::{SpanContext, SpanId, TraceId};
use spanprof::logs::{JsonLinesSink, LogSink};
use spanprof::native::{BufferedProfiler, SampleSink};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn open_sink(output: Option<&PathBuf>) -> Result<Arc<dyn LogSink>> {
    Ok(match output {
        Some(path) => Arc::new(
            JsonLinesSink::append_to(path)
                .with_context(|| format!("Failed to open output file {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()),
    })
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.profiler.to_configuration()?;
    let sink = open_sink(args.output.as_ref())?;

    match args.command {
        Command::Process { files } => process_files(&config, sink, &files),
        Command::Demo { run_for, threads } => run_demo(config, sink, run_for, threads).await,
    }
}

/// Export recordings that already exist. Files are never deleted here.
fn process_files(config: &Configuration, sink: Arc<dyn LogSink>, files: &[PathBuf]) -> Result<()> {
    let pipeline = Pipeline::new(config, sink, Arc::new(SpanRegistry::new()))
        .context("Failed to start log batch processor")?;
    let (mut handler, pipeline) = pipeline.into_path_handler(Box::new(|_| {}));

    let mut exported = 0;
    for path in files {
        exported += handler.accept(path).exported;
    }
    pipeline.shutdown();
    info!("Exported {exported} stacks from {} files", files.len());
    Ok(())
}

async fn run_demo(
    config: Configuration,
    sink: Arc<dyn LogSink>,
    run_for: Duration,
    threads: usize,
) -> Result<()> {
    let profiler = BufferedProfiler::new();
    let samples = profiler.sink();
    let memory = config.memory_enabled;

    let Some(mut session) = ProfilerActivator::new(config, sink, Arc::new(profiler)).activate()? else {
        return Ok(());
    };

    let stop = Arc::new(AtomicBool::new(false));
    let workers = (0..threads.max(1))
        .map(|index| {
            let samples = samples.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("demo-worker-{index}"))
                .spawn(move || demo_worker(index, &samples, &stop, memory))
                .context("Failed to spawn demo worker")
        })
        .collect::<Result<Vec<_>>>()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let exit_reason = tokio::select! {
        () = tokio::time::sleep(run_for) => "duration limit reached",
        _ = &mut ctrl_c => "interrupted",
    };

    stop.store(true, Ordering::Release);
    for worker in workers {
        if worker.join().is_err() {
            warn!("Demo worker panicked");
        }
    }
    session.shutdown();
    eprintln!("{exit_reason}: {:.1}s", run_for.as_secs_f64());
    Ok(())
}

/// One request per iteration: enter a span, do some work, sample the stack.
fn demo_worker(index: usize, samples: &SampleSink, stop: &AtomicBool, memory: bool) {
    let mut request: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        request += 1;
        let span = demo_span(index, request);
        {
            let _scope = samples.enter_span(span);
            let checksum = handle_request(request);
            samples.capture_stack();
            if memory {
                let buffer = vec![0u8; usize::try_from(checksum % 4096).unwrap_or(0) + 64];
                samples.record_allocation("Vec<u8>", buffer.len() as u64);
            }
        }
        if request % 4 == 0 {
            // Work outside any span
            let _ = handle_request(request);
            samples.capture_stack();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[inline(never)]
fn handle_request(seed: u64) -> u64 {
    (0..10_000u64).fold(seed, |acc, n| acc.rotate_left(5) ^ n.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

fn demo_span(index: usize, request: u64) -> SpanContext {
    let mut trace = [0u8; 16];
    trace[..8].copy_from_slice(&(index as u64 + 1).to_be_bytes());
    trace[8..].copy_from_slice(&request.to_be_bytes());
    SpanContext::new(TraceId(trace), SpanId(request.to_be_bytes()), SpanContext::FLAG_SAMPLED)
}
