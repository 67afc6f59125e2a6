//! Log processors: immediate vs. buffered delivery to a [`LogSink`]
//!
//! Exporters emit through a [`LogProcessor`] and never decide how records are
//! delivered. The processor is picked once at startup:
//!
//! - [`SimpleLogProcessor`] - every record goes to the sink on the caller's thread
//! - [`BatchLogProcessor`] - records are queued and a worker thread exports them
//!   when a batch fills up or the schedule delay elapses, whichever comes first

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{LogRecord, LogSink};

pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 250;
pub const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;

/// How long `force_flush`/`shutdown` wait for the worker to acknowledge
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

pub trait LogProcessor: Send + Sync {
    /// Hand over one record. Never blocks on the sink for batching processors.
    fn emit(&self, record: LogRecord);

    /// Deliver everything emitted so far.
    fn force_flush(&self);

    /// Flush and stop accepting records.
    fn shutdown(&self);
}

// ============================================================================
// Simple (immediate) processor
// ============================================================================

pub struct SimpleLogProcessor {
    sink: Arc<dyn LogSink>,
    shut_down: AtomicBool,
}

impl SimpleLogProcessor {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink, shut_down: AtomicBool::new(false) }
    }
}

impl LogProcessor for SimpleLogProcessor {
    fn emit(&self, record: LogRecord) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.sink.export(std::slice::from_ref(&record)) {
            warn!("Failed to export profiling record: {e}");
        }
    }

    fn force_flush(&self) {
        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush log sink: {e}");
        }
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.force_flush();
        }
    }
}

// ============================================================================
// Batch processor
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub max_export_batch_size: usize,
    pub schedule_delay: Duration,
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            schedule_delay: DEFAULT_SCHEDULE_DELAY,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

enum Message {
    Record(LogRecord),
    Flush(Sender<()>),
    Shutdown(Sender<()>),
}

pub struct BatchLogProcessor {
    tx: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    shut_down: AtomicBool,
}

impl BatchLogProcessor {
    /// Start the export worker thread.
    ///
    /// # Errors
    /// Returns an error if the OS refuses to spawn a thread
    pub fn new(sink: Arc<dyn LogSink>, config: BatchConfig) -> std::io::Result<Self> {
        let (tx, rx) = bounded(config.max_queue_size.max(1));
        let worker = std::thread::Builder::new()
            .name("spanprof-log-batch".to_string())
            .spawn(move || run_batch_worker(&rx, sink.as_ref(), config))?;
        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Records dropped because the queue was full.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send_control(&self, make: impl FnOnce(Sender<()>) -> Message) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(make(ack_tx)).is_ok() && ack_rx.recv_timeout(CONTROL_TIMEOUT).is_err() {
            warn!("Log batch worker did not respond within {CONTROL_TIMEOUT:?}");
        }
    }
}

impl LogProcessor for BatchLogProcessor {
    fn emit(&self, record: LogRecord) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(Message::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Drop rather than block the profiling thread on a slow sink
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Log queue full, {dropped} profiling records dropped so far");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn force_flush(&self) {
        self.send_control(Message::Flush);
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send_control(Message::Shutdown);
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Log batch worker panicked");
            }
        }
    }
}

impl Drop for BatchLogProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_batch_worker(rx: &Receiver<Message>, sink: &dyn LogSink, config: BatchConfig) {
    let batch_size = config.max_export_batch_size.max(1);
    let mut batch: Vec<LogRecord> = Vec::with_capacity(batch_size);
    let mut deadline = Instant::now() + config.schedule_delay;

    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(Message::Record(record)) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    export_batch(sink, &mut batch);
                }
            }
            Ok(Message::Flush(ack)) => {
                drain_pending(rx, sink, &mut batch, batch_size);
                export_batch(sink, &mut batch);
                flush_sink(sink);
                let _ = ack.send(());
            }
            Ok(Message::Shutdown(ack)) => {
                drain_pending(rx, sink, &mut batch, batch_size);
                export_batch(sink, &mut batch);
                flush_sink(sink);
                let _ = ack.send(());
                debug!("Log batch worker stopped");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                export_batch(sink, &mut batch);
                deadline = Instant::now() + config.schedule_delay;
            }
            Err(RecvTimeoutError::Disconnected) => {
                export_batch(sink, &mut batch);
                flush_sink(sink);
                return;
            }
        }
    }
}

/// Move records already queued behind a control message into the batch.
fn drain_pending(
    rx: &Receiver<Message>,
    sink: &dyn LogSink,
    batch: &mut Vec<LogRecord>,
    batch_size: usize,
) {
    while let Ok(msg) = rx.try_recv() {
        match msg {
            Message::Record(record) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    export_batch(sink, batch);
                }
            }
            Message::Flush(ack) | Message::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn export_batch(sink: &dyn LogSink, batch: &mut Vec<LogRecord>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = sink.export(batch) {
        warn!("Failed to export batch of {} profiling records: {e}", batch.len());
    }
    batch.clear();
}

fn flush_sink(sink: &dyn LogSink) {
    if let Err(e) = sink.flush() {
        warn!("Failed to flush log sink: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use crate::logs::{Attributes, InMemorySink};

    fn record(n: u64) -> LogRecord {
        LogRecord {
            timestamp: Timestamp(n),
            body: format!("record {n}"),
            attributes: Attributes::new(),
            span_context: None,
        }
    }

    #[test]
    fn test_simple_processor_exports_immediately() {
        let sink = Arc::new(InMemorySink::new());
        let processor = SimpleLogProcessor::new(sink.clone());
        processor.emit(record(1));
        assert_eq!(sink.records().len(), 1);

        processor.shutdown();
        processor.emit(record(2));
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn test_batch_processor_exports_full_batches() {
        let sink = Arc::new(InMemorySink::new());
        let config = BatchConfig {
            max_export_batch_size: 2,
            schedule_delay: Duration::from_secs(3600),
            max_queue_size: 16,
        };
        let processor = BatchLogProcessor::new(sink.clone(), config).unwrap();
        for n in 0..5 {
            processor.emit(record(n));
        }
        processor.force_flush();

        let records = sink.records();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].timestamp, Timestamp(0));
        // two full batches, then the remainder on flush
        assert_eq!(sink.export_calls(), 3);
    }

    #[test]
    fn test_batch_processor_flushes_on_schedule() {
        let sink = Arc::new(InMemorySink::new());
        let config = BatchConfig {
            max_export_batch_size: 100,
            schedule_delay: Duration::from_millis(20),
            max_queue_size: 16,
        };
        let processor = BatchLogProcessor::new(sink.clone(), config).unwrap();
        processor.emit(record(1));

        let start = Instant::now();
        while sink.records().is_empty() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.records().len(), 1);
        processor.shutdown();
    }

    #[test]
    fn test_shutdown_delivers_pending_records() {
        let sink = Arc::new(InMemorySink::new());
        let processor = BatchLogProcessor::new(
            sink.clone(),
            BatchConfig { schedule_delay: Duration::from_secs(3600), ..BatchConfig::default() },
        )
        .unwrap();
        processor.emit(record(1));
        processor.emit(record(2));
        processor.shutdown();
        assert_eq!(sink.records().len(), 2);

        processor.emit(record(3));
        assert_eq!(processor.dropped_records(), 0);
        assert_eq!(sink.records().len(), 2);
    }
}
