//! Recording rotation loop
//!
//! One worker thread owns the [`Recorder`]. Each cycle it waits for the
//! recording duration, checks the escape hatch, and rotates. File processing
//! runs inside the recorder's callback on this same thread, after the next
//! recording has already started.
//!
//! ```text
//! start ─▶ [hatch?] ─▶ new_recording ─▶ wait(duration) ─▶ [stop?] ─▶ [hatch?] ─▶ rotate ─┐
//!                                           ▲                                           │
//!                                           └───────────────────────────────────────────┘
//! ```
//!
//! Recorder failures are logged and end the loop; the host keeps running.

use log::{error, info, warn};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{EscapeHatch, Recorder};

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wakeup.notify_all();
    }

    /// Wait up to `timeout`; true if stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            stopped = self
                .wakeup
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

pub struct RecordingSequencer {
    duration: Duration,
    pending: Option<(Recorder, Box<dyn EscapeHatch>)>,
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<Recorder>>,
}

impl RecordingSequencer {
    pub fn new(recorder: Recorder, escape_hatch: Box<dyn EscapeHatch>, duration: Duration) -> Self {
        Self {
            duration,
            pending: Some((recorder, escape_hatch)),
            signal: Arc::new(StopSignal::default()),
            worker: None,
        }
    }

    /// Spawn the rotation worker. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn start(&mut self) -> std::io::Result<()> {
        let Some((recorder, hatch)) = self.pending.take() else {
            return Ok(());
        };
        let signal = self.signal.clone();
        let duration = self.duration;
        let worker = std::thread::Builder::new()
            .name("spanprof-recording-sequencer".to_string())
            .spawn(move || run(recorder, hatch.as_ref(), &signal, duration))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Whether the worker is still rotating.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop rotating and wait for the worker. The in-flight recording is
    /// finalized and processed before this returns.
    ///
    /// Returns the recorder, or `None` if the loop was never started or its
    /// thread panicked.
    pub fn stop(&mut self) -> Option<Recorder> {
        self.signal.stop();
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(recorder) => Some(recorder),
            Err(_) => {
                error!("Recording sequencer panicked");
                None
            }
        }
    }
}

impl Drop for RecordingSequencer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run(mut recorder: Recorder, hatch: &dyn EscapeHatch, signal: &StopSignal, duration: Duration) -> Recorder {
    if !hatch.can_continue() {
        warn!("Profiler recordings not started");
        return recorder;
    }
    if let Err(e) = recorder.new_recording() {
        error!("Failed to start profiler recording, profiling stopped: {e}");
        return recorder;
    }
    info!("Profiler recording every {duration:?}");

    loop {
        if signal.wait(duration) {
            finish(&mut recorder);
            return recorder;
        }
        if !hatch.can_continue() {
            warn!("Stopping profiler recordings");
            finish(&mut recorder);
            return recorder;
        }
        if let Err(e) = recorder.rotate() {
            error!("Failed to rotate profiler recording, profiling stopped: {e}");
            if recorder.is_recording() {
                finish(&mut recorder);
            }
            return recorder;
        }
    }
}

fn finish(recorder: &mut Recorder) {
    if let Err(e) = recorder.stop() {
        error!("Failed to finalize profiler recording: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_interrupts_wait() {
        let signal = Arc::new(StopSignal::default());
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = waiter.wait(Duration::from_secs(60));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.stop();

        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_wait_times_out() {
        let signal = StopSignal::default();
        assert!(!signal.wait(Duration::from_millis(10)));
    }
}
