use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::thread::JoinHandle;
use std::time::Duration;

/// Runs a flush callback on a fixed interval until stopped.
///
/// Keeps pprof buffers from holding samples indefinitely when recordings are
/// long or rotation has stopped.
pub struct FlushScheduler {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned
    pub fn start<F>(interval: Duration, flush: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = std::thread::Builder::new().name("spanprof-pprof-flush".to_string()).spawn(
            move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => flush(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("pprof flush scheduler stopped");
                        return;
                    }
                }
            },
        )?;
        Ok(Self { stop_tx: Some(stop_tx), worker: Some(worker) })
    }

    /// Stop the worker and wait for it. A flush in progress completes first.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("pprof flush scheduler panicked");
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
