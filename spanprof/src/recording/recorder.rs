use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::RecordingFileNamingConvention;
use crate::domain::RecordingError;
use crate::events::EventSettings;
use crate::native::{NativeProfiler, RecordingId, RecordingRequest};

/// Events older than `recording duration × MAX_AGE_FACTOR` are dropped when a
/// recording is written
pub const MAX_AGE_FACTOR: u32 = 10;

/// Invoked with every finalized recording file
pub type RecordingFileCallback = Box<dyn FnMut(&Path) + Send>;

/// Owns the one active recording and turns it into files.
pub struct Recorder {
    profiler: Arc<dyn NativeProfiler>,
    naming: RecordingFileNamingConvention,
    request: RecordingRequest,
    stack_depth: usize,
    on_new_recording_file: RecordingFileCallback,
    active: Option<RecordingId>,
    sequence: u64,
}

impl Recorder {
    pub fn new(
        profiler: Arc<dyn NativeProfiler>,
        naming: RecordingFileNamingConvention,
        settings: EventSettings,
        recording_duration: Duration,
        stack_depth: usize,
        on_new_recording_file: RecordingFileCallback,
    ) -> Self {
        Self {
            profiler,
            naming,
            request: RecordingRequest {
                settings,
                max_age: recording_duration.saturating_mul(MAX_AGE_FACTOR),
            },
            stack_depth,
            on_new_recording_file,
            active: None,
            sequence: 0,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.profiler.is_available()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Number of recordings finalized so far.
    #[must_use]
    pub fn files_written(&self) -> u64 {
        self.sequence
    }

    /// Begin a recording.
    ///
    /// # Errors
    /// Returns an error if one is already active, the output directory cannot
    /// be created, or the profiler refuses to start
    pub fn new_recording(&mut self) -> Result<(), RecordingError> {
        if let Some(active) = self.active {
            return Err(RecordingError::AlreadyActive(active.0));
        }
        let directory = self.naming.directory();
        std::fs::create_dir_all(directory).map_err(|source| RecordingError::OutputDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        self.profiler.set_stack_depth(self.stack_depth);
        let id = self.profiler.start(&self.request)?;
        debug!("Recording {id} started");
        self.active = Some(id);
        Ok(())
    }

    /// Finalize the active recording and hand the file to the callback.
    ///
    /// # Errors
    /// Returns an error if nothing is recording or the file cannot be written
    pub fn stop(&mut self) -> Result<PathBuf, RecordingError> {
        let path = self.finalize()?;
        (self.on_new_recording_file)(&path);
        Ok(path)
    }

    /// Finalize the active recording and start the next one before the
    /// finished file is processed, so the unrecorded gap is only the write.
    ///
    /// # Errors
    /// Returns an error if finalizing or restarting fails; a finalized file is
    /// still handed to the callback when only the restart failed
    pub fn rotate(&mut self) -> Result<PathBuf, RecordingError> {
        let path = self.finalize()?;
        let restarted = self.new_recording();
        (self.on_new_recording_file)(&path);
        restarted.map(|()| path)
    }

    fn finalize(&mut self) -> Result<PathBuf, RecordingError> {
        let id = self.active.take().ok_or(RecordingError::NotActive)?;
        self.sequence += 1;
        let path = self.naming.new_path(self.sequence, SystemTime::now());
        self.profiler.stop(id, &path)?;
        info!("Recording {id} written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::BufferedProfiler;
    use std::sync::Mutex;

    fn recorder(dir: &Path, files: Arc<Mutex<Vec<PathBuf>>>) -> Recorder {
        Recorder::new(
            Arc::new(BufferedProfiler::new()),
            RecordingFileNamingConvention::new(dir),
            EventSettings::new(),
            Duration::from_secs(1),
            64,
            Box::new(move |path| files.lock().unwrap().push(path.to_path_buf())),
        )
    }

    #[test]
    fn test_single_owner_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(dir.path(), Arc::new(Mutex::new(Vec::new())));
        recorder.new_recording().unwrap();
        assert!(matches!(recorder.new_recording(), Err(RecordingError::AlreadyActive(_))));
    }

    #[test]
    fn test_stop_without_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(dir.path(), Arc::new(Mutex::new(Vec::new())));
        assert!(matches!(recorder.stop(), Err(RecordingError::NotActive)));
    }

    #[test]
    fn test_rotate_notifies_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = recorder(&dir.path().join("nested"), files.clone());

        recorder.new_recording().unwrap();
        let first = recorder.rotate().unwrap();
        assert!(recorder.is_recording());
        let second = recorder.stop().unwrap();
        assert!(!recorder.is_recording());

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        assert_eq!(*files.lock().unwrap(), vec![first, second]);
        assert_eq!(recorder.files_written(), 2);
    }
}
