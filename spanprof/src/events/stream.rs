//! Lazy event stream over a finalized recording file.

use log::{debug, warn};
use spanprof_common::RecordingReader;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::RecordedEvent;
use crate::domain::StreamError;

/// Finite, non-restartable sequence of events read from one recording file.
///
/// Events come out in file order. A truncated or malformed tail ends the
/// sequence early: the error is logged, [`RecordedEventStream::was_truncated`]
/// turns true, and every complete record before it has already been yielded.
/// The file is closed when the stream is dropped.
pub struct RecordedEventStream {
    path: PathBuf,
    reader: Option<RecordingReader<BufReader<File>>>,
    truncated: bool,
    events_read: u64,
}

impl RecordedEventStream {
    /// Open a recording and validate its header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its header is invalid
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let file = File::open(path)
            .map_err(|source| StreamError::Open { path: path.to_path_buf(), source })?;
        let reader = RecordingReader::new(BufReader::new(file))
            .map_err(|source| StreamError::Decode { path: path.to_path_buf(), source })?;
        debug!(
            "Opened recording {} (format v{}, started at {})",
            path.display(),
            reader.header().version,
            reader.header().start_epoch_nanos
        );
        Ok(Self { path: path.to_path_buf(), reader: Some(reader), truncated: false, events_read: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if reading stopped at a damaged record rather than a clean end of file.
    #[must_use]
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub fn events_read(&self) -> u64 {
        self.events_read
    }
}

impl Iterator for RecordedEventStream {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match reader.next_event() {
            Ok(Some(raw)) => {
                self.events_read += 1;
                Some(raw.into())
            }
            Ok(None) => {
                self.reader = None;
                None
            }
            Err(e) => {
                warn!(
                    "Stopped reading {} after {} events: {e}",
                    self.path.display(),
                    self.events_read
                );
                self.truncated = true;
                self.reader = None;
                None
            }
        }
    }
}
