use log::warn;
use std::io;
use std::path::Path;
use std::time::Duration;

use super::RecordingFileNamingConvention;

/// Free space below which recording stops
pub const MIN_FREE_SPACE_BYTES: u64 = 100 * 1024 * 1024;

/// Unprocessed recordings tolerated in the output directory
pub const MAX_PENDING_FILES: usize = 10;

/// Checked by the sequencer before every new recording; `false` ends rotation.
pub trait EscapeHatch: Send {
    fn can_continue(&self) -> bool;
}

impl<F> EscapeHatch for F
where
    F: Fn() -> bool + Send,
{
    fn can_continue(&self) -> bool {
        self()
    }
}

/// Stops recording when the disk is nearly full, or when recordings pile up
/// because they are not being processed.
///
/// The pile-up check is skipped when files are kept on purpose.
#[derive(Debug, Clone)]
pub struct RecordingEscapeHatch {
    naming: RecordingFileNamingConvention,
    keep_files: bool,
    recording_duration: Duration,
    min_free_bytes: u64,
    max_pending_files: usize,
}

impl RecordingEscapeHatch {
    #[must_use]
    pub fn new(
        naming: RecordingFileNamingConvention,
        keep_files: bool,
        recording_duration: Duration,
    ) -> Self {
        Self {
            naming,
            keep_files,
            recording_duration,
            min_free_bytes: MIN_FREE_SPACE_BYTES,
            max_pending_files: MAX_PENDING_FILES,
        }
    }

    #[must_use]
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_max_pending_files(mut self, count: usize) -> Self {
        self.max_pending_files = count;
        self
    }

    fn enough_free_space(&self) -> bool {
        match free_space(self.naming.directory()) {
            Ok(free) if free < self.min_free_bytes => {
                warn!(
                    "Only {} MiB free in {}, stopping profiler recordings",
                    free / (1024 * 1024),
                    self.naming.directory().display()
                );
                false
            }
            Ok(_) => true,
            // Directory not created yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Cannot determine free space in {}: {e}", self.naming.directory().display());
                true
            }
        }
    }

    fn files_not_piling_up(&self) -> bool {
        if self.keep_files {
            return true;
        }
        let pending = match self.naming.list_matching() {
            Ok(files) => files.len(),
            Err(_) => return true,
        };
        if pending > self.max_pending_files {
            warn!(
                "{pending} unprocessed recordings in {} (one expected every {:?}), stopping profiler recordings",
                self.naming.directory().display(),
                self.recording_duration
            );
            return false;
        }
        true
    }
}

impl EscapeHatch for RecordingEscapeHatch {
    fn can_continue(&self) -> bool {
        self.enough_free_space() && self.files_not_piling_up()
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn free_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: statvfs is plain old data, fully written by a successful call
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out pointer
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let blocks = u64::try_from(stat.f_bavail).unwrap_or(u64::MAX);
    let block_size = u64::try_from(stat.f_frsize).unwrap_or(u64::MAX);
    Ok(blocks.saturating_mul(block_size))
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}
