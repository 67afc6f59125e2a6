//! Recording file cleanup
//!
//! Every recording file goes through two hooks:
//!
//! 1. `on_new_recording` - the file exists and is about to be processed
//! 2. `on_file_finished` - processing is over (successfully or not)
//!
//! Finished files are deleted, or retained when files are kept on purpose.
//! Retained files are capped, oldest evicted first. A file between the two
//! hooks is never touched except by the shutdown sweep, which runs after the
//! sequencer has stopped. In keep mode the sweep retains those files like
//! finished ones.

use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::RecordingFileNamingConvention;

#[derive(Debug, Default)]
struct CleanupState {
    pending: HashSet<PathBuf>,
    retained: VecDeque<PathBuf>,
    /// Deletions that failed; retried on the next finished file and at shutdown
    failed: Vec<PathBuf>,
    swept: bool,
}

#[derive(Debug)]
pub struct DirCleanup {
    naming: RecordingFileNamingConvention,
    keep_files: bool,
    max_retained_files: usize,
    state: Mutex<CleanupState>,
}

impl DirCleanup {
    /// Files already retained in the directory count towards the cap.
    #[must_use]
    pub fn new(naming: RecordingFileNamingConvention, keep_files: bool, max_retained_files: usize) -> Self {
        let mut state = CleanupState::default();
        if keep_files {
            if let Ok(existing) = naming.list_matching() {
                state.retained.extend(existing);
            }
        }
        Self { naming, keep_files, max_retained_files, state: Mutex::new(state) }
    }

    pub fn on_new_recording(&self, path: &Path) {
        self.lock().pending.insert(path.to_path_buf());
    }

    pub fn on_file_finished(&self, path: &Path) {
        let mut state = self.lock();
        state.pending.remove(path);
        retry_failed(&mut state);

        if self.keep_files {
            self.retain(&mut state, path.to_path_buf());
        } else {
            delete_or_defer(&mut state, path);
        }
    }

    /// Settle every file still tracked.
    ///
    /// Without keep mode, files that were never finished and any stray
    /// recordings in the directory are deleted. In keep mode, unfinished files
    /// are retained under the cap instead. Failed deletions are retried either
    /// way.
    ///
    /// Safe to call more than once.
    pub fn shutdown_sweep(&self) {
        let mut state = self.lock();
        if state.swept {
            return;
        }
        state.swept = true;

        let mut pending: Vec<PathBuf> = state.pending.drain().collect();
        pending.sort();

        let mut targets = if self.keep_files {
            for path in pending {
                self.retain(&mut state, path);
            }
            Vec::new()
        } else {
            let mut targets = pending;
            if let Ok(strays) = self.naming.list_matching() {
                targets.extend(strays);
            }
            targets
        };
        targets.append(&mut state.failed);
        targets.sort();
        targets.dedup();

        let mut deleted = 0usize;
        for path in &targets {
            match remove(path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete recording {} at shutdown: {e}", path.display()),
            }
        }
        if deleted > 0 {
            info!("Removed {deleted} recording files at shutdown");
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn retained(&self) -> Vec<PathBuf> {
        self.lock().retained.iter().cloned().collect()
    }

    /// Keep `path`, evicting the oldest retained files beyond the cap.
    fn retain(&self, state: &mut CleanupState, path: PathBuf) {
        state.retained.push_back(path);
        while state.retained.len() > self.max_retained_files {
            let Some(oldest) = state.retained.pop_front() else { break };
            debug!("Evicting retained recording {}", oldest.display());
            delete_or_defer(state, &oldest);
        }
    }

    fn lock(&self) -> MutexGuard<'_, CleanupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DirCleanup {
    fn drop(&mut self) {
        self.shutdown_sweep();
    }
}

/// Already-gone files count as deleted.
fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn delete_or_defer(state: &mut CleanupState, path: &Path) {
    if let Err(e) = remove(path) {
        warn!("Failed to delete recording {}: {e}", path.display());
        state.failed.push(path.to_path_buf());
    }
}

fn retry_failed(state: &mut CleanupState) {
    if state.failed.is_empty() {
        return;
    }
    let failed = std::mem::take(&mut state.failed);
    state.failed = failed.into_iter().filter(|path| remove(path).is_err()).collect();
}
