use log::{debug, warn};
use spanprof_common::{RawEvent, RawThreadSample, RecordingHeader, RecordingWriter};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{NativeProfiler, RecordingId, RecordingRequest, SampleSink};
use crate::config::DEFAULT_STACK_DEPTH;
use crate::domain::{ProfilerError, Timestamp};
use crate::events::{EventSettings, THREAD_DUMP_EVENT_NAME};

/// Events held per recording; the oldest are dropped beyond this
pub const MAX_EVENTS_PER_RECORDING: usize = 200_000;

#[derive(Debug)]
pub(super) struct ActiveRecording {
    pub(super) id: u64,
    pub(super) settings: EventSettings,
    max_age: Duration,
    started: Timestamp,
    events: VecDeque<RawEvent>,
    dropped: u64,
    /// Latest stack per thread since the last thread dump, with its capture time
    pending_dump: BTreeMap<u64, (Timestamp, RawThreadSample)>,
    dump_period: Option<Duration>,
    last_dump: Timestamp,
}

impl ActiveRecording {
    pub(super) fn push(&mut self, event: RawEvent) {
        if self.events.len() >= MAX_EVENTS_PER_RECORDING {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Remember `sample`, captured at `now`, for the next thread dump,
    /// emitting the dump when its period has elapsed.
    pub(super) fn stage_for_dump(&mut self, sample: RawThreadSample, now: Timestamp) {
        let Some(period) = self.dump_period else {
            return;
        };
        self.pending_dump.insert(sample.thread_id, (now, sample));
        if now.as_nanos().saturating_sub(self.last_dump.as_nanos()) >= duration_nanos(period) {
            self.emit_dump(now);
        }
    }

    /// Flush staged stacks as thread dumps stamped with their capture time.
    ///
    /// Stacks captured at the same instant share one dump. The dumps land
    /// behind context changes recorded after their capture, so events are
    /// sorted by time before the recording is written.
    fn emit_dump(&mut self, now: Timestamp) {
        self.last_dump = now;
        let mut by_time: BTreeMap<u64, Vec<RawThreadSample>> = BTreeMap::new();
        for (captured, sample) in std::mem::take(&mut self.pending_dump).into_values() {
            by_time.entry(captured.as_nanos()).or_default().push(sample);
        }
        for (timestamp_nanos, threads) in by_time {
            self.push(RawEvent::ThreadDump { timestamp_nanos, threads });
        }
    }

    /// Stable sort, so same-instant events keep the order they were recorded in.
    fn sort_by_time(&mut self) {
        self.events.make_contiguous().sort_by_key(RawEvent::timestamp_nanos);
    }
}

#[derive(Debug)]
pub(super) struct ProfilerState {
    pub(super) stack_depth: usize,
    next_id: u64,
    pub(super) active: Option<ActiveRecording>,
}

pub(super) type SharedState = Arc<Mutex<ProfilerState>>;

pub(super) fn lock(state: &SharedState) -> MutexGuard<'_, ProfilerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// In-process profiler that buffers events in memory between `start` and
/// `stop`.
///
/// Only one recording is active at a time; samples arriving while nothing is
/// recording are discarded.
#[derive(Debug, Clone)]
pub struct BufferedProfiler {
    state: SharedState,
}

impl Default for BufferedProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedProfiler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProfilerState {
                stack_depth: DEFAULT_STACK_DEPTH,
                next_id: 1,
                active: None,
            })),
        }
    }

    /// Handle for host hooks to feed samples into this profiler.
    #[must_use]
    pub fn sink(&self) -> SampleSink {
        SampleSink::new(self.state.clone())
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        lock(&self.state).active.is_some()
    }
}

impl NativeProfiler for BufferedProfiler {
    fn is_available(&self) -> bool {
        true
    }

    fn set_stack_depth(&self, depth: usize) {
        lock(&self.state).stack_depth = depth.clamp(1, spanprof_common::MAX_STACK_DEPTH);
    }

    fn start(&self, request: &RecordingRequest) -> Result<RecordingId, ProfilerError> {
        let mut state = lock(&self.state);
        if let Some(active) = &state.active {
            return Err(ProfilerError::Busy(active.id));
        }
        let id = state.next_id;
        state.next_id += 1;

        let now = Timestamp::now();
        let dump_period = request
            .settings
            .is_enabled(THREAD_DUMP_EVENT_NAME)
            .then(|| request.settings.period(THREAD_DUMP_EVENT_NAME))
            .flatten();
        state.active = Some(ActiveRecording {
            id,
            settings: request.settings.clone(),
            max_age: request.max_age,
            started: now,
            events: VecDeque::new(),
            dropped: 0,
            pending_dump: BTreeMap::new(),
            dump_period,
            last_dump: now,
        });
        debug!("Native recording {id} started");
        Ok(RecordingId(id))
    }

    fn stop(&self, id: RecordingId, destination: &Path) -> Result<(), ProfilerError> {
        let mut recording = {
            let mut state = lock(&self.state);
            match state.active.take() {
                Some(active) if active.id == id.0 => active,
                other => {
                    state.active = other;
                    return Err(ProfilerError::UnknownRecording(id.0));
                }
            }
        };

        let now = Timestamp::now();
        recording.emit_dump(now);
        recording.sort_by_time();
        let cutoff = now.as_nanos().saturating_sub(duration_nanos(recording.max_age));
        recording.events.retain(|event| event.timestamp_nanos() >= cutoff);
        if recording.dropped > 0 {
            warn!("Recording {id} dropped {} events over capacity", recording.dropped);
        }

        write_recording(&recording, destination).map_err(|source| ProfilerError::DumpFailed {
            path: destination.to_path_buf(),
            source,
        })?;
        debug!("Native recording {id} written: {} events", recording.events.len());
        Ok(())
    }
}

/// Write to a sibling `.part` file and rename, so a reader never sees a
/// partially written recording under the final name.
fn write_recording(recording: &ActiveRecording, destination: &Path) -> std::io::Result<()> {
    let mut part = destination.as_os_str().to_os_string();
    part.push(".part");
    let part = std::path::PathBuf::from(part);

    let result = (|| -> std::io::Result<()> {
        let file = BufWriter::new(File::create(&part)?);
        let mut writer =
            RecordingWriter::new(file, RecordingHeader::new(recording.started.as_nanos()))?;
        for event in &recording.events {
            writer.write_event(event)?;
        }
        writer.finish()?.into_inner().map_err(std::io::IntoInnerError::into_error)?.sync_all()
    })();

    match result {
        Ok(()) => std::fs::rename(&part, destination),
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            Err(e)
        }
    }
}
