//! # Recording Container Format (Native Profiler ↔ Pipeline)
//!
//! Defines the on-disk layout of a finalized recording file and the codec used
//! by both sides of the boundary: the native sampling subsystem writes records
//! with [`RecordingWriter`], the profiling pipeline reads them back with
//! [`RecordingReader`].
//!
//! ## Layout
//!
//! ```text
//! header  := "SPRF" | version u16 | flags u16 | start_epoch_nanos u64
//! record  := kind u8 | payload_len u32 | payload[payload_len]
//! string  := len u16 | utf8 bytes
//! frames  := count u16 | (function string | file string | line u32)*
//! ```
//!
//! All integers are little-endian. An empty file string means "no file" and a
//! zero line means "no line".
//!
//! ## Key Types
//!
//! - [`RawEvent`] - One decoded record (execution sample, thread dump, allocation, context change)
//! - [`RecordingWriter`] - Appends records to any [`Write`]
//! - [`RecordingReader`] - Incremental decoder; stops at the first truncated or malformed record
//!
//! Records with an unknown kind are skipped by length so that older readers can
//! consume files written by newer profilers.

use std::io::{self, Read, Write};
use thiserror::Error;

// ============================================================================
// Format Constants
// ============================================================================

/// File magic, first four bytes of every recording.
pub const MAGIC: [u8; 4] = *b"SPRF";

/// Current container version. Readers reject anything newer.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the file header in bytes.
pub const HEADER_LEN: usize = 16;

/// Size of the per-record header (`kind` + `payload_len`).
pub const RECORD_HEADER_LEN: usize = 5;

/// Upper bound for a single record payload.
///
/// Protects the reader from allocating gigabytes when the length field of a
/// corrupted record is garbage.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Maximum number of frames a single stack can carry (`count` is a u16).
pub const MAX_STACK_DEPTH: usize = u16::MAX as usize;

// ============================================================================
// Event Kind Constants
// ============================================================================

/// **CPU sampling**: one thread's stack captured while running.
pub const EVENT_EXECUTION_SAMPLE: u8 = 1;

/// **Thread dump**: periodic snapshot of every thread's stack and state.
pub const EVENT_THREAD_DUMP: u8 = 2;

/// **Allocation sampling**: object allocation with size, type and stack.
pub const EVENT_ALLOCATION: u8 = 3;

/// **Span context change**: a span became active on / left a thread.
pub const EVENT_CONTEXT_ATTACHED: u8 = 4;

/// Thread state codes carried in samples and thread dumps.
pub const THREAD_STATE_UNKNOWN: u8 = 0;
pub const THREAD_STATE_RUNNABLE: u8 = 1;
pub const THREAD_STATE_BLOCKED: u8 = 2;
pub const THREAD_STATE_WAITING: u8 = 3;
pub const THREAD_STATE_TIMED_WAITING: u8 = 4;
pub const THREAD_STATE_PARKED: u8 = 5;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Not a recording file (bad magic {0:02x?})")]
    BadMagic([u8; 4]),

    #[error("Unsupported recording format version {0}")]
    UnsupportedVersion(u16),

    #[error("Truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated { what: &'static str, expected: usize, actual: usize },

    #[error("Record payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    #[error("Malformed {kind} record: {reason}")]
    Malformed { kind: u8, reason: &'static str },

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ============================================================================
// Decoded Records
// ============================================================================

/// A single stack frame as stored in the recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl RawFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self { function: function.into(), file: None, line: None }
    }

    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = (line != 0).then_some(line);
        self
    }
}

/// Renders as `function(file:line)`, the way frames appear in a thread dump.
impl std::fmt::Display for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}({file}:{line})", self.function),
            (Some(file), None) => write!(f, "{}({file})", self.function),
            (None, _) => f.write_str(&self.function),
        }
    }
}

/// One thread's stack at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawThreadSample {
    pub thread_id: u64,
    pub thread_name: String,
    pub state: u8,
    pub frames: Vec<RawFrame>,
}

/// Allocation kind codes.
pub const ALLOCATION_IN_NEW_TLAB: u8 = 0;
pub const ALLOCATION_OUTSIDE_TLAB: u8 = 1;
pub const ALLOCATION_SAMPLED: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAllocation {
    pub timestamp_nanos: u64,
    pub thread_id: u64,
    pub thread_name: String,
    pub kind: u8,
    pub object_type: String,
    pub allocation_size: u64,
    /// Size of the thread-local buffer refilled by this allocation (0 when outside a buffer)
    pub tlab_size: u64,
    /// Bytes represented by this sample (only meaningful for sampled allocations)
    pub weight: u64,
    pub frames: Vec<RawFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawContextChange {
    pub timestamp_nanos: u64,
    pub thread_id: u64,
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub trace_flags: u8,
    /// `true` when the span became active, `false` when it left the thread
    pub entering: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    ExecutionSample { timestamp_nanos: u64, sample: RawThreadSample },
    ThreadDump { timestamp_nanos: u64, threads: Vec<RawThreadSample> },
    Allocation(RawAllocation),
    ContextAttached(RawContextChange),
    /// Record of a kind this reader does not understand; payload skipped
    Unknown { kind: u8, payload_len: u32 },
}

impl RawEvent {
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            RawEvent::ExecutionSample { .. } => EVENT_EXECUTION_SAMPLE,
            RawEvent::ThreadDump { .. } => EVENT_THREAD_DUMP,
            RawEvent::Allocation(_) => EVENT_ALLOCATION,
            RawEvent::ContextAttached(_) => EVENT_CONTEXT_ATTACHED,
            RawEvent::Unknown { kind, .. } => *kind,
        }
    }

    /// Wall-clock timestamp in nanoseconds since the Unix epoch (0 for unknown records).
    #[must_use]
    pub fn timestamp_nanos(&self) -> u64 {
        match self {
            RawEvent::ExecutionSample { timestamp_nanos, .. }
            | RawEvent::ThreadDump { timestamp_nanos, .. } => *timestamp_nanos,
            RawEvent::Allocation(alloc) => alloc.timestamp_nanos,
            RawEvent::ContextAttached(change) => change.timestamp_nanos,
            RawEvent::Unknown { .. } => 0,
        }
    }
}

/// File header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingHeader {
    pub version: u16,
    pub flags: u16,
    pub start_epoch_nanos: u64,
}

impl RecordingHeader {
    #[must_use]
    pub fn new(start_epoch_nanos: u64) -> Self {
        Self { version: FORMAT_VERSION, flags: 0, start_epoch_nanos }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Appends records to a recording.
///
/// The header is written on construction. Nothing is buffered beyond the
/// current record, so wrap the sink in a `BufWriter` for file output.
pub struct RecordingWriter<W: Write> {
    inner: W,
    payload: Vec<u8>,
    records_written: u64,
}

impl<W: Write> RecordingWriter<W> {
    /// # Errors
    /// Returns an error if the header cannot be written
    pub fn new(mut inner: W, header: RecordingHeader) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&header.version.to_le_bytes());
        buf[6..8].copy_from_slice(&header.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&header.start_epoch_nanos.to_le_bytes());
        inner.write_all(&buf)?;
        Ok(Self { inner, payload: Vec::with_capacity(256), records_written: 0 })
    }

    /// Encode and append one event.
    ///
    /// # Errors
    /// Returns an error if writing fails or the event cannot be represented
    /// (an `Unknown` event, or more than [`MAX_STACK_DEPTH`] frames).
    pub fn write_event(&mut self, event: &RawEvent) -> io::Result<()> {
        self.payload.clear();
        let out = &mut self.payload;
        match event {
            RawEvent::ExecutionSample { timestamp_nanos, sample } => {
                put_u64(out, *timestamp_nanos);
                put_thread_sample(out, sample)?;
            }
            RawEvent::ThreadDump { timestamp_nanos, threads } => {
                put_u64(out, *timestamp_nanos);
                let count = u32::try_from(threads.len())
                    .map_err(|_| invalid_input("too many threads in dump"))?;
                put_u32(out, count);
                for thread in threads {
                    put_thread_sample(out, thread)?;
                }
            }
            RawEvent::Allocation(alloc) => {
                put_u64(out, alloc.timestamp_nanos);
                put_u64(out, alloc.thread_id);
                put_str(out, &alloc.thread_name)?;
                out.push(alloc.kind);
                put_str(out, &alloc.object_type)?;
                put_u64(out, alloc.allocation_size);
                put_u64(out, alloc.tlab_size);
                put_u64(out, alloc.weight);
                put_frames(out, &alloc.frames)?;
            }
            RawEvent::ContextAttached(change) => {
                put_u64(out, change.timestamp_nanos);
                put_u64(out, change.thread_id);
                out.extend_from_slice(&change.trace_id);
                out.extend_from_slice(&change.span_id);
                out.push(change.trace_flags);
                out.push(u8::from(change.entering));
            }
            RawEvent::Unknown { .. } => {
                return Err(invalid_input("cannot encode an unknown record"));
            }
        }

        let len = u32::try_from(self.payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| invalid_input("record payload too large"))?;
        let mut head = [0u8; RECORD_HEADER_LEN];
        head[0] = event.kind();
        head[1..5].copy_from_slice(&len.to_le_bytes());
        self.inner.write_all(&head)?;
        self.inner.write_all(&self.payload)?;
        self.records_written += 1;
        Ok(())
    }

    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush and hand back the underlying writer.
    ///
    /// # Errors
    /// Returns an error if the final flush fails
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn invalid_input(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| invalid_input("string longer than 65535 bytes"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_frames(out: &mut Vec<u8>, frames: &[RawFrame]) -> io::Result<()> {
    let count = u16::try_from(frames.len()).map_err(|_| invalid_input("stack too deep"))?;
    out.extend_from_slice(&count.to_le_bytes());
    for frame in frames {
        put_str(out, &frame.function)?;
        put_str(out, frame.file.as_deref().unwrap_or(""))?;
        put_u32(out, frame.line.unwrap_or(0));
    }
    Ok(())
}

fn put_thread_sample(out: &mut Vec<u8>, sample: &RawThreadSample) -> io::Result<()> {
    put_u64(out, sample.thread_id);
    put_str(out, &sample.thread_name)?;
    out.push(sample.state);
    put_frames(out, &sample.frames)
}

// ============================================================================
// Reader
// ============================================================================

/// Incremental record decoder.
///
/// Reads one record per [`RecordingReader::next_event`] call and never looks
/// ahead, so a file whose tail was cut off (profiler crash, disk full) still
/// yields every complete record before the damaged one.
pub struct RecordingReader<R: Read> {
    inner: R,
    header: RecordingHeader,
    payload: Vec<u8>,
    records_read: u64,
}

impl<R: Read> RecordingReader<R> {
    /// Read and validate the file header.
    ///
    /// # Errors
    /// Returns an error if the header is short, has the wrong magic, or a newer version
    pub fn new(mut inner: R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; HEADER_LEN];
        let got = read_up_to(&mut inner, &mut buf)?;
        if got < HEADER_LEN {
            return Err(DecodeError::Truncated { what: "header", expected: HEADER_LEN, actual: got });
        }
        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version == 0 || version > FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let flags = u16::from_le_bytes([buf[6], buf[7]]);
        let mut start = [0u8; 8];
        start.copy_from_slice(&buf[8..16]);
        let header = RecordingHeader { version, flags, start_epoch_nanos: u64::from_le_bytes(start) };
        Ok(Self { inner, header, payload: Vec::new(), records_read: 0 })
    }

    #[must_use]
    pub fn header(&self) -> RecordingHeader {
        self.header
    }

    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Decode the next record.
    ///
    /// Returns `Ok(None)` at a clean end of file (exactly on a record boundary).
    ///
    /// # Errors
    /// Returns an error for a partial record or a payload that does not parse.
    /// The reader should not be used after an error.
    pub fn next_event(&mut self) -> Result<Option<RawEvent>, DecodeError> {
        let mut head = [0u8; RECORD_HEADER_LEN];
        let got = read_up_to(&mut self.inner, &mut head)?;
        if got == 0 {
            return Ok(None);
        }
        if got < RECORD_HEADER_LEN {
            return Err(DecodeError::Truncated {
                what: "record header",
                expected: RECORD_HEADER_LEN,
                actual: got,
            });
        }

        let kind = head[0];
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]);
        if len > MAX_PAYLOAD_LEN {
            return Err(DecodeError::PayloadTooLarge(len));
        }

        // len <= MAX_PAYLOAD_LEN, fits in usize on every supported target
        let len_usize = len as usize;
        self.payload.resize(len_usize, 0);
        let got = read_up_to(&mut self.inner, &mut self.payload)?;
        if got < len_usize {
            return Err(DecodeError::Truncated { what: "record payload", expected: len_usize, actual: got });
        }

        let mut cur = PayloadCursor { buf: &self.payload, pos: 0, kind };
        let event = match kind {
            EVENT_EXECUTION_SAMPLE => {
                let timestamp_nanos = cur.u64()?;
                let sample = cur.thread_sample()?;
                RawEvent::ExecutionSample { timestamp_nanos, sample }
            }
            EVENT_THREAD_DUMP => {
                let timestamp_nanos = cur.u64()?;
                let count = cur.u32()?;
                let mut threads = Vec::new();
                for _ in 0..count {
                    threads.push(cur.thread_sample()?);
                }
                RawEvent::ThreadDump { timestamp_nanos, threads }
            }
            EVENT_ALLOCATION => RawEvent::Allocation(RawAllocation {
                timestamp_nanos: cur.u64()?,
                thread_id: cur.u64()?,
                thread_name: cur.string()?,
                kind: cur.u8()?,
                object_type: cur.string()?,
                allocation_size: cur.u64()?,
                tlab_size: cur.u64()?,
                weight: cur.u64()?,
                frames: cur.frames()?,
            }),
            EVENT_CONTEXT_ATTACHED => {
                let timestamp_nanos = cur.u64()?;
                let thread_id = cur.u64()?;
                let mut trace_id = [0u8; 16];
                trace_id.copy_from_slice(cur.bytes(16)?);
                let mut span_id = [0u8; 8];
                span_id.copy_from_slice(cur.bytes(8)?);
                let trace_flags = cur.u8()?;
                let entering = cur.u8()? != 0;
                RawEvent::ContextAttached(RawContextChange {
                    timestamp_nanos,
                    thread_id,
                    trace_id,
                    span_id,
                    trace_flags,
                    entering,
                })
            }
            _ => RawEvent::Unknown { kind, payload_len: len },
        };

        self.records_read += 1;
        Ok(Some(event))
    }
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct PayloadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    kind: u8,
}

impl<'a> PayloadCursor<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len()).ok_or(
            DecodeError::Malformed { kind: self.kind, reason: "field runs past end of payload" },
        )?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = usize::from(self.u16()?);
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| DecodeError::Malformed { kind: self.kind, reason: "invalid utf-8 string" })
    }

    fn frames(&mut self) -> Result<Vec<RawFrame>, DecodeError> {
        let count = usize::from(self.u16()?);
        let mut frames = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let function = self.string()?;
            let file = self.string()?;
            let line = self.u32()?;
            frames.push(RawFrame {
                function,
                file: (!file.is_empty()).then_some(file),
                line: (line != 0).then_some(line),
            });
        }
        Ok(frames)
    }

    fn thread_sample(&mut self) -> Result<RawThreadSample, DecodeError> {
        Ok(RawThreadSample {
            thread_id: self.u64()?,
            thread_name: self.string()?,
            state: self.u8()?,
            frames: self.frames()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> RawEvent {
        RawEvent::ThreadDump {
            timestamp_nanos: 1_700_000_000_000_000_000,
            threads: vec![RawThreadSample {
                thread_id: 7,
                thread_name: "worker-1".to_string(),
                state: THREAD_STATE_RUNNABLE,
                frames: vec![
                    RawFrame::new("myapp::handler::process").with_location("src/handler.rs", 42),
                    RawFrame::new("std::thread::spawn"),
                ],
            }],
        }
    }

    fn encode(events: &[RawEvent]) -> Vec<u8> {
        let mut writer = RecordingWriter::new(Vec::new(), RecordingHeader::new(1)).unwrap();
        for event in events {
            writer.write_event(event).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = encode(&[]);
        bytes[0] = b'X';
        assert!(matches!(RecordingReader::new(bytes.as_slice()), Err(DecodeError::BadMagic(_))));
    }

    #[test]
    fn test_header_rejects_newer_version() {
        let mut bytes = encode(&[]);
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            RecordingReader::new(bytes.as_slice()),
            Err(DecodeError::UnsupportedVersion(v)) if v == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn test_thread_dump_decodes_frames_and_locations() {
        let bytes = encode(&[sample_dump()]);
        let mut reader = RecordingReader::new(bytes.as_slice()).unwrap();
        let event = reader.next_event().unwrap().unwrap();
        assert_eq!(event, sample_dump());
        assert!(reader.next_event().unwrap().is_none());
        assert_eq!(reader.records_read(), 1);
    }

    #[test]
    fn test_truncated_tail_keeps_leading_records() {
        let mut bytes = encode(&[sample_dump(), sample_dump()]);
        bytes.truncate(bytes.len() - 3);
        let mut reader = RecordingReader::new(bytes.as_slice()).unwrap();
        assert!(reader.next_event().unwrap().is_some());
        assert!(matches!(reader.next_event(), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_kind_is_skipped_by_length() {
        let mut bytes = encode(&[]);
        bytes.push(200);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&encode(&[sample_dump()])[HEADER_LEN..]);

        let mut reader = RecordingReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.next_event().unwrap(), Some(RawEvent::Unknown { kind: 200, payload_len: 3 }));
        assert_eq!(reader.next_event().unwrap(), Some(sample_dump()));
    }

    #[test]
    fn test_payload_field_overrun_is_malformed() {
        let mut bytes = encode(&[]);
        bytes.push(EVENT_CONTEXT_ATTACHED);
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let mut reader = RecordingReader::new(bytes.as_slice()).unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(DecodeError::Malformed { kind: EVENT_CONTEXT_ATTACHED, .. })
        ));
    }

    #[test]
    fn test_unknown_event_cannot_be_written() {
        let mut writer = RecordingWriter::new(Vec::new(), RecordingHeader::new(0)).unwrap();
        assert!(writer.write_event(&RawEvent::Unknown { kind: 9, payload_len: 0 }).is_err());
        assert_eq!(writer.records_written(), 0);
    }
}
