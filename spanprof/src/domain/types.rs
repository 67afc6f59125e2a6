//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep thread ids, trace ids and span ids from being
//! mixed up, and give the exporters one place to get hex formatting right.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Thread ID
///
/// Kernel thread id of the sampled thread. This is the key of the
/// thread → span map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// Thread id of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        current_thread_id()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn current_thread_id() -> ThreadId {
    // SAFETY: gettid has no preconditions and cannot fail
    let tid = unsafe { libc::gettid() };
    ThreadId(u64::try_from(tid).unwrap_or_default())
}

#[cfg(not(target_os = "linux"))]
fn current_thread_id() -> ThreadId {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ThreadId(ID.with(|id| *id))
}

/// Wall-clock timestamp, nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let nanos = time.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }
}

/// W3C trace id (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId(pub [u8; 16]);

/// W3C span id (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(pub [u8; 8]);

macro_rules! hex_id {
    ($ty:ident, $len:expr) => {
        impl $ty {
            /// All-zero ids are invalid per W3C trace context
            #[must_use]
            pub fn is_valid(&self) -> bool {
                self.0.iter().any(|b| *b != 0)
            }

            /// Parse a lowercase or uppercase hex string of exactly the right length.
            #[must_use]
            pub fn from_hex(hex: &str) -> Option<Self> {
                let bytes = hex.as_bytes();
                if bytes.len() != $len * 2 {
                    return None;
                }
                let mut out = [0u8; $len];
                for (i, pair) in bytes.chunks_exact(2).enumerate() {
                    let hi = hex_digit(pair[0])?;
                    let lo = hex_digit(pair[1])?;
                    out[i] = (hi << 4) | lo;
                }
                Some($ty(out))
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                use fmt::Write as _;
                let mut s = String::with_capacity($len * 2);
                for b in &self.0 {
                    let _ = write!(s, "{b:02x}");
                }
                s
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

hex_id!(TraceId, 16);
hex_id!(SpanId, 8);

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Identity of one span: what a sample gets linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: u8,
}

impl SpanContext {
    pub const FLAG_SAMPLED: u8 = 0x01;

    #[must_use]
    pub fn new(trace_id: TraceId, span_id: SpanId, trace_flags: u8) -> Self {
        Self { trace_id, span_id, trace_flags }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.trace_flags & Self::FLAG_SAMPLED != 0
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}
