use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FILE_PREFIX: &str = "spanprof_";
pub const FILE_EXTENSION: &str = "sprec";

/// Names recording files `spanprof_<seq>_<yyyymmddThhmmss>.sprec` inside the
/// output directory, and recognizes them again for cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFileNamingConvention {
    directory: PathBuf,
}

impl RecordingFileNamingConvention {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path for recording number `sequence`, finalized at `time` (UTC).
    #[must_use]
    pub fn new_path(&self, sequence: u64, time: SystemTime) -> PathBuf {
        self.directory
            .join(format!("{FILE_PREFIX}{sequence}_{}.{FILE_EXTENSION}", format_utc(time)))
    }

    /// Whether `path` looks like a recording this convention produced.
    ///
    /// In-progress `.part` files never match.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let Some(stem) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_EXTENSION))
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return false;
        };
        let mut parts = stem.splitn(2, '_');
        let sequence_ok = parts.next().is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        let time_ok = parts.next().is_some_and(|t| t.len() == 15 && t.as_bytes()[8] == b'T');
        sequence_ok && time_ok
    }

    /// Matching files in the directory, oldest first by modification time.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read
    pub fn list_matching(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified()).unwrap_or(UNIX_EPOCH);
            files.push((modified, path));
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

/// `yyyymmddThhmmss` in UTC
fn format_utc(time: SystemTime) -> String {
    let secs = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
    let days = i64::try_from(secs / 86_400).unwrap_or_default();
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}{month:02}{day:02}T{:02}{:02}{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to (year, month, day) in the proleptic Gregorian
/// calendar (Howard Hinnant's algorithm).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, u32::try_from(month).unwrap_or(1), u32::try_from(day).unwrap_or(1))
}
