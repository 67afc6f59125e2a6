//! Recording lifecycle: naming, rotation, file handoff and cleanup
//!
//! - `naming`: [`RecordingFileNamingConvention`]
//! - `recorder`: [`Recorder`], the single active recording
//! - `sequencer`: [`RecordingSequencer`], the rotation worker
//! - `escape_hatch`: [`RecordingEscapeHatch`], disk and backlog guard
//! - `path_handler`: [`PathHandler`], one finished file through the pipeline
//! - `cleanup`: [`DirCleanup`], delete or retain processed files

pub mod cleanup;
pub mod escape_hatch;
pub mod naming;
pub mod path_handler;
pub mod recorder;
pub mod sequencer;

pub use cleanup::DirCleanup;
pub use escape_hatch::{EscapeHatch, RecordingEscapeHatch, MAX_PENDING_FILES, MIN_FREE_SPACE_BYTES};
pub use naming::{RecordingFileNamingConvention, FILE_EXTENSION, FILE_PREFIX};
pub use path_handler::{FileFinishedCallback, PathHandler};
pub use recorder::{Recorder, RecordingFileCallback, MAX_AGE_FACTOR};
pub use sequencer::RecordingSequencer;
