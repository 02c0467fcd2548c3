//! Size-bounded audio capture writers.
//!
//! The crate turns an indefinite stream of raw PCM into a set of seekable,
//! size-capped media files. A [`RecordingSession`] fans every write out to one
//! "merged" file (the whole recording, capped at a caller-supplied budget) and
//! a rotating chain of "split" files (fixed-size partitions of the same audio,
//! sized for upload limits). Two container formats are supported: uncompressed
//! WAVE and MPEG-1 Layer 3, the latter encoded through LAME.
//!
//! Writers enforce their byte ceiling exactly while staying structurally
//! valid: WAVE files are truncated on sample boundaries and their header size
//! fields patched on finalize; MP3 files are truncated on frame boundaries and
//! carry a retroactively patched Xing header.

use std::path::PathBuf;

use thiserror::Error;

mod encoder;
mod format;
mod frame;
mod mp3;
mod session;
mod wave;
mod writer;

pub use encoder::FrameEncoder;
pub use format::{ByteOrder, FormatDescriptor};
pub use mp3::{Mp3Writer, DEFAULT_MIN_FRAME_COUNT};
pub use session::{Container, RecordingSession, SessionConfig, SessionConfigBuilder};
pub use wave::WaveWriter;
pub use writer::{FileWriter, FormatWriter, UNBOUNDED_TARGET};

/// Errors produced by the capture writers.
#[derive(Debug, Error)]
pub enum WriterError {
    /// Wrapper around IO errors encountered while creating or writing files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error returned when a write or finalize is attempted on a writer that
    /// has already been finalized.
    #[error("writer for '{0}' is already finalized")]
    Finalized(PathBuf),

    /// Error returned when a PCM buffer does not contain a whole number of
    /// sample frames.
    #[error("PCM buffer of {len} bytes is not a multiple of the {frame_bytes}-byte sample frame")]
    MisalignedPcm { len: usize, frame_bytes: usize },

    /// Error returned when the audio format descriptor is unusable.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Error returned when the recording subfolder is not a direct child of
    /// the base folder.
    #[error("subfolder '{0}' must be a direct child of the base folder")]
    InvalidSubfolder(PathBuf),

    /// Error returned when a configured target size is zero.
    #[error("target size must be greater than zero bytes")]
    InvalidTargetSize,

    /// Error returned when the LAME encoder cannot be initialized with the
    /// requested parameters.
    #[error("MP3 encoder initialization failed: {0}")]
    EncoderInit(String),

    /// Error returned when the LAME encoder rejects a buffer mid-stream.
    #[error("MP3 encoding failed: {0}")]
    Encode(String),

    /// Structural invariant violation inside an MPEG bitstream. This class of
    /// error indicates an encoder or algorithm bug rather than an
    /// environmental condition and should never occur in practice.
    #[error("corrupt MPEG bitstream: {0}")]
    Bitstream(String),
}

impl WriterError {
    /// Whether the error is a transient IO failure that a live recording
    /// should survive, as opposed to a caller contract violation or a
    /// structural bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, WriterError::Io(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WriterError>;
