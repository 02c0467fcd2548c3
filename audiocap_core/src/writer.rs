use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::{Mp3Writer, Result, WaveWriter};

/// Sentinel target size for a writer with no byte ceiling.
pub const UNBOUNDED_TARGET: u64 = u64::MAX;

/// Capability set shared by every format-specific writer.
///
/// All write operations return `Ok(Some(bytes))` when the write hit the
/// writer's byte ceiling: the writer has finalized itself as a side effect and
/// the returned bytes are the already-encoded overflow that must be forwarded
/// to a successor file via [`FileWriter::direct_write`]. `Ok(None)` means the
/// write fit entirely. Any write after finalization fails with
/// [`crate::WriterError::Finalized`].
pub trait FileWriter {
    /// Synthesize `duration` of zero-amplitude PCM and write it; equivalent
    /// to [`FileWriter::write_pcm`] on a zeroed buffer of the same length.
    fn write_silence(&mut self, duration: Duration) -> Result<Option<Vec<u8>>>;

    /// Convert (and encode, if needed) raw input PCM and write it. The buffer
    /// must hold a whole number of sample frames.
    fn write_pcm(&mut self, pcm: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write bytes already in the target format, without conversion. Used to
    /// push overflow from a finalized writer into its successor; the caller
    /// is responsible for handing over well-formed bytes.
    fn direct_write(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Complete trailing metadata and close the writer for further writes.
    /// Returns bytes produced during finalization that no longer fit under
    /// the ceiling.
    fn finalize(&mut self) -> Result<Option<Vec<u8>>>;

    /// Current length of the output file in bytes.
    fn file_len(&self) -> u64;

    /// Byte ceiling for this file. May have grown past the configured value
    /// when the format's minimum viable size demanded it.
    fn target_size(&self) -> u64;

    fn is_finalized(&self) -> bool;

    fn path(&self) -> &Path;

    fn created_at(&self) -> SystemTime;

    fn last_write(&self) -> SystemTime;
}

/// Closed set of supported writers, dispatched exhaustively.
pub enum FormatWriter {
    Wave(WaveWriter),
    Mp3(Mp3Writer),
}

impl FormatWriter {
    fn inner(&self) -> &dyn FileWriter {
        match self {
            FormatWriter::Wave(w) => w,
            FormatWriter::Mp3(w) => w,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FileWriter {
        match self {
            FormatWriter::Wave(w) => w,
            FormatWriter::Mp3(w) => w,
        }
    }
}

impl FileWriter for FormatWriter {
    fn write_silence(&mut self, duration: Duration) -> Result<Option<Vec<u8>>> {
        self.inner_mut().write_silence(duration)
    }

    fn write_pcm(&mut self, pcm: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner_mut().write_pcm(pcm)
    }

    fn direct_write(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner_mut().direct_write(bytes)
    }

    fn finalize(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner_mut().finalize()
    }

    fn file_len(&self) -> u64 {
        self.inner().file_len()
    }

    fn target_size(&self) -> u64 {
        self.inner().target_size()
    }

    fn is_finalized(&self) -> bool {
        self.inner().is_finalized()
    }

    fn path(&self) -> &Path {
        self.inner().path()
    }

    fn created_at(&self) -> SystemTime {
        self.inner().created_at()
    }

    fn last_write(&self) -> SystemTime {
        self.inner().last_write()
    }
}
