use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, warn};

use crate::encoder::FrameEncoder;
use crate::format::FormatDescriptor;
use crate::frame::{self, MAX_FRAME_LEN};
use crate::writer::FileWriter;
use crate::{Result, WriterError};

/// Fewest frames a produced file may carry. MP3 decoders and the Xing header
/// need a handful of frames to be meaningful, so a writer grows its target
/// rather than truncate below this count.
///
/// The value is inherited policy with no documented derivation; treat changes
/// as a domain-expert decision, not a tuning knob.
pub const DEFAULT_MIN_FRAME_COUNT: u32 = 10;

/// Offset of the Xing VBR fields inside the first frame: 4 header bytes plus
/// 17 side-info bytes for single-channel streams.
const XING_OFFSET_MONO: u64 = 21;
/// Same, with the 32 side-info bytes of a two-channel stream.
const XING_OFFSET_STEREO: u64 = 36;

/// Xing flags word: frame count and byte count fields present.
const XING_FLAGS: u32 = 0x0000_0003;

/// MPEG-1 Layer 3 writer with an exact byte ceiling.
///
/// The emitted stream never exceeds the target size, always ends on a frame
/// boundary, and carries a Xing header patched with the true frame and byte
/// counts once they are known. Overflow that no longer fits is handed back to
/// the caller as already-encoded frames.
pub struct Mp3Writer {
    file: File,
    path: PathBuf,
    format: FormatDescriptor,
    encoder: FrameEncoder,
    target_size: u64,
    len: u64,
    frames_on_disk: u32,
    min_frame_count: u32,
    flushed: bool,
    finalized: bool,
    created_at: SystemTime,
    last_write: SystemTime,
}

impl Mp3Writer {
    /// Create the output file and initialize the encoder. Construction fails
    /// before anything is written when the encoder rejects the format.
    pub fn create<P: AsRef<Path>>(
        path: P,
        format: FormatDescriptor,
        bitrate_kbps: u32,
        target_size: u64,
        min_frame_count: u32,
    ) -> Result<Self> {
        let encoder = FrameEncoder::new(format, bitrate_kbps)?;
        let path = path.as_ref().to_path_buf();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let now = SystemTime::now();
        Ok(Self {
            file,
            path,
            format,
            encoder,
            target_size,
            len: 0,
            frames_on_disk: 0,
            min_frame_count,
            flushed: false,
            finalized: false,
            created_at: now,
            last_write: now,
        })
    }

    /// Frames currently on disk, as counted by the sync scanner.
    pub fn frame_count(&self) -> u32 {
        self.frames_on_disk
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(WriterError::Finalized(self.path.clone()));
        }
        Ok(())
    }

    /// Single funnel for every write. `pending` holds already-encoded frames;
    /// when the ceiling is at risk the encoder is drained and the stream cut
    /// on the last frame boundary that fits.
    fn write_encoded(&mut self, mut pending: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let potential = self.len + pending.len() as u64 + self.encoder.max_reservoir_bytes();
        if potential <= self.target_size {
            self.append(&pending)?;
            return Ok(None);
        }

        debug!(
            "MP3 file '{}' may reach {potential} of {} target bytes, cutting",
            self.path.display(),
            self.target_size
        );
        if !self.flushed {
            let drained = self.encoder.flush()?;
            pending.extend_from_slice(&drained);
            self.flushed = true;
        }
        let leftover = self.cut_on_frame_boundary(pending)?;
        self.finish()?;
        Ok(if leftover.is_empty() {
            None
        } else {
            Some(leftover)
        })
    }

    /// Decide where the stream ends. Writes the largest whole-frame prefix of
    /// `pending` that fits under the target, growing the target instead when
    /// the minimum playable frame count is not yet on disk. Whatever is not
    /// written comes back as leftover.
    fn cut_on_frame_boundary(&mut self, pending: Vec<u8>) -> Result<Vec<u8>> {
        let frames = frame::walk_frames(&pending)?;
        let needed = self.min_frame_count.saturating_sub(self.frames_on_disk) as usize;

        if frames.len() <= needed {
            // Even the drained encoder cannot complete the minimum frame
            // count; keep every frame we have and grow the target to match.
            self.append(&pending)?;
            if self.len > self.target_size {
                debug!(
                    "growing MP3 target for '{}' to {} bytes to keep {} frames playable",
                    self.path.display(),
                    self.len,
                    self.frames_on_disk
                );
                self.target_size = self.len;
            }
            return Ok(Vec::new());
        }

        let mut cut = 0usize;
        let mut taken = 0usize;
        for info in &frames {
            let completes_minimum = taken < needed;
            let fits = self.len + info.end() as u64 <= self.target_size;
            if completes_minimum || fits {
                cut = info.end();
                taken += 1;
            } else {
                break;
            }
        }

        if cut == 0 {
            return self.cut_existing_file(pending);
        }

        self.append(&pending[..cut])?;
        if self.len > self.target_size {
            debug!(
                "growing MP3 target for '{}' to {} bytes to reach the minimum frame count",
                self.path.display(),
                self.len
            );
            self.target_size = self.len;
        }
        Ok(pending[cut..].to_vec())
    }

    /// No new frame fits at all. If the file already sits past the ceiling
    /// (the reservoir estimate can undershoot), scan backward from the
    /// ceiling to the nearest frame sync and truncate the on-disk file there;
    /// the truncated tail joins the pending bytes as leftover.
    fn cut_existing_file(&mut self, pending: Vec<u8>) -> Result<Vec<u8>> {
        if self.len <= self.target_size {
            return Ok(pending);
        }

        warn!(
            "MP3 file '{}' overshot its target ({} > {}), truncating backward",
            self.path.display(),
            self.len,
            self.target_size
        );
        let window_start = self
            .target_size
            .saturating_sub((2 * MAX_FRAME_LEN) as u64);
        let mut window = vec![0u8; (self.len - window_start) as usize];
        self.file.seek(SeekFrom::Start(window_start))?;
        self.file.read_exact(&mut window)?;

        let sync = frame::rewind_to_sync(&window, (self.target_size - window_start) as usize)?;
        let dropped = &window[sync..];
        let dropped_frames = frame::count_frames(dropped)?;

        let keep = window_start + sync as u64;
        self.file.set_len(keep)?;
        self.file.seek(SeekFrom::End(0))?;
        self.len = keep;
        self.frames_on_disk -= dropped_frames;

        let mut leftover = dropped.to_vec();
        leftover.extend_from_slice(&pending);
        Ok(leftover)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let frames = frame::count_frames(bytes)?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        self.frames_on_disk += frames;
        self.last_write = SystemTime::now();
        Ok(())
    }

    /// Patch the Xing header in place and seal the writer. MP3 has no
    /// fixed-size directory like WAVE's header, so the VBR fields can only be
    /// written once the true frame and byte counts are known.
    fn finish(&mut self) -> Result<()> {
        if self.frames_on_disk == 0 {
            debug!(
                "MP3 file '{}' finalized without frames, skipping Xing patch",
                self.path.display()
            );
            self.finalized = true;
            return Ok(());
        }

        let mut head = [0u8; 10];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut head)?;
        let frame_start = frame::id3_tag_len(&head) as u64;

        let xing_offset = if self.format.channels() == 1 {
            XING_OFFSET_MONO
        } else {
            XING_OFFSET_STEREO
        };

        self.file.seek(SeekFrom::Start(frame_start + xing_offset))?;
        self.file.write_all(b"Xing")?;
        self.file.write_all(&XING_FLAGS.to_be_bytes())?;
        self.file.write_all(&self.frames_on_disk.to_be_bytes())?;
        self.file.write_all(&(self.len as u32).to_be_bytes())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()?;

        self.finalized = true;
        self.last_write = SystemTime::now();
        debug!(
            "MP3 file '{}' finalized: {} frames, {} bytes",
            self.path.display(),
            self.frames_on_disk,
            self.len
        );
        Ok(())
    }
}

impl FileWriter for Mp3Writer {
    fn write_silence(&mut self, duration: Duration) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let silence = vec![0u8; self.format.bytes_for_duration(duration)];
        let encoded = self.encoder.encode(&silence)?;
        self.write_encoded(encoded)
    }

    fn write_pcm(&mut self, pcm: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.format.check_alignment(pcm.len())?;
        let encoded = self.encoder.encode(pcm)?;
        self.write_encoded(encoded)
    }

    fn direct_write(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.write_encoded(bytes.to_vec())
    }

    fn finalize(&mut self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let pending = if self.flushed {
            Vec::new()
        } else {
            let drained = self.encoder.flush()?;
            self.flushed = true;
            drained
        };
        let leftover = self.cut_on_frame_boundary(pending)?;
        self.finish()?;
        Ok(if leftover.is_empty() {
            None
        } else {
            Some(leftover)
        })
    }

    fn file_len(&self) -> u64 {
        self.len
    }

    fn target_size(&self) -> u64 {
        self.target_size
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn created_at(&self) -> SystemTime {
        self.created_at
    }

    fn last_write(&self) -> SystemTime {
        self.last_write
    }
}
