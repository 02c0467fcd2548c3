use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::debug;

use crate::format::{ByteOrder, FormatDescriptor};
use crate::writer::FileWriter;
use crate::{Result, WriterError};

/// Fixed size of the canonical RIFF/WAVE/fmt/data header.
pub const WAVE_HEADER_LEN: u64 = 44;

/// Offset of the outer RIFF chunk length field (file size minus 8).
const RIFF_LEN_OFFSET: u64 = 4;
/// Offset of the data chunk length field (file size minus 44).
const DATA_LEN_OFFSET: u64 = 40;

/// Uncompressed PCM writer with an exact byte ceiling.
///
/// The header is written on construction with zeroed size fields; finalize
/// seeks back and patches them. Truncation on overflow always lands on a
/// sample frame boundary, so the produced file never ends mid-sample.
#[derive(Debug)]
pub struct WaveWriter {
    file: File,
    path: PathBuf,
    format: FormatDescriptor,
    target_size: u64,
    len: u64,
    finalized: bool,
    created_at: SystemTime,
    last_write: SystemTime,
}

impl WaveWriter {
    /// Create the output file and write the 44-byte header. A target smaller
    /// than the minimum viable WAVE file (header plus one sample frame) is
    /// raised to that minimum.
    pub fn create<P: AsRef<Path>>(
        path: P,
        format: FormatDescriptor,
        target_size: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;

        let frame_bytes = format.frame_bytes() as u64;
        let min_viable = WAVE_HEADER_LEN + frame_bytes;
        let target = target_size.max(min_viable);
        if target > target_size {
            debug!(
                "raising WAVE target for '{}' from {target_size} to minimum viable {target}",
                path.display()
            );
        }

        write_header(&mut file, &format)?;
        let now = SystemTime::now();
        Ok(Self {
            file,
            path,
            format,
            target_size: target,
            len: WAVE_HEADER_LEN,
            finalized: false,
            created_at: now,
            last_write: now,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.finalized {
            return Err(WriterError::Finalized(self.path.clone()));
        }
        Ok(())
    }

    /// Write as much of `bytes` as the ceiling allows, cutting only on sample
    /// frame boundaries. Returns the overflow, finalizing the file when there
    /// is any.
    fn write_capped(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let room = self.target_size - self.len;
        if bytes.len() as u64 <= room {
            self.file.write_all(bytes)?;
            self.len += bytes.len() as u64;
            self.last_write = SystemTime::now();
            return Ok(None);
        }

        let frame_bytes = self.format.frame_bytes();
        let writable = (room as usize / frame_bytes) * frame_bytes;
        self.file.write_all(&bytes[..writable])?;
        self.len += writable as u64;
        self.last_write = SystemTime::now();

        let leftover = bytes[writable..].to_vec();
        self.patch_header()?;
        self.finalized = true;
        debug!(
            "WAVE file '{}' reached its target of {} bytes, {} bytes overflow",
            self.path.display(),
            self.target_size,
            leftover.len()
        );
        Ok(Some(leftover))
    }

    /// Seek back and fill in the two size fields left zeroed at construction.
    fn patch_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(RIFF_LEN_OFFSET))?;
        self.file.write_all(&((self.len - 8) as u32).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(DATA_LEN_OFFSET))?;
        self.file
            .write_all(&((self.len - WAVE_HEADER_LEN) as u32).to_le_bytes())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()?;
        Ok(())
    }

    /// Reverse the byte order of every sample. WAVE stores little-endian PCM,
    /// so big-endian input is swapped before it reaches the file.
    fn swap_samples(&self, pcm: &[u8]) -> Vec<u8> {
        let sample_bytes = self.format.sample_bytes();
        let mut swapped = pcm.to_vec();
        if sample_bytes > 1 {
            for sample in swapped.chunks_exact_mut(sample_bytes) {
                sample.reverse();
            }
        }
        swapped
    }
}

impl FileWriter for WaveWriter {
    fn write_silence(&mut self, duration: Duration) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let silence = vec![0u8; self.format.bytes_for_duration(duration)];
        self.write_capped(&silence)
    }

    fn write_pcm(&mut self, pcm: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.format.check_alignment(pcm.len())?;
        match self.format.byte_order() {
            ByteOrder::LittleEndian => self.write_capped(pcm),
            ByteOrder::BigEndian => {
                let swapped = self.swap_samples(pcm);
                self.write_capped(&swapped)
            }
        }
    }

    fn direct_write(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.write_capped(bytes)
    }

    fn finalize(&mut self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.patch_header()?;
        self.finalized = true;
        // Header patching never produces bytes beyond the ones already
        // written, so there is no overflow to hand back.
        Ok(None)
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

fn write_header(file: &mut File, format: &FormatDescriptor) -> Result<()> {
    let byte_rate = format.sample_rate() * format.frame_bytes() as u32;

    file.write_all(b"RIFF")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on finalize
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?; // PCM format tag
    file.write_all(&format.channels().to_le_bytes())?;
    file.write_all(&format.sample_rate().to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&(format.frame_bytes() as u16).to_le_bytes())?;
    file.write_all(&format.bits_per_sample().to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on finalize
    Ok(())
}
