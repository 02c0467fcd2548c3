//! MPEG-1 Layer 3 frame header arithmetic and sync scanning.
//!
//! Frames are the only valid truncation granularity inside an MP3 stream, so
//! every size decision in [`crate::Mp3Writer`] goes through this module. The
//! scanner is strict: a bitrate index of 0 or 15, a reserved sample-rate
//! index, or a frame whose declared length runs past the available bytes all
//! indicate an encoder or algorithm bug and are reported as
//! [`WriterError::Bitstream`].

use crate::{Result, WriterError};

/// Samples per MPEG-1 Layer 3 frame.
pub const SAMPLES_PER_FRAME: u32 = 1_152;

/// First byte of a frame sync word.
const SYNC_BYTE_0: u8 = 0xFF;
/// Second byte of a frame sync word: MPEG-1, Layer 3, no CRC.
const SYNC_BYTE_1: u8 = 0xFB;

/// Bitrate lookup for MPEG-1 Layer 3, indexed by the four header bits.
/// Indices 0 (free format) and 15 (bad) are invalid in the streams LAME
/// produces.
const BITRATE_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Largest frame LAME can emit: 320 kbps at 32 kHz, plus the padding byte.
pub const MAX_FRAME_LEN: usize = 144_000 * 320 / 32_000 + 1;

/// How far a backward sync scan may look before it is declared lost. Two
/// worst-case frames is enough for any valid stream; running past it means
/// the bytes on disk are not the frames this writer produced.
const MAX_BACKWARD_SCAN: usize = 2 * MAX_FRAME_LEN;

/// One located frame inside a scanned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Offset of the sync word relative to the start of the buffer.
    pub offset: usize,
    /// Total frame length in bytes, padding included.
    pub len: usize,
}

impl FrameInfo {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Decode the length of the frame whose sync word starts at `buf[offset]`.
pub fn frame_len_at(buf: &[u8], offset: usize) -> Result<usize> {
    if buf.len() < offset + 4 {
        return Err(WriterError::Bitstream(format!(
            "frame header at offset {offset} is truncated"
        )));
    }
    if buf[offset] != SYNC_BYTE_0 || buf[offset + 1] != SYNC_BYTE_1 {
        return Err(WriterError::Bitstream(format!(
            "no frame sync at offset {offset}: {:#04x}{:02x}",
            buf[offset],
            buf[offset + 1]
        )));
    }

    let bitrate_index = (buf[offset + 2] >> 4) as usize;
    if bitrate_index == 0 || bitrate_index == 15 {
        return Err(WriterError::Bitstream(format!(
            "invalid bitrate index {bitrate_index} at offset {offset}"
        )));
    }
    let kbps = BITRATE_KBPS[bitrate_index];

    let sample_rate = match (buf[offset + 2] >> 2) & 0b11 {
        0 => 44_100,
        1 => 48_000,
        2 => 32_000,
        _ => {
            return Err(WriterError::Bitstream(format!(
                "reserved sample rate index at offset {offset}"
            )))
        }
    };
    let padding = ((buf[offset + 2] >> 1) & 0b1) as usize;

    // samplesPerFrame / 8 * bitrateBytesPerSec, i.e. 144 * kbps * 1000 / rate.
    Ok(144_000 * kbps as usize / sample_rate + padding)
}

/// Size of a leading ID3v2 tag, or zero when the buffer does not start with
/// one. The tag length is stored syncsafe (7 bits per byte) and excludes the
/// 10-byte tag header.
pub fn id3_tag_len(buf: &[u8]) -> usize {
    if buf.len() < 10 || &buf[..3] != b"ID3" {
        return 0;
    }
    let size = buf[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (b & 0x7F) as usize);
    10 + size
}

/// Walk a buffer frame-by-frame from its start (skipping one leading ID3v2
/// tag) and return every frame found. The buffer must consist of whole
/// frames; anything else is a structural error.
pub fn walk_frames(buf: &[u8]) -> Result<Vec<FrameInfo>> {
    let mut frames = Vec::new();
    let mut offset = id3_tag_len(buf);

    while offset < buf.len() {
        let len = frame_len_at(buf, offset)?;
        if offset + len > buf.len() {
            return Err(WriterError::Bitstream(format!(
                "frame at offset {offset} declares {len} bytes but only {} remain",
                buf.len() - offset
            )));
        }
        frames.push(FrameInfo { offset, len });
        offset += len;
    }

    Ok(frames)
}

/// Length of the longest whole-frame prefix of `buf` (leading ID3v2 tag
/// included). A partial frame at the end is tolerated and excluded; a bad
/// header at a frame boundary is still a structural error.
pub fn aligned_prefix_len(buf: &[u8]) -> Result<usize> {
    let tag = id3_tag_len(buf);
    if tag > buf.len() {
        return Ok(0);
    }

    let mut offset = tag;
    while offset < buf.len() {
        if buf.len() < offset + 4 {
            break;
        }
        let len = frame_len_at(buf, offset)?;
        if offset + len > buf.len() {
            break;
        }
        offset += len;
    }
    Ok(offset)
}

/// Count whole frames in a buffer of frame-aligned bytes.
pub fn count_frames(buf: &[u8]) -> Result<u32> {
    Ok(walk_frames(buf)?.len() as u32)
}

/// Find the frame sync word closest to (at or before) `from` by scanning
/// backward. The scan is bounded; exhausting the bound means the stream is
/// corrupt.
pub fn rewind_to_sync(buf: &[u8], from: usize) -> Result<usize> {
    if buf.len() < 2 {
        return Err(WriterError::Bitstream(
            "buffer too short to contain a frame sync".into(),
        ));
    }
    let start = from.min(buf.len() - 2);
    let floor = start.saturating_sub(MAX_BACKWARD_SCAN);

    let mut offset = start;
    loop {
        if buf[offset] == SYNC_BYTE_0 && buf[offset + 1] == SYNC_BYTE_1 {
            return Ok(offset);
        }
        if offset == floor {
            return Err(WriterError::Bitstream(format!(
                "no frame sync within {MAX_BACKWARD_SCAN} bytes before offset {from}"
            )));
        }
        offset -= 1;
    }
}
