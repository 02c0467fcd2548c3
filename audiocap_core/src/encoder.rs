use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, MonoPcm, Quality};

use crate::format::{ByteOrder, FormatDescriptor};
use crate::frame::{self, SAMPLES_PER_FRAME};
use crate::{Result, WriterError};

/// Minimum flush buffer LAME documents as always sufficient.
const FLUSH_SLACK_BYTES: usize = 7_200;

/// Ownership wrapper around one LAME encoder instance.
///
/// Besides converting PCM sample blocks into MPEG frames, the wrapper keeps
/// the bookkeeping the primitive itself does not: how many sample frames were
/// fed in, how many came back out as whole MPEG frames, and from the
/// difference an upper bound on the bytes a future [`FrameEncoder::flush`]
/// could still emit out of the encoder's internal lookahead (the bit
/// reservoir).
///
/// LAME hands back an unstructured byte stream that can end in the middle of
/// a frame. The wrapper holds that partial tail back and only ever returns
/// whole frames; the tail completes on a subsequent `encode` or on `flush`.
pub struct FrameEncoder {
    encoder: mp3lame_encoder::Encoder,
    format: FormatDescriptor,
    bitrate_kbps: u32,
    /// Per-channel sample frames submitted via `encode`.
    samples_in: u64,
    /// Per-channel sample frames accounted for by MPEG frames returned.
    samples_out: u64,
    frames_emitted: u32,
    /// Trailing partial frame from the previous LAME call.
    tail: Vec<u8>,
}

fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=95 => Bitrate::Kbps96,
        96..=111 => Bitrate::Kbps96,
        112..=127 => Bitrate::Kbps112,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=223 => Bitrate::Kbps192,
        224..=255 => Bitrate::Kbps224,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// Bitrate actually used after clamping to the nearest supported constant.
pub fn effective_bitrate(kbps: u32) -> u32 {
    match lame_bitrate(kbps) {
        Bitrate::Kbps96 => 96,
        Bitrate::Kbps112 => 112,
        Bitrate::Kbps128 => 128,
        Bitrate::Kbps160 => 160,
        Bitrate::Kbps192 => 192,
        Bitrate::Kbps224 => 224,
        Bitrate::Kbps256 => 256,
        _ => 320,
    }
}

impl FrameEncoder {
    /// Initialize LAME for the given input format and constant bitrate.
    pub fn new(format: FormatDescriptor, bitrate_kbps: u32) -> Result<Self> {
        if format.bits_per_sample() != 16 {
            return Err(WriterError::UnsupportedFormat(format!(
                "MP3 encoding requires 16-bit PCM input, got {} bits",
                format.bits_per_sample()
            )));
        }
        // Lower rates make LAME fall back to MPEG-2/2.5 frames, which the
        // MPEG-1 frame scanner does not handle.
        if !matches!(format.sample_rate(), 32_000 | 44_100 | 48_000) {
            return Err(WriterError::UnsupportedFormat(format!(
                "MP3 encoding requires a 32, 44.1 or 48 kHz sample rate, got {} Hz",
                format.sample_rate()
            )));
        }

        let mut builder = Builder::new()
            .ok_or_else(|| WriterError::EncoderInit("LAME context allocation failed".into()))?;
        builder
            .set_num_channels(format.channels() as u8)
            .map_err(|e| WriterError::EncoderInit(format!("set channels: {e:?}")))?;
        builder
            .set_sample_rate(format.sample_rate())
            .map_err(|e| WriterError::EncoderInit(format!("set sample rate: {e:?}")))?;
        builder
            .set_brate(lame_bitrate(bitrate_kbps))
            .map_err(|e| WriterError::EncoderInit(format!("set bitrate: {e:?}")))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| WriterError::EncoderInit(format!("set quality: {e:?}")))?;
        let encoder = builder
            .build()
            .map_err(|e| WriterError::EncoderInit(format!("build: {e:?}")))?;

        Ok(Self {
            encoder,
            format,
            bitrate_kbps: effective_bitrate(bitrate_kbps),
            samples_in: 0,
            samples_out: 0,
            frames_emitted: 0,
            tail: Vec::new(),
        })
    }

    /// Encode a block of 16-bit PCM. Returns whole MPEG frames only; a
    /// trailing partial frame is held back until the next call. May return an
    /// empty buffer while LAME is still accumulating enough samples.
    pub fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>> {
        let samples = self.to_samples(pcm);
        let channels = self.format.channels() as usize;
        let num_frames = samples.len() / channels;

        let mut raw: Vec<u8> =
            Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(num_frames));
        let written = if channels == 1 {
            self.encoder
                .encode(MonoPcm(&samples), raw.spare_capacity_mut())
        } else {
            let mut left = Vec::with_capacity(num_frames);
            let mut right = Vec::with_capacity(num_frames);
            for pair in samples.chunks_exact(2) {
                left.push(pair[0]);
                right.push(pair[1]);
            }
            self.encoder.encode(
                DualPcm {
                    left: &left,
                    right: &right,
                },
                raw.spare_capacity_mut(),
            )
        }
        .map_err(|e| WriterError::Encode(format!("{e:?}")))?;
        // SAFETY: LAME wrote `written` bytes into the spare capacity.
        unsafe {
            raw.set_len(written);
        }

        self.samples_in += num_frames as u64;

        let mut out = std::mem::take(&mut self.tail);
        out.extend_from_slice(&raw);
        let aligned = frame::aligned_prefix_len(&out)?;
        self.tail = out.split_off(aligned);

        self.account_output(&out)?;
        Ok(out)
    }

    /// Drain whatever LAME still buffers at end-of-stream, including the held
    /// back partial frame, which a complete stream closes exactly. The output
    /// buffer is sized from the reservoir estimate so the drain can never
    /// overrun.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        let cap = (self.max_reservoir_bytes() as usize).max(FLUSH_SLACK_BYTES);
        let mut raw: Vec<u8> = Vec::with_capacity(cap);
        let written = self
            .encoder
            .flush::<FlushNoGap>(raw.spare_capacity_mut())
            .map_err(|e| WriterError::Encode(format!("{e:?}")))?;
        // SAFETY: LAME wrote `written` bytes into the spare capacity.
        unsafe {
            raw.set_len(written);
        }

        let mut out = std::mem::take(&mut self.tail);
        out.extend_from_slice(&raw);

        self.account_output(&out)?;
        // The backlog is gone once the encoder has been drained.
        self.samples_in = self.samples_out;
        Ok(out)
    }

    /// Cumulative MPEG frames returned by `encode` and `flush`.
    pub fn frames_emitted(&self) -> u32 {
        self.frames_emitted
    }

    /// Upper bound on the MPEG frames the encoder may still hold internally.
    /// One extra frame covers the encoder's granule delay.
    pub fn reservoir_frame_estimate(&self) -> u32 {
        let backlog = self.samples_in.saturating_sub(self.samples_out);
        (backlog.div_ceil(u64::from(SAMPLES_PER_FRAME)) + 1) as u32
    }

    /// Upper bound on the bytes a future `flush` could add to the stream.
    pub fn max_reservoir_bytes(&self) -> u64 {
        let frame_len = 144_000 * self.bitrate_kbps as u64 / self.format.sample_rate() as u64 + 1;
        u64::from(self.reservoir_frame_estimate()) * frame_len
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }

    /// Attribute returned frames to the sample backlog. The buffer has been
    /// cut on a frame boundary by then, so a scan failure is a structural bug.
    fn account_output(&mut self, out: &[u8]) -> Result<()> {
        let frames = frame::count_frames(out)?;
        self.frames_emitted += frames;
        self.samples_out += u64::from(frames) * u64::from(SAMPLES_PER_FRAME);
        Ok(())
    }

    fn to_samples(&self, pcm: &[u8]) -> Vec<i16> {
        let convert = match self.format.byte_order() {
            ByteOrder::LittleEndian => i16::from_le_bytes,
            ByteOrder::BigEndian => i16::from_be_bytes,
        };
        pcm.chunks_exact(2)
            .map(|pair| convert([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_48k() -> FormatDescriptor {
        FormatDescriptor::new(2, 48_000, 16, ByteOrder::LittleEndian).unwrap()
    }

    #[test]
    fn rejects_non_16_bit_input() {
        let format = FormatDescriptor::new(2, 48_000, 8, ByteOrder::LittleEndian).unwrap();
        assert!(matches!(
            FrameEncoder::new(format, 128),
            Err(WriterError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_non_mpeg1_sample_rates() {
        for rate in [8_000, 16_000, 22_050, 24_000] {
            let format = FormatDescriptor::new(1, rate, 16, ByteOrder::LittleEndian).unwrap();
            assert!(
                matches!(
                    FrameEncoder::new(format, 128),
                    Err(WriterError::UnsupportedFormat(_))
                ),
                "{rate} Hz must be rejected at construction"
            );
        }
    }

    #[test]
    fn partial_frames_are_held_back_until_the_stream_closes() {
        let mut encoder = FrameEncoder::new(stereo_48k(), 128).unwrap();
        let one_second = vec![0u8; 48_000 * 4];
        let out = encoder.encode(&one_second).unwrap();
        let flushed = encoder.flush().unwrap();

        // Every returned buffer is a run of whole frames even though LAME's
        // own output can end mid-frame; the flush completes the held tail.
        frame::count_frames(&out).unwrap();
        frame::count_frames(&flushed).unwrap();
        // 128 kbps at 48 kHz gives constant 384-byte frames.
        assert_eq!((out.len() + flushed.len()) % 384, 0);
        assert!(encoder.frames_emitted() > 0);
    }

    #[test]
    fn reservoir_estimate_grows_with_backlog_and_clears_on_flush() {
        let mut encoder = FrameEncoder::new(stereo_48k(), 128).unwrap();
        let baseline = encoder.reservoir_frame_estimate();

        // Feed half a second of silence; whatever LAME keeps back must be
        // covered by the estimate.
        let pcm = vec![0u8; 48_000 / 2 * 4];
        let out = encoder.encode(&pcm).unwrap();
        let emitted = frame::count_frames(&out).unwrap();
        assert!(encoder.reservoir_frame_estimate() >= baseline);
        assert_eq!(encoder.frames_emitted(), emitted);

        let flushed = encoder.flush().unwrap();
        assert!(!flushed.is_empty() || !out.is_empty());
        // After a drain only the fixed safety margin remains.
        assert!(encoder.reservoir_frame_estimate() <= 1 + 1);
    }

    #[test]
    fn flush_output_stays_under_the_advertised_bound() {
        let mut encoder = FrameEncoder::new(stereo_48k(), 128).unwrap();
        let pcm = vec![0u8; 48_000 / 4 * 4];
        encoder.encode(&pcm).unwrap();

        let bound = encoder.max_reservoir_bytes().max(FLUSH_SLACK_BYTES as u64);
        let flushed = encoder.flush().unwrap();
        assert!(flushed.len() as u64 <= bound);
    }
}
