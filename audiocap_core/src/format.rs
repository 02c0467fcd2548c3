use std::time::Duration;

use crate::{Result, WriterError};

/// Byte order of the incoming PCM samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Shape of the raw PCM delivered to a writer.
///
/// The descriptor is fixed for the life of a writer and determines the sample
/// frame size (`channels * bits_per_sample / 8`), which is the smallest unit a
/// WAVE file may ever be cut on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    byte_order: ByteOrder,
}

impl FormatDescriptor {
    /// Construct a descriptor, validating the parameters up front so writer
    /// construction cannot fail later on arithmetic that assumes them.
    pub fn new(
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        byte_order: ByteOrder,
    ) -> Result<Self> {
        if channels == 0 || channels > 2 {
            return Err(WriterError::UnsupportedFormat(format!(
                "channel count must be 1 or 2, got {channels}"
            )));
        }
        if sample_rate == 0 {
            return Err(WriterError::UnsupportedFormat(
                "sample rate must be greater than zero".into(),
            ));
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(WriterError::UnsupportedFormat(format!(
                "bits per sample must be 8, 16, 24 or 32, got {bits_per_sample}"
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
            bits_per_sample,
            byte_order,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Size in bytes of one sample frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    /// Size in bytes of one sample on a single channel.
    pub fn sample_bytes(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Number of PCM bytes covering the given duration, rounded down to a
    /// whole number of sample frames.
    pub fn bytes_for_duration(&self, duration: Duration) -> usize {
        let frames = self.sample_rate as u64 * duration.as_millis() as u64 / 1_000;
        frames as usize * self.frame_bytes()
    }

    /// Validate that a PCM buffer holds a whole number of sample frames.
    pub fn check_alignment(&self, len: usize) -> Result<()> {
        let frame_bytes = self.frame_bytes();
        if len % frame_bytes != 0 {
            return Err(WriterError::MisalignedPcm { len, frame_bytes });
        }
        Ok(())
    }
}
