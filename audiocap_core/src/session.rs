use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::format::FormatDescriptor;
use crate::mp3::{Mp3Writer, DEFAULT_MIN_FRAME_COUNT};
use crate::wave::WaveWriter;
use crate::writer::{FileWriter, FormatWriter, UNBOUNDED_TARGET};
use crate::{Result, WriterError};

/// Output container for a recording session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    Wave,
    Mp3,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Wave => "wav",
            Container::Mp3 => "mp3",
        }
    }
}

/// Configuration for a [`RecordingSession`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_folder: PathBuf,
    subfolder: PathBuf,
    file_prefix: String,
    container: Container,
    descriptor: FormatDescriptor,
    merged_target_size: u64,
    split_size: u64,
    mp3_bitrate_kbps: u32,
    min_frame_count: u32,
}

impl SessionConfig {
    /// Start building a configuration. `subfolder` must be a plain directory
    /// name; it becomes a direct child of `base_folder`.
    pub fn builder<B: AsRef<Path>, S: AsRef<Path>>(
        base_folder: B,
        subfolder: S,
        file_prefix: &str,
        container: Container,
        descriptor: FormatDescriptor,
    ) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig {
                base_folder: base_folder.as_ref().to_path_buf(),
                subfolder: subfolder.as_ref().to_path_buf(),
                file_prefix: file_prefix.to_owned(),
                container,
                descriptor,
                merged_target_size: UNBOUNDED_TARGET,
                split_size: 8_000_000,
                mp3_bitrate_kbps: 128,
                min_frame_count: DEFAULT_MIN_FRAME_COUNT,
            },
        }
    }

    fn directory(&self) -> PathBuf {
        self.base_folder.join(&self.subfolder)
    }
}

/// Builder for [`SessionConfig`], validating on [`SessionConfigBuilder::build`].
#[derive(Clone, Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Byte budget for the merged recording file.
    pub fn merged_target_size(mut self, bytes: u64) -> Self {
        self.config.merged_target_size = bytes;
        self
    }

    /// Byte ceiling for each split partition file.
    pub fn split_size(mut self, bytes: u64) -> Self {
        self.config.split_size = bytes;
        self
    }

    /// Constant bitrate for MP3 output; ignored for WAVE.
    pub fn mp3_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.config.mp3_bitrate_kbps = kbps;
        self
    }

    /// Override the minimum playable frame count policy for MP3 output.
    pub fn min_frame_count(mut self, frames: u32) -> Self {
        self.config.min_frame_count = frames;
        self
    }

    pub fn build(self) -> Result<SessionConfig> {
        let config = self.config;

        let mut components = config.subfolder.components();
        let direct_child = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !direct_child {
            return Err(WriterError::InvalidSubfolder(config.subfolder.clone()));
        }

        if config.merged_target_size == 0 || config.split_size == 0 {
            return Err(WriterError::InvalidTargetSize);
        }

        Ok(config)
    }
}

struct SessionState {
    merged: FormatWriter,
    current: FormatWriter,
    /// Paths of every split file created, in write order.
    split_paths: Vec<PathBuf>,
    split_count: usize,
    finalized: bool,
}

enum WriteOp<'a> {
    Pcm(&'a [u8]),
    Silence(Duration),
}

/// Fan-out orchestrator for one recording.
///
/// Every audio or silence write goes to the merged writer and to the current
/// split writer. A split writer that reaches its ceiling is replaced by a
/// successor file that receives the overflow; the merged writer reaching its
/// ceiling finalizes the entire session.
///
/// All operations share one mutex covering the whole write-or-finalize
/// sequence. The live-audio path ([`RecordingSession::write_pcm`]) blocks on
/// the lock because packets must never be dropped; the periodic gap filler
/// ([`RecordingSession::try_write_silence`]) skips its turn when the session
/// is busy.
pub struct RecordingSession {
    config: SessionConfig,
    directory: PathBuf,
    state: Mutex<SessionState>,
}

impl RecordingSession {
    /// Prepare the output directory and open the merged and first split
    /// writers. Fails without leaving partial output behind when any part of
    /// the setup cannot be completed.
    pub fn create(config: SessionConfig) -> Result<Self> {
        let directory = config.directory();
        fs::create_dir_all(&directory)?;

        let merged_path = directory.join(format!(
            "{}.{}",
            config.file_prefix,
            config.container.extension()
        ));
        let merged = new_writer(&config, &merged_path, config.merged_target_size)?;

        let first_split = split_path(&directory, &config, 1);
        let current = match new_writer(&config, &first_split, config.split_size) {
            Ok(writer) => writer,
            Err(err) => {
                // Do not leave a half-created session on disk.
                let _ = fs::remove_file(&merged_path);
                return Err(err);
            }
        };

        info!(
            "recording session started in '{}' (merged target {} bytes, splits of {} bytes)",
            directory.display(),
            config.merged_target_size,
            config.split_size
        );
        Ok(Self {
            config,
            directory,
            state: Mutex::new(SessionState {
                merged,
                current,
                split_paths: vec![first_split],
                split_count: 1,
                finalized: false,
            }),
        })
    }

    /// Write a block of raw PCM to both outputs. Blocking lock acquisition:
    /// live audio packets are never dropped.
    pub fn write_pcm(&self, pcm: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, WriteOp::Pcm(pcm))
    }

    /// Write zero-amplitude audio covering `duration` to both outputs.
    pub fn write_silence(&self, duration: Duration) -> Result<()> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, WriteOp::Silence(duration))
    }

    /// Non-blocking variant of [`RecordingSession::write_silence`] for the
    /// periodic gap filler. Returns `false` without writing when the session
    /// mutex is already held.
    pub fn try_write_silence(&self, duration: Duration) -> Result<bool> {
        match self.state.try_lock() {
            Some(mut state) => {
                self.write_locked(&mut state, WriteOp::Silence(duration))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the recording: finalize the merged writer and the split chain.
    /// Fails with a state error when the session already finalized itself.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(WriterError::Finalized(self.directory.clone()));
        }
        self.finalize_locked(&mut state)
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Path of the merged recording file.
    pub fn file(&self) -> PathBuf {
        self.state.lock().merged.path().to_path_buf()
    }

    /// Ordered paths of the split files produced so far. Concatenating their
    /// audio reconstructs the merged recording.
    pub fn separate_files(&self) -> Vec<PathBuf> {
        self.state.lock().split_paths.clone()
    }

    fn write_locked(&self, state: &mut SessionState, op: WriteOp<'_>) -> Result<()> {
        if state.finalized {
            return Err(WriterError::Finalized(self.directory.clone()));
        }

        // Merged side. A transient IO failure drops this chunk for both
        // outputs, keeping the recording alive and the splits an exact
        // reconstruction of the merged audio; contract violations propagate.
        match apply(&mut state.merged, &op) {
            Ok(Some(overflow)) => {
                debug!(
                    "merged file reached its budget, dropping {} overflow bytes",
                    overflow.len()
                );
            }
            Ok(None) => {}
            Err(err) if err.is_transient() => {
                warn!("merged write failed, dropping chunk for both outputs: {err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        // The merged writer hitting its ceiling ends the whole session; the
        // split chain is sealed where it stands.
        if state.merged.is_finalized() {
            info!("merged file is full, finalizing session");
            return self.finalize_locked(state);
        }

        // Split side, with rotation into successor files on overflow.
        if state.current.is_finalized() {
            self.new_split(state)?;
        }
        match apply(&mut state.current, &op) {
            Ok(Some(leftover)) => {
                if let Err(err) = self.rotate_leftover(state, leftover) {
                    if err.is_transient() {
                        warn!("split rotation failed, dropping chunk tail: {err}");
                    } else {
                        return Err(err);
                    }
                }
            }
            Ok(None) => {}
            Err(err) if err.is_transient() => {
                warn!("split write failed, dropping chunk: {err}");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Feed overflow bytes into freshly created successor split files until
    /// none remain. The loop is bounded by requiring progress on every pass;
    /// a misconfigured capacity would otherwise spin forever.
    fn rotate_leftover(&self, state: &mut SessionState, mut leftover: Vec<u8>) -> Result<()> {
        while !leftover.is_empty() {
            self.new_split(state)?;
            match state.current.direct_write(&leftover)? {
                Some(rest) => {
                    if rest.len() >= leftover.len() {
                        return Err(WriterError::Bitstream(format!(
                            "split file made no progress on {} overflow bytes",
                            leftover.len()
                        )));
                    }
                    leftover = rest;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn new_split(&self, state: &mut SessionState) -> Result<()> {
        state.split_count += 1;
        let path = split_path(&self.directory, &self.config, state.split_count);
        debug!("rotating to split file '{}'", path.display());
        state.current = new_writer(&self.config, &path, self.config.split_size)?;
        state.split_paths.push(path);
        Ok(())
    }

    fn finalize_locked(&self, state: &mut SessionState) -> Result<()> {
        // Mark first so no further writes are accepted even when part of the
        // finalization fails.
        state.finalized = true;

        if !state.merged.is_finalized() {
            // Overflow past the merged budget has nowhere to go.
            if let Some(overflow) = state.merged.finalize()? {
                debug!(
                    "dropping {} bytes of merged finalize overflow",
                    overflow.len()
                );
            }
        }

        if !state.current.is_finalized() {
            // The merged recording ends here as well, so a flush tail that no
            // longer fits the last split has nothing left to reconstruct.
            if let Some(leftover) = state.current.finalize()? {
                debug!(
                    "dropping {} trailing split bytes past the session end",
                    leftover.len()
                );
            }
        }

        info!(
            "recording session in '{}' finalized with {} split file(s)",
            self.directory.display(),
            state.split_count
        );
        Ok(())
    }
}

fn apply(writer: &mut FormatWriter, op: &WriteOp<'_>) -> Result<Option<Vec<u8>>> {
    match op {
        WriteOp::Pcm(pcm) => writer.write_pcm(pcm),
        WriteOp::Silence(duration) => writer.write_silence(*duration),
    }
}

fn new_writer(config: &SessionConfig, path: &Path, target: u64) -> Result<FormatWriter> {
    match config.container {
        Container::Wave => Ok(FormatWriter::Wave(WaveWriter::create(
            path,
            config.descriptor,
            target,
        )?)),
        Container::Mp3 => Ok(FormatWriter::Mp3(Mp3Writer::create(
            path,
            config.descriptor,
            config.mp3_bitrate_kbps,
            target,
            config.min_frame_count,
        )?)),
    }
}

fn split_path(directory: &Path, config: &SessionConfig, index: usize) -> PathBuf {
    directory.join(format!(
        "{}_{}.{}",
        config.file_prefix,
        index,
        config.container.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ByteOrder;

    fn descriptor() -> FormatDescriptor {
        FormatDescriptor::new(1, 8_000, 16, ByteOrder::LittleEndian).unwrap()
    }

    #[test]
    fn build_rejects_nested_subfolder() {
        let err = SessionConfig::builder(
            "/tmp/base",
            "nested/child",
            "rec",
            Container::Wave,
            descriptor(),
        )
        .build()
        .unwrap_err();
        assert!(matches!(err, WriterError::InvalidSubfolder(_)));
    }

    #[test]
    fn build_rejects_parent_traversal() {
        let err =
            SessionConfig::builder("/tmp/base", "..", "rec", Container::Wave, descriptor())
                .build()
                .unwrap_err();
        assert!(matches!(err, WriterError::InvalidSubfolder(_)));
    }

    #[test]
    fn build_rejects_zero_sizes() {
        let err = SessionConfig::builder("/tmp", "rec", "rec", Container::Wave, descriptor())
            .split_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, WriterError::InvalidTargetSize));
    }

    #[test]
    fn gap_filler_skips_when_the_session_is_busy() {
        let base = tempfile::tempdir().unwrap();
        let config =
            SessionConfig::builder(base.path(), "busy", "rec", Container::Wave, descriptor())
                .build()
                .unwrap();
        let session = RecordingSession::create(config).unwrap();

        // With the session mutex held (as during a live audio write) the gap
        // filler must step aside instead of blocking.
        let held = session.state.lock();
        assert!(!session.try_write_silence(Duration::from_millis(100)).unwrap());
        drop(held);
        assert!(session.try_write_silence(Duration::from_millis(100)).unwrap());
    }
}
