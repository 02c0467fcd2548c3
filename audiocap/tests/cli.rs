use assert_cmd::Command;
use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

/// Generate a small single-channel WAV file for testing.
///
/// The fixtures are produced on the fly by emitting a PCM RIFF header followed
/// by procedurally generated sine-wave samples, so no binary assets need to be
/// committed to the repository.
fn write_test_tone<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
) -> Result<(), Box<dyn Error>> {
    let total_samples = (sample_rate as u64 * duration_ms + 999) / 1_000;
    let mut samples = Vec::with_capacity(total_samples as usize * 2);

    for n in 0..total_samples {
        let theta = (n as f32 / sample_rate as f32) * 2.0 * std::f32::consts::PI * 440.0;
        let sample = (theta.sin() * i16::MAX as f32 * 0.5) as i16;
        samples.extend_from_slice(&sample.to_le_bytes());
    }

    let mut file = File::create(path)?;
    let data_len = samples.len() as u32;
    let chunk_size = 36u32 + data_len;
    file.write_all(b"RIFF")?;
    file.write_all(&chunk_size.to_le_bytes())?;
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    let byte_rate = sample_rate * 2;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&2u16.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&data_len.to_le_bytes())?;
    file.write_all(&samples)?;
    Ok(())
}

#[test]
fn splits_a_wav_recording_into_capped_partitions() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_test_tone(&input_path, 8_000, 2_000)?;

    let output_dir = tempdir()?;
    Command::cargo_bin("audiocap")?
        .arg("--output")
        .arg(output_dir.path())
        .arg("--prefix")
        .arg("rec")
        .arg("--format")
        .arg("wav")
        .arg("--merged-size")
        .arg("1m")
        .arg("--split-size")
        .arg("10k")
        .arg(&input_path)
        .assert()
        .success();

    let session_dir = output_dir.path().join("input");
    assert!(session_dir.is_dir());

    let merged = session_dir.join("rec.wav");
    // 2 seconds of 8 kHz mono 16-bit audio plus the header.
    assert_eq!(fs::metadata(&merged)?.len(), 44 + 32_000);

    let mut splits: Vec<_> = fs::read_dir(&session_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    splits.retain(|path| path != &merged);
    splits.sort();
    assert!(splits.len() > 1, "32 KB of audio cannot fit one 10 KB split");

    let mut split_audio = 0u64;
    for path in &splits {
        let len = fs::metadata(path)?.len();
        assert!(len <= 10 * 1_024);
        split_audio += len - 44;
    }
    assert_eq!(split_audio, 32_000);

    work_dir.close()?;
    output_dir.close()?;
    Ok(())
}

#[test]
fn produces_a_playable_mp3_recording() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("tone.wav");
    write_test_tone(&input_path, 44_100, 1_500)?;

    let output_dir = tempdir()?;
    Command::cargo_bin("audiocap")?
        .arg("--output")
        .arg(output_dir.path())
        .arg("--format")
        .arg("mp3")
        .arg("--bitrate")
        .arg("128")
        .arg(&input_path)
        .assert()
        .success();

    let merged = output_dir.path().join("tone").join("recording.mp3");
    let bytes = fs::read(&merged)?;
    assert!(!bytes.is_empty());
    // MPEG-1 Layer 3 sync word on the very first frame.
    assert_eq!(bytes[0], 0xFF);
    assert_eq!(bytes[1], 0xFB);

    work_dir.close()?;
    output_dir.close()?;
    Ok(())
}

#[test]
fn rejects_a_missing_input_file() -> Result<(), Box<dyn Error>> {
    let output_dir = tempdir()?;
    Command::cargo_bin("audiocap")?
        .arg("--output")
        .arg(output_dir.path())
        .arg("does-not-exist.wav")
        .assert()
        .failure();
    output_dir.close()?;
    Ok(())
}

#[test]
fn rejects_an_invalid_size_argument() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.wav");
    write_test_tone(&input_path, 8_000, 100)?;

    Command::cargo_bin("audiocap")?
        .arg("--split-size")
        .arg("eight")
        .arg(&input_path)
        .assert()
        .failure();
    work_dir.close()?;
    Ok(())
}
