mod cli;

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use audiocap_core::{ByteOrder, Container, FormatDescriptor, RecordingSession, SessionConfig};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::cli::build_cli;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();

    let input_path = matches
        .get_one::<PathBuf>("file_path")
        .expect("required argument");
    if !input_path.is_file() {
        return Err(anyhow!(
            "input file does not exist: {}",
            input_path.display()
        ));
    }

    let output_dir = matches
        .get_one::<PathBuf>("output")
        .expect("defaulted argument");
    let prefix = matches
        .get_one::<String>("prefix")
        .expect("defaulted argument");
    let merged_size = *matches
        .get_one::<u64>("merged-size")
        .expect("defaulted argument");
    let split_size = *matches
        .get_one::<u64>("split-size")
        .expect("defaulted argument");
    let bitrate = *matches
        .get_one::<u32>("bitrate")
        .expect("defaulted argument");
    let container = match matches
        .get_one::<String>("format")
        .expect("defaulted argument")
        .as_str()
    {
        "wav" => Container::Wave,
        _ => Container::Mp3,
    };

    let subfolder = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("cannot derive a folder name from the input file"))?
        .to_owned();

    let file = File::open(input_path)
        .with_context(|| format!("failed to open '{}'", input_path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = input_path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unsupported input format: '{}'", input_path.display()))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| anyhow!("input stream does not provide a default track"))?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(anyhow!("unsupported codec"));
    }
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("input stream does not advertise a sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("input stream does not advertise a channel layout"))?
        .count();
    let total_frames = track.codec_params.n_frames;

    // Decoded audio is interleaved into 16-bit little-endian PCM below, which
    // is the shape the writers consume.
    let descriptor = FormatDescriptor::new(channels as u16, sample_rate, 16, ByteOrder::LittleEndian)
        .context("input audio format is not supported by the writers")?;

    let config = SessionConfig::builder(output_dir, &subfolder, prefix, container, descriptor)
        .merged_target_size(merged_size)
        .split_size(split_size)
        .mp3_bitrate_kbps(bitrate)
        .build()
        .context("invalid recording configuration")?;
    let session = RecordingSession::create(config)
        .with_context(|| format!("failed to start a session under '{}'", output_dir.display()))?;

    let progress = ProgressBar::new(total_frames.unwrap_or(0));
    progress.set_draw_target(ProgressDrawTarget::stderr());
    let style = if total_frames.is_some() {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
    } else {
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} frames")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    };
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("failed to create a decoder for the input track")?;
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        if session.is_finalized() {
            debug!("merged budget reached before the input ended");
            break;
        }

        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err).context("failed to read the input stream"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);

                let mut pcm = Vec::with_capacity(buf.samples().len() * 2);
                for sample in buf.samples() {
                    pcm.extend_from_slice(&sample.to_le_bytes());
                }
                session
                    .write_pcm(&pcm)
                    .context("failed to write decoded audio")?;
                progress.inc((pcm.len() / descriptor.frame_bytes()) as u64);
            }
            Err(SymphoniaError::DecodeError(err)) => {
                debug!("skipping undecodable packet: {err}");
                continue;
            }
            Err(err) => return Err(err).context("failed to decode the input stream"),
        }
    }

    if !session.is_finalized() {
        session
            .finalize()
            .context("failed to finalize the recording")?;
    }
    progress.finish_and_clear();

    println!("Merged file: {}", session.file().display());
    let splits = session.separate_files();
    println!("Split files ({}):", splits.len());
    for path in splits {
        println!("  {}", path.display());
    }

    Ok(())
}
