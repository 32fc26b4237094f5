// Integration tests for WAV playback rendering and WAV file reading
//
// Fixtures are generated into a temp directory with hound.

use anyhow::Result;
use live_scientist::audio::{AudioChunk, AudioFile, AudioOutput, OutputFactory, OutputTarget, PlaybackScheduler};
use std::path::Path;
use std::time::Duration;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn read_wav(path: &Path) -> Result<(hound::WavSpec, Vec<i16>)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    Ok((spec, samples))
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stereo.wav");
    // 0.25s of stereo at 16kHz: left 0.5, right -0.5
    let samples: Vec<i16> = (0..4000).flat_map(|_| [16384i16, -16384]).collect();
    write_wav(&path, 16000, 2, &samples)?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.25).abs() < 1e-9, "Duration should be 0.25s");
    assert!((audio.samples[0] - 0.5).abs() < 1e-6);
    assert!((audio.samples[1] + 0.5).abs() < 1e-6);
    assert!(audio.path.contains("stereo.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_wav_output_renders_gapless_timeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("replies.wav");

    let output = OutputTarget::Wav(path.clone()).create(24000)?;
    let mut scheduler = PlaybackScheduler::new(output);

    let first = scheduler.schedule(&AudioChunk::new(vec![0.25; 2400], 24000), 0.0)?;
    let second = scheduler.schedule(&AudioChunk::new(vec![-0.25; 2400], 24000), 0.0)?;
    assert!((second.start_time - first.end_time).abs() < 1e-9);

    // Let both buffers play out so shutdown has nothing left to cut
    std::thread::sleep(Duration::from_millis(300));
    scheduler.shutdown();
    assert!(path.exists(), "render written on shutdown");

    let (spec, samples) = read_wav(&path)?;
    assert_eq!(spec.sample_rate, 24000);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len(), 4800, "both chunks rendered back to back");
    assert_eq!(samples[0], 8192);
    assert_eq!(samples[2399], 8192);
    assert_eq!(samples[2400], -8192);

    Ok(())
}

#[test]
fn test_wav_output_streams_settled_audio() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("streamed.wav");

    let mut scheduler = PlaybackScheduler::new(OutputTarget::Wav(path.clone()).create(24000)?);
    scheduler.schedule(&AudioChunk::new(vec![0.25; 2400], 24000), 0.0)?;

    std::thread::sleep(Duration::from_millis(200));
    let now = scheduler.current_time();
    scheduler.reap(now);
    assert_eq!(scheduler.live_count(), 0);

    // Readable while the session is still running
    let (_, samples) = read_wav(&path)?;
    assert_eq!(samples.len(), 2400, "played audio is on disk before shutdown");
    assert_eq!(samples[0], 8192);

    // A later reply lands after the silence that passed in between
    let now = scheduler.current_time();
    let late = scheduler.schedule(&AudioChunk::new(vec![-0.25; 2400], 24000), now)?;
    std::thread::sleep(Duration::from_millis(200));
    scheduler.shutdown();

    let (_, samples) = read_wav(&path)?;
    let late_start = (late.start_time * 24000.0).round() as usize;
    assert_eq!(samples.len(), late_start + 2400);
    assert!(samples[2400..late_start].iter().all(|&s| s == 0), "gap rendered as silence");
    assert_eq!(samples[late_start], -8192);
    assert_eq!(*samples.last().unwrap_or(&0), -8192);
    Ok(())
}

#[test]
fn test_wav_output_resamples_chunks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("resampled.wav");

    let mut scheduler = PlaybackScheduler::new(OutputTarget::Wav(path.clone()).create(24000)?);
    scheduler.schedule(&AudioChunk::new(vec![0.5; 1600], 16000), 0.0)?;

    std::thread::sleep(Duration::from_millis(200));
    scheduler.shutdown();

    let (_, samples) = read_wav(&path)?;
    assert_eq!(samples.len(), 2400, "0.1s at 24kHz");
    Ok(())
}

#[test]
fn test_stopped_buffer_is_cut_short() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("interrupted.wav");

    let mut scheduler = PlaybackScheduler::new(OutputTarget::Wav(path.clone()).create(24000)?);
    // Ten seconds of reply, stopped almost immediately
    scheduler.schedule(&AudioChunk::new(vec![0.5; 240_000], 24000), 0.0)?;
    std::thread::sleep(Duration::from_millis(50));
    scheduler.shutdown();

    let (_, samples) = read_wav(&path)?;
    assert!(samples.len() >= 1200, "audio before the stop is kept");
    assert!(samples.len() < 240_000 / 2, "audio after the stop is silenced");
    Ok(())
}

#[test]
fn test_unused_wav_output_leaves_no_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("never.wav");

    drop(OutputTarget::Wav(path.clone()).create(24000)?);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_null_output_clock_advances() -> Result<()> {
    let output = OutputTarget::Null.create(24000)?;
    let before = output.current_time();
    std::thread::sleep(Duration::from_millis(20));
    assert!(output.current_time() > before);
    assert_eq!(output.name(), "null");
    Ok(())
}
