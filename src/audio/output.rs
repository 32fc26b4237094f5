use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::codec::AudioChunk;
use super::convert;
use super::playback::{AudioOutput, PlaybackSourceHandle};
use super::speaker::SpeakerOutput;

/// Builds a fresh output device for each session
pub trait OutputFactory: Send + Sync {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>>;
}

/// Where inbound model audio is rendered
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Default system output device
    Speaker,
    /// Keep the output clock running but discard audio
    Null,
    /// Render the playback timeline into a WAV file as it plays
    Wav(PathBuf),
}

impl OutputFactory for OutputTarget {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        match self {
            OutputTarget::Speaker => Ok(Box::new(SpeakerOutput::open()?)),
            OutputTarget::Null => Ok(Box::new(NullOutput::new())),
            OutputTarget::Wav(path) => Ok(Box::new(WavOutput::new(path.clone(), sample_rate)?)),
        }
    }
}

/// Wall-clock output that drops samples
pub struct NullOutput {
    started: Instant,
}

impl NullOutput {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for NullOutput {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn play(&mut self, _handle: PlaybackSourceHandle, _chunk: &AudioChunk, _start_at: f64) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _handle: PlaybackSourceHandle) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Renders scheduled buffers onto a sample timeline and streams it to WAV
///
/// The output clock is wall time since creation. Samples behind the clock can
/// no longer change and are written out as the clock passes them; only the
/// still-pending tail of the timeline is held in memory. Stopping a buffer
/// silences whatever part of it lies after the current clock position.
pub struct WavOutput {
    path: PathBuf,
    sample_rate: u32,
    started: Instant,
    /// Created on the first settled sample, so an unused output leaves no file
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    /// Samples already written; absolute index of `tail[0]`
    flushed: usize,
    tail: Vec<f32>,
    /// Absolute sample range [start, end) of each buffer
    regions: HashMap<PlaybackSourceHandle, (usize, usize)>,
    finished: Vec<PlaybackSourceHandle>,
    closed: bool,
}

impl WavOutput {
    pub fn new(path: PathBuf, sample_rate: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }

        info!("Rendering model audio to {:?} ({}Hz)", path, sample_rate);

        Ok(Self {
            path,
            sample_rate,
            started: Instant::now(),
            writer: None,
            flushed: 0,
            tail: Vec::new(),
            regions: HashMap::new(),
            finished: Vec::new(),
            closed: false,
        })
    }

    fn index_at(&self, time: f64) -> usize {
        (time.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Samples written to the file so far
    pub fn samples_written(&self) -> usize {
        self.flushed
    }

    fn writer(&mut self) -> Result<&mut hound::WavWriter<BufWriter<File>>> {
        if self.writer.is_none() {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: self.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let writer = hound::WavWriter::create(&self.path, spec)
                .with_context(|| format!("Failed to create WAV file: {:?}", self.path))?;
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .context("WAV writer unavailable")
    }

    /// Write out the first `count` samples of the tail
    fn write_tail(&mut self, count: usize) -> Result<()> {
        let settled: Vec<f32> = self.tail.drain(..count).collect();
        let writer = self.writer()?;
        for sample in settled {
            writer
                .write_sample(super::codec::sample_to_pcm16(sample))
                .context("Failed to write sample to WAV")?;
        }
        // Keeps the header valid while the session is still running
        writer.flush().context("Failed to flush WAV file")?;

        self.flushed += count;
        Ok(())
    }

    /// Stream every sample the clock has already passed
    fn settle(&mut self) -> Result<()> {
        let now = self.index_at(self.current_time());
        let count = now.saturating_sub(self.flushed).min(self.tail.len());
        if count > 0 {
            self.write_tail(count)?;
            debug!("Streamed {} settled samples to {:?}", count, self.path);
        }

        let flushed = self.flushed;
        let finished = &mut self.finished;
        self.regions.retain(|handle, (_, end)| {
            let done = *end <= flushed;
            if done {
                finished.push(*handle);
            }
            !done
        });
        Ok(())
    }
}

impl AudioOutput for WavOutput {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn play(&mut self, handle: PlaybackSourceHandle, chunk: &AudioChunk, start_at: f64) -> Result<()> {
        self.settle()?;

        let samples = convert::resample(&chunk.samples, chunk.sample_rate, self.sample_rate);
        let start = self.index_at(start_at);
        let end = start + samples.len();

        // Whatever would land before the written prefix is already too late
        let skip = self.flushed.saturating_sub(start).min(samples.len());
        let from = start.max(self.flushed) - self.flushed;
        let to = end.max(self.flushed) - self.flushed;

        if self.tail.len() < to {
            self.tail.resize(to, 0.0);
        }

        // Buffers never overlap when scheduled gaplessly, but mix anyway
        for (slot, sample) in self.tail[from..to].iter_mut().zip(&samples[skip..]) {
            *slot = (*slot + sample).clamp(-1.0, 1.0);
        }

        self.regions.insert(handle, (start, end));
        Ok(())
    }

    fn stop(&mut self, handle: PlaybackSourceHandle) {
        if let Err(e) = self.settle() {
            warn!("Failed to stream playback render: {}", e);
        }

        if let Some((start, end)) = self.regions.remove(&handle) {
            let cut = self.index_at(self.current_time()).max(start).max(self.flushed) - self.flushed;
            let end = (end.max(self.flushed) - self.flushed).min(self.tail.len());
            if cut < end {
                self.tail[cut..end].iter_mut().for_each(|s| *s = 0.0);
            }
        }
    }

    fn take_finished(&mut self) -> Vec<PlaybackSourceHandle> {
        if let Err(e) = self.settle() {
            warn!("Failed to stream playback render: {}", e);
        }
        std::mem::take(&mut self.finished)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Trailing silence left behind by stopped buffers is trimmed
        while self.tail.last() == Some(&0.0) {
            self.tail.pop();
        }
        let remaining = self.tail.len();
        self.write_tail(remaining)?;
        self.regions.clear();

        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        info!(
            "Playback render complete: {:?} ({:.1}s)",
            self.path,
            self.flushed as f64 / self.sample_rate as f64
        );

        Ok(())
    }

    fn name(&self) -> &str {
        "wav"
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        // An output that never played anything leaves no file behind
        if !self.closed && (self.writer.is_some() || !self.tail.is_empty()) {
            if let Err(e) = self.close() {
                warn!("Failed to write playback render on drop: {}", e);
            }
        }
    }
}
