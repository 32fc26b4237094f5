// Speaker output (cpal)
//
// The output stream runs on its own thread (cpal streams are not Send). A
// shared mixer holds every scheduled buffer at its start frame; the device
// callback sums whatever is due into each channel and advances the sample
// clock, which is the output clock the scheduler plans against.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

use super::codec::{sample_to_pcm16, AudioChunk};
use super::convert;
use super::playback::{AudioOutput, PlaybackSourceHandle};

/// A scheduled buffer, resampled to the device rate
struct Voice {
    handle: PlaybackSourceHandle,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared with the device callback
#[derive(Default)]
struct Mixer {
    /// Frames rendered since the stream started; the output clock
    frames_played: u64,
    voices: Vec<Voice>,
    finished: Vec<PlaybackSourceHandle>,
}

impl Mixer {
    /// Fill one interleaved device buffer and advance the clock
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let Mixer {
            frames_played,
            voices,
            finished,
        } = self;

        for frame in out.chunks_mut(channels.max(1)) {
            let now = *frames_played;
            let mut sum = 0.0f32;
            for voice in voices.iter() {
                if now >= voice.start_frame {
                    if let Some(sample) = voice.samples.get((now - voice.start_frame) as usize) {
                        sum += *sample;
                    }
                }
            }
            frame.fill(sum.clamp(-1.0, 1.0));
            *frames_played += 1;
        }

        let now = *frames_played;
        voices.retain(|voice| {
            let done = voice.end_frame() <= now;
            if done {
                finished.push(voice.handle);
            }
            !done
        });
    }
}

fn lock(mixer: &Mutex<Mixer>) -> std::sync::MutexGuard<'_, Mixer> {
    // A panic in the callback leaves the mixer usable; keep playing
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct OutputThread {
    stop: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Default system output device
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    device: String,
    thread: Option<OutputThread>,
}

impl SpeakerOutput {
    /// Open the default output device and start its stream
    pub fn open() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let stream_mixer = Arc::clone(&mixer);
        let handle = thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let stream = match open_output(stream_mixer) {
                    Ok((stream, device, sample_rate)) => {
                        let _ = ready_tx.send(Ok((device, sample_rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Speaker stream closed");
            })
            .context("Failed to start speaker thread")?;

        let opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("speaker thread exited before the device opened"))
            .and_then(|result| result);

        let (device, sample_rate) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        info!("Playing model audio on {} ({}Hz)", device, sample_rate);

        Ok(Self {
            mixer,
            sample_rate,
            device,
            thread: Some(OutputThread { stop: stop_tx, handle }),
        })
    }

    /// Device sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn open_output(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, String, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No default output device")?;
    let name = device.name().unwrap_or_else(|_| "unknown output".to_string());

    let supported = device
        .default_output_config()
        .context("Failed to query output config")?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let on_error = |e: cpal::StreamError| warn!("Speaker stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| lock(&mixer).render(data, channels),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    lock(&mixer).render(&mut scratch, channels);
                    for (out, &sample) in data.iter_mut().zip(&scratch) {
                        *out = sample_to_pcm16(sample);
                    }
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    lock(&mixer).render(&mut scratch, channels);
                    for (out, &sample) in data.iter_mut().zip(&scratch) {
                        *out = (sample_to_pcm16(sample) as i32 + 32768) as u16;
                    }
                },
                on_error,
                None,
            )
        }
        other => return Err(anyhow!("Unsupported output sample format {:?}", other)),
    }
    .context("Failed to build output stream")?;

    stream.play().context("Failed to start output stream")?;

    Ok((stream, name, sample_rate))
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).frames_played as f64 / self.sample_rate as f64
    }

    fn play(&mut self, handle: PlaybackSourceHandle, chunk: &AudioChunk, start_at: f64) -> Result<()> {
        let samples = convert::resample(&chunk.samples, chunk.sample_rate, self.sample_rate);
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;

        lock(&self.mixer).voices.push(Voice {
            handle,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&mut self, handle: PlaybackSourceHandle) {
        lock(&self.mixer).voices.retain(|voice| voice.handle != handle);
    }

    fn take_finished(&mut self) -> Vec<PlaybackSourceHandle> {
        std::mem::take(&mut lock(&self.mixer).finished)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            lock(&self.mixer).voices.clear();
            let _ = thread.stop.send(());
            if thread.handle.join().is_err() {
                return Err(anyhow!("speaker thread panicked"));
            }
            info!("Speaker {} closed", self.device);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close speaker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: u64, start_frame: u64, samples: Vec<f32>) -> Voice {
        Voice {
            handle: PlaybackSourceHandle::from_id(id),
            start_frame,
            samples,
        }
    }

    #[test]
    fn test_render_places_voices_on_the_sample_clock() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(0, 0, vec![0.25; 2]));
        mixer.voices.push(voice(1, 2, vec![-0.5; 2]));

        // Stereo device: every frame is duplicated across channels
        let mut out = vec![9.0; 12];
        mixer.render(&mut out, 2);

        assert_eq!(out, vec![0.25, 0.25, 0.25, 0.25, -0.5, -0.5, -0.5, -0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(mixer.frames_played, 6);
        assert!(mixer.voices.is_empty());
        assert_eq!(
            mixer.finished,
            vec![PlaybackSourceHandle::from_id(0), PlaybackSourceHandle::from_id(1)]
        );
    }

    #[test]
    fn test_render_reports_completion_across_buffers() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(7, 1, vec![0.1; 4]));

        let mut out = vec![0.0; 3];
        mixer.render(&mut out, 1);
        assert!(mixer.finished.is_empty(), "still playing");
        assert_eq!(mixer.voices.len(), 1);

        mixer.render(&mut out, 1);
        assert_eq!(mixer.finished, vec![PlaybackSourceHandle::from_id(7)]);
        assert_eq!(out[..2], [0.1, 0.1]);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_render_clamps_overlapping_voices() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(0, 0, vec![0.8; 2]));
        mixer.voices.push(voice(1, 0, vec![0.8; 2]));

        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 1);
        assert_eq!(out, vec![1.0, 1.0]);
    }

    #[test]
    fn test_stopped_voice_is_not_reported_finished() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(3, 0, vec![0.5; 100]));

        let mut out = vec![0.0; 10];
        mixer.render(&mut out, 1);
        mixer.voices.retain(|v| v.handle != PlaybackSourceHandle::from_id(3));
        mixer.render(&mut out, 1);

        assert!(out.iter().all(|&s| s == 0.0), "silent after stop");
        assert!(mixer.finished.is_empty());
        assert_eq!(mixer.frames_played, 20, "clock keeps running");
    }
}
